//! Core domain types and utilities for blockflow.
//!
//! This crate provides the identifiers and error-handling foundation shared
//! by the workflow engine, the trigger scheduler and the server binary.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ExecutionId, ParseIdError, TriggerId, WorkflowId};

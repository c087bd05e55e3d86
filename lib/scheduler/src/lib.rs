//! Trigger supervision for blockflow.
//!
//! This crate provides:
//!
//! - **Protocol**: Newline-delimited JSON messages exchanged with trigger processes
//! - **Trigger Process**: One supervisor task per live trigger process
//! - **Trigger Manager**: Loading, starting and stopping triggers
//! - **Dispatch**: Running a trigger's workflow through the engine when it fires

pub mod config;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod process;
pub mod protocol;

#[cfg(test)]
mod testing;

pub use config::SupervisorConfig;
pub use dispatch::{TriggerSink, reply_data};
pub use error::SchedulerError;
pub use manager::{LoadReport, TriggerManager};
pub use process::{TriggerProcess, TriggerState};
pub use protocol::{InboundMessage, OutboundMessage, ReadyStatus};

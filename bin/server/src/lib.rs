//! The blockflow daemon: configuration, definition loading and commands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod seed;

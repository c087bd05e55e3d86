//! Command-line interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "blockflowd", version, about = "Workflow engine daemon")]
pub struct Cli {
    /// Configuration file. Defaults to ./blockflow.toml when present.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load definitions, start triggers and run until interrupted.
    Serve,
    /// Run one workflow file and print the outcome as JSON.
    Run {
        /// Path to the workflow definition.
        workflow: PathBuf,
        /// Run input as JSON.
        #[arg(long)]
        input: Option<String>,
    },
}

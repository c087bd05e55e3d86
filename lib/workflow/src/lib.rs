//! Workflow engine for blockflow.
//!
//! This crate provides the execution core:
//!
//! - **Definitions**: Workflows as nodes joined by port-labelled connections
//! - **Routing**: Validation and successor lookup over a petgraph graph
//! - **Resolution**: `{{$node.<id>.<path>}}` references in node configs
//! - **Blocks**: Out-of-process block invocation over a JSON stdio contract
//! - **Execution**: Sequential traversal, worker pool admission, stop and restart
//! - **Storage**: Persistence seam for workflows, executions and triggers

pub mod config;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod execution;
pub mod graph;
pub mod invoker;
pub mod pool;
pub mod registry;
pub mod resolver;
pub mod runner;
pub mod storage;
pub mod trigger;

#[cfg(test)]
mod testing;

pub use config::{BlockConfig, EngineConfig};
pub use context::{ExecutionContext, ExecutionSnapshot};
pub use definition::{Connection, DEFAULT_PORT, ERROR_PORT, Node, NodeId, Workflow};
pub use engine::{Engine, RunRequest, SpawnedRun};
pub use error::{
    BlockError, EngineError, GraphError, ResolveError, RunError, StorageError, WorkflowError,
};
pub use execution::{ExecutionRecord, ExecutionStatus, NodeResult};
pub use graph::RoutingTable;
pub use invoker::{BlockInvoker, BlockRequest, ProcessInvoker, executable_path};
pub use pool::{PoolStats, WorkerPool};
pub use registry::ExecutionRegistry;
pub use runner::{PreparedWorkflow, RunOptions, RunOutcome, WorkflowRunner};
pub use storage::{MemoryStorage, Storage};
pub use trigger::Trigger;

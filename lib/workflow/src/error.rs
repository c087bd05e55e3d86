//! Error types for the workflow crate.
//!
//! Errors are layered:
//! - `GraphError`: workflow validation (nodes, connections, block types, cycles)
//! - `ResolveError`: variable reference resolution in node configuration
//! - `BlockError`: a single block subprocess invocation
//! - `StorageError`: the persistence collaborator
//! - `RunError`: why a single run did not complete
//! - `EngineError`: control operations on the engine (start, stop, restart)
//! - `WorkflowError`: execution record state machine violations

use crate::definition::NodeId;
use blockflow_core::{ExecutionId, WorkflowId};
use std::fmt;

/// Errors from workflow validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two nodes share the same id.
    DuplicateNode { node_id: NodeId },
    /// A connection refers to a node that does not exist.
    UnknownNode { node_id: NodeId },
    /// A node uses a block type with no executable.
    UnknownBlockType { node_id: NodeId, block: String },
    /// The workflow graph contains a cycle through the given node.
    CycleDetected { node_id: NodeId },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::UnknownNode { node_id } => {
                write!(f, "connection refers to unknown node: {node_id}")
            }
            Self::UnknownBlockType { node_id, block } => {
                write!(f, "node {node_id} uses unknown block type '{block}'")
            }
            Self::CycleDetected { node_id } => {
                write!(f, "graph contains a cycle through node {node_id}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors from resolving `{{ $node.<id>.<path> }}` references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The referenced node has no result yet.
    MissingNode { node_id: NodeId },
    /// The path does not exist in the referenced node's result.
    MissingPath {
        node_id: NodeId,
        path: String,
        segment: String,
    },
    /// The reference expression could not be parsed.
    Malformed { expression: String },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingNode { node_id } => {
                write!(f, "referenced node {node_id} has no result")
            }
            Self::MissingPath {
                node_id,
                path,
                segment,
            } => write!(
                f,
                "path '{path}' not found in result of node {node_id} (missing '{segment}')"
            ),
            Self::Malformed { expression } => {
                write!(f, "malformed variable reference: {expression}")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Errors from invoking a block subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    /// The executable could not be started.
    Spawn { block: String, message: String },
    /// Writing the request or reading the response failed.
    Io { message: String },
    /// The process exited with a non-zero status.
    NonZeroExit { code: Option<i32>, stderr: String },
    /// Standard output was not exactly one JSON object.
    MalformedResponse { reason: String, stderr: String },
    /// The process exited cleanly without writing a response.
    MissingResponse { stderr: String },
    /// The invocation deadline expired and the process was killed.
    Timeout { after_ms: u64 },
    /// The run was cancelled while the process was in flight.
    Cancelled,
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { block, message } => {
                write!(f, "failed to spawn block '{block}': {message}")
            }
            Self::Io { message } => write!(f, "block i/o failed: {message}"),
            Self::NonZeroExit { code, stderr } => {
                match code {
                    Some(code) => write!(f, "block exited with status {code}")?,
                    None => write!(f, "block terminated by signal")?,
                }
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            Self::MalformedResponse { reason, stderr } => {
                write!(f, "malformed block response: {reason}")?;
                if !stderr.is_empty() {
                    write!(f, " (stderr: {stderr})")?;
                }
                Ok(())
            }
            Self::MissingResponse { stderr } => {
                write!(f, "block produced no response")?;
                if !stderr.is_empty() {
                    write!(f, " (stderr: {stderr})")?;
                }
                Ok(())
            }
            Self::Timeout { after_ms } => write!(f, "block timed out after {after_ms}ms"),
            Self::Cancelled => write!(f, "block invocation cancelled"),
        }
    }
}

impl std::error::Error for BlockError {}

/// Errors from the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The requested execution does not exist.
    ExecutionNotFound { execution_id: ExecutionId },
    /// The requested workflow does not exist.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// The write conflicts with the stored state.
    Conflict { message: String },
    /// The backend rejected the operation.
    Backend { message: String },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "execution not found: {execution_id}")
            }
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::Conflict { message } => write!(f, "storage conflict: {message}"),
            Self::Backend { message } => write!(f, "storage backend error: {message}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Why a run did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The workflow failed validation; nothing was executed.
    Validation(GraphError),
    /// A node's configuration referenced data that does not exist.
    Resolution { node_id: NodeId, error: ResolveError },
    /// A node's block invocation failed.
    Block { node_id: NodeId, error: BlockError },
    /// The run was stopped.
    Cancelled,
    /// The overall run deadline expired.
    DeadlineExceeded { after_ms: u64 },
}

impl RunError {
    /// Returns true if this error represents a stop request rather than a failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "validation failed: {e}"),
            Self::Resolution { node_id, error } => {
                write!(f, "node {node_id}: variable resolution failed: {error}")
            }
            Self::Block { node_id, error } => write!(f, "node {node_id}: {error}"),
            Self::Cancelled => write!(f, "execution stopped"),
            Self::DeadlineExceeded { after_ms } => {
                write!(f, "run deadline of {after_ms}ms exceeded")
            }
        }
    }
}

impl std::error::Error for RunError {}

impl From<GraphError> for RunError {
    fn from(e: GraphError) -> Self {
        Self::Validation(e)
    }
}

/// Errors from engine control operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No live or persisted execution with this id.
    NotFound { execution_id: ExecutionId },
    /// The caller cancelled while waiting for a worker slot.
    QueueCancelled,
    /// The run started but did not complete.
    Failed {
        execution_id: Option<ExecutionId>,
        error: RunError,
    },
    /// Storage failed during a control operation.
    Storage(StorageError),
    /// The execution did not reach a terminal state within the stop timeout.
    StopTimeout { execution_id: ExecutionId },
    /// The background run task panicked or was aborted.
    TaskPanicked { execution_id: ExecutionId },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { execution_id } => write!(f, "execution not found: {execution_id}"),
            Self::QueueCancelled => write!(f, "cancelled while waiting for a worker slot"),
            Self::Failed {
                execution_id: Some(id),
                error,
            } => write!(f, "execution {id} failed: {error}"),
            Self::Failed {
                execution_id: None,
                error,
            } => write!(f, "execution failed: {error}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::StopTimeout { execution_id } => {
                write!(f, "execution {execution_id} did not stop in time")
            }
            Self::TaskPanicked { execution_id } => {
                write!(f, "execution task {execution_id} panicked")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// Execution record state machine errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Invalid state transition.
    InvalidStateTransition { from: String, to: String },
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStateTransition { from, to } => {
                write!(f, "invalid state transition from {from} to {to}")
            }
        }
    }
}

impl std::error::Error for WorkflowError {}

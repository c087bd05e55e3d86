//! Execution records and node results.
//!
//! An execution record moves through `running -> {completed | failed | stopped}`
//! exactly once. `ExecutionRecord::finish` enforces that no transition leaves
//! a terminal state.

use crate::definition::DEFAULT_PORT;
use crate::error::WorkflowError;
use blockflow_core::{ExecutionId, TriggerId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// The overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Nodes are being executed.
    Running,
    /// Traversal finished without an unrouted error.
    Completed,
    /// An unrouted node error or a deadline ended the run.
    Failed,
    /// The run was cancelled.
    Stopped,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Returns the lowercase name used in records and replies.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The output of a single node: its data and the port it took.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// Block output data.
    #[serde(default)]
    pub data: JsonValue,
    /// Output port used for routing.
    #[serde(default = "default_port")]
    pub port: String,
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

impl NodeResult {
    /// Creates a result on the given port.
    #[must_use]
    pub fn new(data: JsonValue, port: impl Into<String>) -> Self {
        Self {
            data,
            port: port.into(),
        }
    }

    /// Returns the `{"data": …, "port": …}` object references resolve against.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({ "data": self.data, "port": self.port })
    }
}

/// A persisted record of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique identifier for this execution.
    pub id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// The trigger that initiated this execution, if any.
    pub trigger_id: Option<TriggerId>,
    /// Current status.
    pub status: ExecutionStatus,
    /// Input the run was started with.
    pub input: JsonValue,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// When the execution reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error text, if any node failed.
    pub error: Option<String>,
    /// Opaque final state, `{"results": {…}}` on completion.
    pub state: Option<JsonValue>,
    /// The execution this one restarted, if any.
    pub restarted_from: Option<ExecutionId>,
}

impl ExecutionRecord {
    /// Creates a running record.
    #[must_use]
    pub fn new(id: ExecutionId, workflow_id: WorkflowId, input: JsonValue) -> Self {
        Self {
            id,
            workflow_id,
            trigger_id: None,
            status: ExecutionStatus::Running,
            input,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            state: None,
            restarted_from: None,
        }
    }

    /// Sets the initiating trigger.
    #[must_use]
    pub fn with_trigger(mut self, trigger_id: Option<TriggerId>) -> Self {
        self.trigger_id = trigger_id;
        self
    }

    /// Sets the execution this one restarts.
    #[must_use]
    pub fn with_restarted_from(mut self, restarted_from: Option<ExecutionId>) -> Self {
        self.restarted_from = restarted_from;
        self
    }

    /// Moves the record to a terminal status.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is already terminal or `status` is not terminal.
    pub fn finish(
        &mut self,
        status: ExecutionStatus,
        error: Option<String>,
        state: Option<JsonValue>,
    ) -> Result<(), WorkflowError> {
        if self.status.is_terminal() || !status.is_terminal() {
            return Err(WorkflowError::InvalidStateTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.error = error;
        self.state = state;
        Ok(())
    }
}

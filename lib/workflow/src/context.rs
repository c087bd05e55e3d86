//! Per-run accumulator of node results.
//!
//! The runner owns the `ExecutionContext` and is its only writer. Everyone
//! else observes the run through `ExecutionSnapshot`s published on a
//! `tokio::sync::watch` channel after every change.

use crate::definition::NodeId;
use crate::execution::{ExecutionStatus, NodeResult};
use blockflow_core::{ExecutionId, WorkflowId};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::watch;

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSnapshot {
    /// The execution being observed.
    pub execution_id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// Current status.
    pub status: ExecutionStatus,
    /// Node currently being executed, if any.
    pub current_node: Option<NodeId>,
    /// Nodes with a result, in completion order.
    pub completed: Vec<NodeId>,
    /// Results written so far.
    pub results: HashMap<NodeId, NodeResult>,
    /// Error attached to the run so far.
    pub error: Option<String>,
}

impl ExecutionSnapshot {
    fn initial(execution_id: ExecutionId, workflow_id: WorkflowId) -> Self {
        Self {
            execution_id,
            workflow_id,
            status: ExecutionStatus::Running,
            current_node: None,
            completed: Vec::new(),
            results: HashMap::new(),
            error: None,
        }
    }
}

/// Results and progress of a single run.
#[derive(Debug)]
pub struct ExecutionContext {
    execution_id: ExecutionId,
    workflow_id: WorkflowId,
    input: JsonValue,
    results: HashMap<NodeId, NodeResult>,
    completed: Vec<NodeId>,
    current_node: Option<NodeId>,
    status: ExecutionStatus,
    error: Option<String>,
    snapshots: watch::Sender<ExecutionSnapshot>,
}

impl ExecutionContext {
    /// Creates an empty context and the receiver observers subscribe from.
    #[must_use]
    pub fn new(
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        input: JsonValue,
    ) -> (Self, watch::Receiver<ExecutionSnapshot>) {
        let (snapshots, receiver) =
            watch::channel(ExecutionSnapshot::initial(execution_id, workflow_id));
        let context = Self {
            execution_id,
            workflow_id,
            input,
            results: HashMap::new(),
            completed: Vec::new(),
            current_node: None,
            status: ExecutionStatus::Running,
            error: None,
            snapshots,
        };
        (context, receiver)
    }

    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    #[must_use]
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    /// The input the run was started with.
    #[must_use]
    pub fn input(&self) -> &JsonValue {
        &self.input
    }

    /// All results written so far.
    #[must_use]
    pub fn results(&self) -> &HashMap<NodeId, NodeResult> {
        &self.results
    }

    /// The most recently written result.
    #[must_use]
    pub fn last_result(&self) -> Option<(&NodeId, &NodeResult)> {
        let node_id = self.completed.last()?;
        self.results.get(node_id).map(|r| (node_id, r))
    }

    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Writes a node's result. Each node is written at most once.
    ///
    /// Returns false, leaving the existing result in place, if the node
    /// already has one.
    pub fn insert(&mut self, node_id: NodeId, result: NodeResult) -> bool {
        if self.results.contains_key(&node_id) {
            return false;
        }
        self.completed.push(node_id.clone());
        self.results.insert(node_id, result);
        self.publish();
        true
    }

    /// Records the node about to be executed.
    pub fn set_current(&mut self, node_id: Option<NodeId>) {
        self.current_node = node_id;
        self.publish();
    }

    /// Attaches error text to the run. The first error wins.
    pub fn record_error(&mut self, error: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(error.into());
        }
    }

    /// Replaces any error attached to the run.
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Sets the run's status and publishes a final snapshot when terminal.
    pub fn set_status(&mut self, status: ExecutionStatus) {
        self.status = status;
        if status.is_terminal() {
            self.current_node = None;
        }
        self.publish();
    }

    /// Final state blob `{"results": {<node>: {"data", "port"}}}`.
    #[must_use]
    pub fn final_state(&self) -> JsonValue {
        let results: serde_json::Map<String, JsonValue> = self
            .results
            .iter()
            .map(|(id, r)| (id.to_string(), r.to_json()))
            .collect();
        serde_json::json!({ "results": results })
    }

    /// Current snapshot, as observers would see it.
    #[must_use]
    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            execution_id: self.execution_id,
            workflow_id: self.workflow_id,
            status: self.status,
            current_node: self.current_node.clone(),
            completed: self.completed.clone(),
            results: self.results.clone(),
            error: self.error.clone(),
        }
    }

    fn publish(&self) {
        // No receivers left is fine; the run continues unobserved.
        self.snapshots.send_replace(self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> (ExecutionContext, watch::Receiver<ExecutionSnapshot>) {
        ExecutionContext::new(ExecutionId::next(), WorkflowId::new(), json!({"seed": 1}))
    }

    #[test]
    fn insert_is_at_most_once() {
        let (mut ctx, _rx) = context();
        let a = NodeId::from("a");

        assert!(ctx.insert(a.clone(), NodeResult::new(json!(1), "default")));
        assert!(!ctx.insert(a.clone(), NodeResult::new(json!(2), "default")));
        assert_eq!(ctx.results().get(&a).map(|r| r.data.clone()), Some(json!(1)));
    }

    #[test]
    fn snapshots_follow_inserts() {
        let (mut ctx, rx) = context();
        ctx.insert(NodeId::from("a"), NodeResult::new(json!("x"), "default"));

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.completed, vec![NodeId::from("a")]);
        assert!(snapshot.results.contains_key(&NodeId::from("a")));
    }

    #[test]
    fn terminal_status_clears_current_node() {
        let (mut ctx, rx) = context();
        ctx.set_current(Some(NodeId::from("a")));
        assert_eq!(rx.borrow().current_node, Some(NodeId::from("a")));

        ctx.set_status(ExecutionStatus::Stopped);
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.status, ExecutionStatus::Stopped);
        assert_eq!(snapshot.current_node, None);
    }

    #[test]
    fn first_error_wins() {
        let (mut ctx, _rx) = context();
        ctx.record_error("first");
        ctx.record_error("second");
        assert_eq!(ctx.error(), Some("first"));

        ctx.set_error("fatal");
        assert_eq!(ctx.error(), Some("fatal"));
    }

    #[test]
    fn final_state_shape() {
        let (mut ctx, _rx) = context();
        ctx.insert(NodeId::from("a"), NodeResult::new(json!({"n": 1}), "true"));
        assert_eq!(
            ctx.final_state(),
            json!({"results": {"a": {"data": {"n": 1}, "port": "true"}}})
        );
        assert_eq!(ctx.last_result().map(|(id, _)| id.clone()), Some(NodeId::from("a")));
    }
}

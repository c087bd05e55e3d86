//! Persistence interface consumed by the engine.
//!
//! The engine only depends on the `Storage` trait; the storage format is the
//! implementor's concern. `MemoryStorage` keeps everything in process and is
//! what the server seeds from its definitions directory.

use crate::definition::{NodeId, Workflow};
use crate::error::StorageError;
use crate::execution::{ExecutionRecord, ExecutionStatus, NodeResult};
use crate::trigger::Trigger;
use async_trait::async_trait;
use blockflow_core::{ExecutionId, TriggerId, WorkflowId};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for workflow, execution and trigger persistence.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Inserts or replaces a workflow definition.
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StorageError>;

    /// Loads a workflow definition.
    async fn get_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StorageError>;

    /// Persists a new execution record in `running` status.
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), StorageError>;

    /// Appends a node's result to an execution.
    async fn save_node_result(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        result: &NodeResult,
    ) -> Result<(), StorageError>;

    /// Moves an execution to a terminal status.
    async fn update_execution_status(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        error: Option<String>,
        state: Option<JsonValue>,
    ) -> Result<(), StorageError>;

    /// Loads an execution record.
    async fn get_execution(&self, id: ExecutionId)
    -> Result<Option<ExecutionRecord>, StorageError>;

    /// Loads an execution's node results in the order they were saved.
    async fn node_results(
        &self,
        id: ExecutionId,
    ) -> Result<Vec<(NodeId, NodeResult)>, StorageError>;

    /// Inserts or replaces a trigger.
    async fn save_trigger(&self, trigger: &Trigger) -> Result<(), StorageError>;

    /// Loads a trigger.
    async fn get_trigger(&self, id: TriggerId) -> Result<Option<Trigger>, StorageError>;

    /// Lists every persisted trigger.
    async fn list_triggers(&self) -> Result<Vec<Trigger>, StorageError>;
}

#[derive(Debug, Default)]
struct Tables {
    workflows: HashMap<WorkflowId, Workflow>,
    executions: HashMap<ExecutionId, ExecutionRecord>,
    node_results: HashMap<ExecutionId, Vec<(NodeId, NodeResult)>>,
    triggers: HashMap<TriggerId, Trigger>,
}

/// In-process `Storage` backed by hash maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StorageError> {
        self.tables
            .write()
            .await
            .workflows
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StorageError> {
        Ok(self.tables.read().await.workflows.get(&id).cloned())
    }

    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        if tables.executions.contains_key(&record.id) {
            return Err(StorageError::Conflict {
                message: format!("execution {} already exists", record.id),
            });
        }
        tables.executions.insert(record.id, record.clone());
        Ok(())
    }

    async fn save_node_result(
        &self,
        execution_id: ExecutionId,
        node_id: &NodeId,
        result: &NodeResult,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        if !tables.executions.contains_key(&execution_id) {
            return Err(StorageError::ExecutionNotFound { execution_id });
        }
        tables
            .node_results
            .entry(execution_id)
            .or_default()
            .push((node_id.clone(), result.clone()));
        Ok(())
    }

    async fn update_execution_status(
        &self,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        error: Option<String>,
        state: Option<JsonValue>,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        let record = tables
            .executions
            .get_mut(&execution_id)
            .ok_or(StorageError::ExecutionNotFound { execution_id })?;
        record
            .finish(status, error, state)
            .map_err(|e| StorageError::Conflict {
                message: e.to_string(),
            })
    }

    async fn get_execution(
        &self,
        id: ExecutionId,
    ) -> Result<Option<ExecutionRecord>, StorageError> {
        Ok(self.tables.read().await.executions.get(&id).cloned())
    }

    async fn node_results(
        &self,
        id: ExecutionId,
    ) -> Result<Vec<(NodeId, NodeResult)>, StorageError> {
        Ok(self
            .tables
            .read()
            .await
            .node_results
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_trigger(&self, trigger: &Trigger) -> Result<(), StorageError> {
        self.tables
            .write()
            .await
            .triggers
            .insert(trigger.id, trigger.clone());
        Ok(())
    }

    async fn get_trigger(&self, id: TriggerId) -> Result<Option<Trigger>, StorageError> {
        Ok(self.tables.read().await.triggers.get(&id).cloned())
    }

    async fn list_triggers(&self) -> Result<Vec<Trigger>, StorageError> {
        let mut triggers: Vec<Trigger> =
            self.tables.read().await.triggers.values().cloned().collect();
        triggers.sort_by_key(|t| t.id);
        Ok(triggers)
    }
}

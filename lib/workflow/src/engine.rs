//! Engine façade: the boundary operations for running and controlling workflows.
//!
//! `start` is the single admission point for manual and trigger-initiated
//! runs:
//! 1. Validate the workflow
//! 2. Wait for a worker slot
//! 3. Allocate an execution id and context
//! 4. Register the execution
//! 5. Spawn the run task, which holds the slot until it finishes

use crate::config::EngineConfig;
use crate::context::{ExecutionContext, ExecutionSnapshot};
use crate::definition::Workflow;
use crate::error::{EngineError, RunError, StorageError};
use crate::execution::ExecutionStatus;
use crate::invoker::BlockInvoker;
use crate::pool::{PoolStats, WorkerPool};
use crate::registry::ExecutionRegistry;
use crate::runner::{RunOptions, RunOutcome, WorkflowRunner};
use crate::storage::Storage;
use blockflow_core::{ExecutionId, TriggerId, WorkflowId};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// A request to run a workflow.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub workflow: Arc<Workflow>,
    pub input: JsonValue,
    pub options: RunOptions,
    /// Cancels waiting for a worker slot. Has no effect once admitted.
    pub queue_cancel: CancellationToken,
}

impl RunRequest {
    #[must_use]
    pub fn new(workflow: Arc<Workflow>, input: JsonValue) -> Self {
        Self {
            workflow,
            input,
            options: RunOptions::default(),
            queue_cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_trigger(mut self, trigger_id: Option<TriggerId>) -> Self {
        self.options.trigger_id = trigger_id;
        self
    }

    #[must_use]
    pub fn with_restarted_from(mut self, execution_id: Option<ExecutionId>) -> Self {
        self.options.restarted_from = execution_id;
        self
    }

    #[must_use]
    pub fn with_queue_cancel(mut self, cancel: CancellationToken) -> Self {
        self.queue_cancel = cancel;
        self
    }
}

/// An admitted run executing in the background.
#[derive(Debug)]
pub struct SpawnedRun {
    execution_id: ExecutionId,
    handle: JoinHandle<RunOutcome>,
}

impl SpawnedRun {
    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Waits for the run to finish.
    ///
    /// # Errors
    ///
    /// Returns `TaskPanicked` if the run task panicked or was aborted.
    pub async fn wait(self) -> Result<RunOutcome, EngineError> {
        let execution_id = self.execution_id;
        self.handle
            .await
            .map_err(|_| EngineError::TaskPanicked { execution_id })
    }
}

/// Runs workflows through a bounded worker pool and tracks them for control.
#[derive(Clone)]
pub struct Engine {
    runner: WorkflowRunner,
    pool: WorkerPool,
    registry: ExecutionRegistry,
}

impl Engine {
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        storage: Arc<dyn Storage>,
        invoker: Arc<dyn BlockInvoker>,
    ) -> Self {
        let runner = WorkflowRunner::new(storage, invoker)
            .with_run_timeout(config.run_timeout_ms.map(Duration::from_millis));
        Self {
            runner,
            pool: WorkerPool::new(config.pool_capacity),
            registry: ExecutionRegistry::new(config.stop_timeout()),
        }
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.runner.storage()
    }

    /// Admits a run and starts it in the background.
    ///
    /// # Errors
    ///
    /// - `Failed` with a validation error if the workflow is invalid
    /// - `QueueCancelled` if the request's queue token fires before admission
    #[instrument(skip(self, request), fields(workflow_id = %request.workflow.id))]
    pub async fn start(&self, request: RunRequest) -> Result<SpawnedRun, EngineError> {
        let prepared = self
            .runner
            .prepare(Arc::clone(&request.workflow))
            .map_err(|e| EngineError::Failed {
                execution_id: None,
                error: RunError::Validation(e),
            })?;

        let permit = self.pool.acquire(&request.queue_cancel).await?;

        let execution_id = ExecutionId::next();
        let cancel = CancellationToken::new();
        let (context, snapshots) =
            ExecutionContext::new(execution_id, request.workflow.id, request.input);
        self.registry
            .register(execution_id, request.workflow.id, cancel.clone(), snapshots)
            .await;

        let runner = self.runner.clone();
        let registry = self.registry.clone();
        let options = request.options;
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let outcome = runner.run(&prepared, context, options, cancel).await;
            registry.remove(execution_id).await;
            outcome
        });

        Ok(SpawnedRun {
            execution_id,
            handle,
        })
    }

    /// Runs a workflow and waits for it to finish.
    ///
    /// # Errors
    ///
    /// See [`Engine::start`] and [`SpawnedRun::wait`]. A run that fails or is
    /// stopped still returns `Ok` with the corresponding status.
    pub async fn run(&self, workflow: Arc<Workflow>, input: JsonValue) -> Result<RunOutcome, EngineError> {
        self.start(RunRequest::new(workflow, input)).await?.wait().await
    }

    /// Loads a stored workflow and runs it to completion.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the workflow cannot be loaded, otherwise as [`Engine::run`].
    pub async fn run_stored(
        &self,
        workflow_id: WorkflowId,
        input: JsonValue,
        trigger_id: Option<TriggerId>,
    ) -> Result<RunOutcome, EngineError> {
        let workflow = self
            .storage()
            .get_workflow(workflow_id)
            .await?
            .ok_or(StorageError::WorkflowNotFound { workflow_id })?;
        let request = RunRequest::new(Arc::new(workflow), input).with_trigger(trigger_id);
        self.start(request).await?.wait().await
    }

    /// Stops an execution and returns its terminal status.
    ///
    /// Executions that already finished report their stored status.
    /// A stored execution left `running` by a previous process is marked
    /// `stopped`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if neither the registry nor storage knows the id.
    #[instrument(skip(self))]
    pub async fn stop(&self, execution_id: ExecutionId) -> Result<ExecutionStatus, EngineError> {
        match self.registry.stop(execution_id).await {
            Err(EngineError::NotFound { .. }) => {}
            other => return other,
        }

        let record = self
            .storage()
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::NotFound { execution_id })?;

        if record.status.is_terminal() {
            return Ok(record.status);
        }

        warn!(execution_id = %execution_id, "marking orphaned execution stopped");
        self.storage()
            .update_execution_status(
                execution_id,
                ExecutionStatus::Stopped,
                record.error,
                record.state,
            )
            .await?;
        Ok(ExecutionStatus::Stopped)
    }

    /// Stops each execution independently and concurrently.
    pub async fn batch_stop(
        &self,
        execution_ids: &[ExecutionId],
    ) -> Vec<(ExecutionId, Result<ExecutionStatus, EngineError>)> {
        let stops = execution_ids.iter().map(|&id| async move { (id, self.stop(id).await) });
        futures::future::join_all(stops).await
    }

    /// Runs a previous execution's workflow again from the beginning.
    ///
    /// The original is stopped first if it is still live. The new execution
    /// gets a fresh id and records `restarted_from`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown execution, `Storage` if its workflow
    /// is gone, otherwise as [`Engine::start`].
    #[instrument(skip(self))]
    pub async fn restart(&self, execution_id: ExecutionId) -> Result<SpawnedRun, EngineError> {
        if self.registry.workflow_id(execution_id).await.is_some() {
            if let Err(e) = self.registry.stop(execution_id).await {
                warn!(execution_id = %execution_id, error = %e, "failed to stop execution before restart");
            }
        }

        let record = self
            .storage()
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::NotFound { execution_id })?;
        let workflow = self
            .storage()
            .get_workflow(record.workflow_id)
            .await?
            .ok_or(StorageError::WorkflowNotFound {
                workflow_id: record.workflow_id,
            })?;

        let request = RunRequest::new(Arc::new(workflow), record.input)
            .with_trigger(record.trigger_id)
            .with_restarted_from(Some(execution_id));
        let spawned = self.start(request).await?;
        info!(
            execution_id = %execution_id,
            new_execution_id = %spawned.execution_id(),
            "execution restarted"
        );
        Ok(spawned)
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Latest snapshot of a live execution.
    pub async fn snapshot(&self, execution_id: ExecutionId) -> Option<ExecutionSnapshot> {
        self.registry.snapshot(execution_id).await
    }

    /// Ids of all live executions.
    pub async fn active(&self) -> Vec<ExecutionId> {
        self.registry.active().await
    }

    /// Cancels every live execution. Runs started afterwards are unaffected.
    pub async fn shutdown(&self) {
        let active = self.registry.active().await;
        info!(active = active.len(), "stopping all executions");
        for (id, result) in self.batch_stop(&active).await {
            if let Err(e) = result {
                warn!(execution_id = %id, error = %e, "execution did not stop cleanly");
            }
        }
    }
}

//! Live execution tracking for stop and restart control.
//!
//! Each admitted run is registered with its cancellation token and the
//! receiving end of its snapshot channel before traversal begins, and removed
//! once it reaches a terminal status.

use crate::context::ExecutionSnapshot;
use crate::error::EngineError;
use crate::execution::ExecutionStatus;
use blockflow_core::{ExecutionId, WorkflowId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct RegistryEntry {
    workflow_id: WorkflowId,
    cancel: CancellationToken,
    snapshots: watch::Receiver<ExecutionSnapshot>,
}

/// Concurrency-safe map of live executions.
#[derive(Debug, Clone)]
pub struct ExecutionRegistry {
    entries: Arc<RwLock<HashMap<ExecutionId, RegistryEntry>>>,
    stop_timeout: Duration,
}

impl ExecutionRegistry {
    /// Creates a registry whose `stop` waits at most `stop_timeout`.
    #[must_use]
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            stop_timeout,
        }
    }

    /// Tracks a newly admitted execution.
    pub async fn register(
        &self,
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        cancel: CancellationToken,
        snapshots: watch::Receiver<ExecutionSnapshot>,
    ) {
        self.entries.write().await.insert(
            execution_id,
            RegistryEntry {
                workflow_id,
                cancel,
                snapshots,
            },
        );
        debug!(execution_id = %execution_id, "execution registered");
    }

    /// Drops a finished execution.
    pub async fn remove(&self, execution_id: ExecutionId) {
        if self.entries.write().await.remove(&execution_id).is_some() {
            debug!(execution_id = %execution_id, "execution finalized");
        }
    }

    /// Cancels a live execution and waits for it to reach a terminal status.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the execution is not live
    /// - `StopTimeout` if it does not finish within the stop timeout
    /// - `TaskPanicked` if its run task went away without finishing
    pub async fn stop(&self, execution_id: ExecutionId) -> Result<ExecutionStatus, EngineError> {
        let Some(entry) = self.entries.read().await.get(&execution_id).cloned() else {
            return Err(EngineError::NotFound { execution_id });
        };
        let mut snapshots = entry.snapshots;

        entry.cancel.cancel();
        debug!(execution_id = %execution_id, "stop requested");

        let waited = tokio::time::timeout(
            self.stop_timeout,
            snapshots.wait_for(|s| s.status.is_terminal()),
        )
        .await
        .map(|seen| seen.map(|snapshot| snapshot.status));

        match waited {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(_)) => {
                // Sender dropped; the last published value is final.
                let status = snapshots.borrow().status;
                if status.is_terminal() {
                    Ok(status)
                } else {
                    Err(EngineError::TaskPanicked { execution_id })
                }
            }
            Err(_) => {
                warn!(execution_id = %execution_id, "execution did not stop in time");
                Err(EngineError::StopTimeout { execution_id })
            }
        }
    }

    /// Latest snapshot of a live execution.
    pub async fn snapshot(&self, execution_id: ExecutionId) -> Option<ExecutionSnapshot> {
        self.entries
            .read()
            .await
            .get(&execution_id)
            .map(|entry| entry.snapshots.borrow().clone())
    }

    /// Workflow a live execution belongs to.
    pub async fn workflow_id(&self, execution_id: ExecutionId) -> Option<WorkflowId> {
        self.entries
            .read()
            .await
            .get(&execution_id)
            .map(|entry| entry.workflow_id)
    }

    /// Ids of all live executions, oldest first.
    pub async fn active(&self) -> Vec<ExecutionId> {
        let mut ids: Vec<ExecutionId> = self.entries.read().await.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use serde_json::Value as JsonValue;

    fn live() -> (ExecutionContext, watch::Receiver<ExecutionSnapshot>) {
        ExecutionContext::new(ExecutionId::next(), WorkflowId::new(), JsonValue::Null)
    }

    #[tokio::test]
    async fn stop_unknown_is_not_found() {
        let registry = ExecutionRegistry::new(Duration::from_millis(100));
        let id = ExecutionId::next();
        assert_eq!(
            registry.stop(id).await,
            Err(EngineError::NotFound { execution_id: id })
        );
    }

    #[tokio::test]
    async fn stop_cancels_and_waits_for_terminal_status() {
        let registry = ExecutionRegistry::new(Duration::from_secs(2));
        let (mut ctx, rx) = live();
        let id = ctx.execution_id();
        let cancel = CancellationToken::new();
        registry
            .register(id, ctx.workflow_id(), cancel.clone(), rx)
            .await;

        let runner = tokio::spawn(async move {
            cancel.cancelled().await;
            ctx.set_status(ExecutionStatus::Stopped);
            ctx
        });

        assert_eq!(registry.stop(id).await, Ok(ExecutionStatus::Stopped));
        runner.await.expect("join");
    }

    #[tokio::test]
    async fn stop_times_out_when_run_ignores_cancellation() {
        let registry = ExecutionRegistry::new(Duration::from_millis(50));
        let (ctx, rx) = live();
        let id = ctx.execution_id();
        registry
            .register(id, ctx.workflow_id(), CancellationToken::new(), rx)
            .await;

        assert_eq!(
            registry.stop(id).await,
            Err(EngineError::StopTimeout { execution_id: id })
        );
        drop(ctx);
    }

    #[tokio::test]
    async fn dropped_context_without_terminal_status() {
        let registry = ExecutionRegistry::new(Duration::from_secs(1));
        let (ctx, rx) = live();
        let id = ctx.execution_id();
        registry
            .register(id, ctx.workflow_id(), CancellationToken::new(), rx)
            .await;
        drop(ctx);

        assert_eq!(
            registry.stop(id).await,
            Err(EngineError::TaskPanicked { execution_id: id })
        );
    }

    #[tokio::test]
    async fn active_and_remove() {
        let registry = ExecutionRegistry::new(Duration::from_millis(50));
        let (first, rx1) = live();
        let (second, rx2) = live();
        registry
            .register(first.execution_id(), first.workflow_id(), CancellationToken::new(), rx1)
            .await;
        registry
            .register(second.execution_id(), second.workflow_id(), CancellationToken::new(), rx2)
            .await;

        assert_eq!(
            registry.active().await,
            vec![first.execution_id(), second.execution_id()]
        );
        assert!(registry.snapshot(first.execution_id()).await.is_some());
        assert_eq!(
            registry.workflow_id(second.execution_id()).await,
            Some(second.workflow_id())
        );

        registry.remove(first.execution_id()).await;
        assert_eq!(registry.active().await, vec![second.execution_id()]);
        assert!(registry.snapshot(first.execution_id()).await.is_none());
    }
}

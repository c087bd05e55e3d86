//! Workflow runner: drives one execution from start nodes to a terminal status.
//!
//! The run loop:
//! 1. Validate the workflow and build its routing table (`prepare`)
//! 2. Create the execution record
//! 3. Pop nodes from a FIFO work list, starting with the start nodes
//! 4. For each node: resolve config, invoke the block, write the result into
//!    the context, persist it, then enqueue successors on the taken port
//! 5. Record the terminal status
//!
//! A node reached more than once runs once. Storage failures never end a run;
//! they are logged and returned as warnings on the outcome.

use crate::context::ExecutionContext;
use crate::definition::{ERROR_PORT, NodeId, Workflow};
use crate::error::{BlockError, GraphError, RunError};
use crate::execution::{ExecutionRecord, ExecutionStatus, NodeResult};
use crate::graph::RoutingTable;
use crate::invoker::{BlockInvoker, BlockRequest};
use crate::resolver;
use crate::storage::Storage;
use blockflow_core::{ExecutionId, TriggerId, WorkflowId};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A validated workflow with its routing table.
#[derive(Debug, Clone)]
pub struct PreparedWorkflow {
    workflow: Arc<Workflow>,
    routes: RoutingTable,
}

/// Per-run parameters beyond the workflow itself.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Trigger that initiated the run.
    pub trigger_id: Option<TriggerId>,
    /// Execution this run restarts.
    pub restarted_from: Option<ExecutionId>,
}

/// The result of a run that got past validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    /// Results of every executed node.
    pub results: HashMap<NodeId, NodeResult>,
    /// Data of the last executed node.
    pub output: Option<JsonValue>,
    /// First error attached to the run, routed or not.
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<RunError>,
    /// Storage failures that did not affect the run.
    pub warnings: Vec<String>,
}

fn serialize_error<S>(error: &Option<RunError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Executes workflows against a block invoker and a storage backend.
#[derive(Clone)]
pub struct WorkflowRunner {
    storage: Arc<dyn Storage>,
    invoker: Arc<dyn BlockInvoker>,
    run_timeout: Option<Duration>,
}

impl WorkflowRunner {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, invoker: Arc<dyn BlockInvoker>) -> Self {
        Self {
            storage,
            invoker,
            run_timeout: None,
        }
    }

    /// Caps the wall-clock duration of every run.
    #[must_use]
    pub fn with_run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Validates a workflow: unique node ids, known connection endpoints,
    /// existing block types and an acyclic graph.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn prepare(&self, workflow: Arc<Workflow>) -> Result<PreparedWorkflow, GraphError> {
        let routes = RoutingTable::build(&workflow)?;
        if let Some(node) = workflow
            .nodes
            .iter()
            .find(|n| !self.invoker.has_block(&n.block))
        {
            return Err(GraphError::UnknownBlockType {
                node_id: node.id.clone(),
                block: node.block.clone(),
            });
        }
        Ok(PreparedWorkflow { workflow, routes })
    }

    /// Validates and runs a workflow in the current task.
    ///
    /// # Errors
    ///
    /// Returns `RunError::Validation` if the workflow is invalid. Every other
    /// failure is reported through the outcome's status.
    pub async fn execute(
        &self,
        workflow: Arc<Workflow>,
        input: JsonValue,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let prepared = self.prepare(workflow)?;
        let (context, _snapshots) =
            ExecutionContext::new(ExecutionId::next(), prepared.workflow.id, input);
        Ok(self
            .run(&prepared, context, RunOptions::default(), cancel)
            .await)
    }

    /// Runs a prepared workflow to a terminal status.
    #[instrument(
        skip_all,
        fields(
            execution_id = %context.execution_id(),
            workflow_id = %context.workflow_id(),
        )
    )]
    pub async fn run(
        &self,
        prepared: &PreparedWorkflow,
        mut context: ExecutionContext,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let workflow = &prepared.workflow;
        let routes = &prepared.routes;
        let mut warnings = Vec::new();

        let record = ExecutionRecord::new(
            context.execution_id(),
            workflow.id,
            context.input().clone(),
        )
        .with_trigger(options.trigger_id)
        .with_restarted_from(options.restarted_from);
        if let Err(e) = self.storage.create_execution(&record).await {
            warn!(error = %e, "failed to create execution record");
            warnings.push(e.to_string());
        }
        info!(nodes = workflow.nodes.len(), "execution started");

        let started = Instant::now();
        let deadline = self.run_timeout.map(|t| started + t);

        let mut queue: VecDeque<(NodeId, JsonValue)> = routes
            .start_nodes()
            .iter()
            .map(|id| (id.clone(), context.input().clone()))
            .collect();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut fatal: Option<RunError> = None;
        let mut routed: Option<RunError> = None;

        while let Some((node_id, input)) = queue.pop_front() {
            if !visited.insert(node_id.clone()) {
                continue;
            }
            if cancel.is_cancelled() {
                fatal = Some(RunError::Cancelled);
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                fatal = Some(self.deadline_error());
                break;
            }
            let Some(node) = workflow.node(&node_id) else {
                continue;
            };

            context.set_current(Some(node_id.clone()));
            debug!(node_id = %node_id, block = %node.block, "executing node");

            let attempt = match resolver::resolve(&node.config, context.results()) {
                Err(error) => Err(RunError::Resolution {
                    node_id: node_id.clone(),
                    error,
                }),
                Ok(config) => {
                    let mut request =
                        BlockRequest::new(node.block.clone(), config, input).with_deadline(deadline);
                    if let Some(ms) = node.timeout_ms {
                        request = request.with_timeout(Duration::from_millis(ms));
                    }
                    self.invoker
                        .invoke(request, &cancel)
                        .await
                        .map_err(|error| RunError::Block {
                            node_id: node_id.clone(),
                            error,
                        })
                }
            };

            let result = match attempt {
                Ok(result) => result,
                Err(RunError::Block {
                    error: BlockError::Cancelled,
                    ..
                }) => {
                    fatal = Some(RunError::Cancelled);
                    break;
                }
                Err(RunError::Block {
                    error: BlockError::Timeout { .. },
                    ..
                }) if deadline.is_some_and(|d| Instant::now() >= d) => {
                    fatal = Some(self.deadline_error());
                    break;
                }
                Err(error) if routes.is_wired(&node_id, ERROR_PORT) => {
                    warn!(node_id = %node_id, error = %error, "node failed, routing to error port");
                    let message = error.to_string();
                    context.record_error(message.clone());
                    routed.get_or_insert(error);
                    NodeResult::new(serde_json::json!({ "error": message }), ERROR_PORT)
                }
                Err(error) => {
                    warn!(node_id = %node_id, error = %error, "node failed");
                    fatal = Some(error);
                    break;
                }
            };

            context.insert(node_id.clone(), result.clone());
            if let Err(e) = self
                .storage
                .save_node_result(context.execution_id(), &node_id, &result)
                .await
            {
                warn!(node_id = %node_id, error = %e, "failed to persist node result");
                warnings.push(e.to_string());
            }

            for successor in routes.successors(&node_id, &result.port) {
                if !visited.contains(successor) {
                    queue.push_back((successor.clone(), result.data.clone()));
                }
            }
        }

        let status = match &fatal {
            None => ExecutionStatus::Completed,
            Some(RunError::Cancelled) => ExecutionStatus::Stopped,
            Some(error) => {
                context.set_error(error.to_string());
                ExecutionStatus::Failed
            }
        };

        if let Err(e) = self
            .storage
            .update_execution_status(
                context.execution_id(),
                status,
                context.error().map(str::to_string),
                Some(context.final_state()),
            )
            .await
        {
            warn!(error = %e, "failed to record execution status");
            warnings.push(e.to_string());
        }
        context.set_status(status);

        info!(
            status = %status,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "execution finished"
        );

        RunOutcome {
            execution_id: context.execution_id(),
            workflow_id: context.workflow_id(),
            status,
            output: context.last_result().map(|(_, r)| r.data.clone()),
            results: context.results().clone(),
            error: fatal.or(routed),
            warnings,
        }
    }

    fn deadline_error(&self) -> RunError {
        RunError::DeadlineExceeded {
            after_ms: self
                .run_timeout
                .map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

//! Runs a trigger's bound workflow when it fires.

use async_trait::async_trait;
use blockflow_workflow::{Engine, EngineError, ExecutionStatus, RunOutcome, Trigger};
use serde_json::{Value as JsonValue, json};

/// Receives trigger events.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    /// Runs the trigger's workflow with `payload` as input and waits for it to finish.
    async fn fire(&self, trigger: &Trigger, payload: JsonValue) -> Result<RunOutcome, EngineError>;
}

/// Trigger runs go through the engine's worker pool like any other run.
#[async_trait]
impl TriggerSink for Engine {
    async fn fire(&self, trigger: &Trigger, payload: JsonValue) -> Result<RunOutcome, EngineError> {
        self.run_stored(trigger.workflow_id, payload, Some(trigger.id))
            .await
    }
}

/// Builds the `data` of a reply: `{executionId, status, output, error}`.
#[must_use]
pub fn reply_data(result: &Result<RunOutcome, EngineError>) -> JsonValue {
    match result {
        Ok(outcome) => json!({
            "executionId": outcome.execution_id.to_string(),
            "status": outcome.status,
            "output": outcome.output,
            "error": outcome.error.as_ref().map(ToString::to_string),
        }),
        Err(e) => {
            let execution_id = match e {
                EngineError::Failed {
                    execution_id: Some(id),
                    ..
                } => Some(id.to_string()),
                _ => None,
            };
            json!({
                "executionId": execution_id,
                "status": ExecutionStatus::Failed,
                "output": JsonValue::Null,
                "error": e.to_string(),
            })
        }
    }
}

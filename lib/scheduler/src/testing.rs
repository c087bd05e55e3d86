//! Shared helpers for scheduler tests.

use crate::config::SupervisorConfig;
use crate::dispatch::TriggerSink;
use async_trait::async_trait;
use blockflow_core::{ExecutionId, TriggerId};
use blockflow_workflow::{EngineError, ExecutionStatus, RunOutcome, Trigger};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Reports ready, then waits for `kill`.
pub const READY_TRIGGER: &str = r#"read -r start
echo '{"type":"status","status":"ready"}'
while read -r line; do
  case "$line" in
    *'"kill"'*) exit 0 ;;
  esac
done"#;

/// Never reports ready.
pub const NEVER_READY_TRIGGER: &str = "read -r start\nexec sleep 5";

/// Writes `<dir>/<name>.sh`, creating parent directories.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(format!("{name}.sh"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create script dir");
    }
    std::fs::write(&path, format!("{body}\n")).expect("write script");
    path
}

/// Runs `<dir>/<type>.sh` through `sh`.
pub fn script_config(dir: &Path) -> SupervisorConfig {
    SupervisorConfig::new(dir)
        .with_interpreter("sh")
        .with_extension("sh")
}

/// Polls until `path` exists and returns its contents.
pub async fn wait_for_file(path: &Path) -> String {
    for _ in 0..100 {
        if let Ok(contents) = std::fs::read_to_string(path) {
            return contents;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} was never written", path.display());
}

/// Sink that records each event and completes immediately, echoing the payload.
#[derive(Clone, Default)]
pub struct RecordingSink {
    fired: Arc<Mutex<Vec<(TriggerId, JsonValue)>>>,
}

impl RecordingSink {
    pub fn fired(&self) -> Vec<(TriggerId, JsonValue)> {
        self.fired.lock().unwrap().clone()
    }
}

#[async_trait]
impl TriggerSink for RecordingSink {
    async fn fire(&self, trigger: &Trigger, payload: JsonValue) -> Result<RunOutcome, EngineError> {
        self.fired
            .lock()
            .unwrap()
            .push((trigger.id, payload.clone()));
        Ok(RunOutcome {
            execution_id: ExecutionId::next(),
            workflow_id: trigger.workflow_id,
            status: ExecutionStatus::Completed,
            results: HashMap::new(),
            output: Some(payload),
            error: None,
            warnings: Vec::new(),
        })
    }
}

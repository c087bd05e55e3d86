//! Loading workflow and trigger definitions into storage at startup.
//!
//! The definitions directory holds `workflows/*.json` (one [`Workflow`] per
//! file) and `triggers/*.json` (one [`Trigger`] per file). Either
//! subdirectory may be absent.

use crate::error::ServerError;
use blockflow_core::Result;
use blockflow_workflow::{Storage, Trigger, Workflow};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Counts of definitions saved by [`seed_storage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub workflows: usize,
    pub triggers: usize,
}

/// Saves every definition under `dir` into `storage`.
///
/// # Errors
///
/// Fails on the first file that cannot be read or parsed, or that storage rejects.
pub async fn seed_storage(storage: &dyn Storage, dir: &Path) -> Result<SeedReport, ServerError> {
    let mut report = SeedReport::default();

    for path in json_files(&dir.join("workflows"))? {
        let workflow: Workflow = read_json(&path)?;
        storage
            .save_workflow(&workflow)
            .await
            .map_err(|e| ServerError::Storage {
                details: e.to_string(),
            })?;
        debug!(workflow_id = %workflow.id, name = %workflow.name, "workflow loaded");
        report.workflows += 1;
    }

    for path in json_files(&dir.join("triggers"))? {
        let trigger: Trigger = read_json(&path)?;
        storage
            .save_trigger(&trigger)
            .await
            .map_err(|e| ServerError::Storage {
                details: e.to_string(),
            })?;
        debug!(trigger_id = %trigger.id, kind = %trigger.kind, "trigger loaded");
        report.triggers += 1;
    }

    info!(
        dir = %dir.display(),
        workflows = report.workflows,
        triggers = report.triggers,
        "definitions loaded"
    );
    Ok(report)
}

/// Reads one workflow definition file.
///
/// # Errors
///
/// Returns `Definition` if the file cannot be read or is not a workflow.
pub fn read_workflow(path: &Path) -> Result<Workflow, ServerError> {
    read_json(path)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ServerError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ServerError::Definition {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?;
    let value = serde_json::from_str(&contents).map_err(|e| ServerError::Definition {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?;
    Ok(value)
}

/// `*.json` files directly under `dir`, sorted by name. A missing directory is empty.
fn json_files(dir: &Path) -> Result<Vec<PathBuf>, ServerError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ServerError::Definition {
                path: dir.to_path_buf(),
                details: e.to_string(),
            }
            .into());
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| ServerError::Definition {
                path: dir.to_path_buf(),
                details: e.to_string(),
            })?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_core::{TriggerId, WorkflowId};
    use blockflow_workflow::MemoryStorage;
    use serde_json::json;

    const WORKFLOW_ID: &str = "01HZX3J5N8Q7W2R4T6Y8A0C2E4";
    const TRIGGER_ID: &str = "01HZX3J5N8Q7W2R4T6Y8A0C2E5";

    fn write(dir: &Path, relative: &str, value: &serde_json::Value) {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, value.to_string()).expect("write");
    }

    #[tokio::test]
    async fn seeds_workflows_and_triggers() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "workflows/greet.json",
            &json!({
                "id": WORKFLOW_ID,
                "name": "greet",
                "nodes": [
                    {"id": "a", "type": "std/delay", "config": {"ms": 10}},
                    {"id": "b", "type": "std/log", "config": {"message": "{{ $node.a.data }}"}}
                ],
                "connections": [{"from": "a", "to": "b"}]
            }),
        );
        write(
            dir.path(),
            "triggers/every-minute.json",
            &json!({
                "id": TRIGGER_ID,
                "type": "std/interval",
                "config": {"every_ms": 60000},
                "workflow_id": WORKFLOW_ID
            }),
        );
        std::fs::write(dir.path().join("workflows/README.md"), "ignored").expect("write");

        let storage = MemoryStorage::new();
        let report = seed_storage(&storage, dir.path()).await.expect("seed");
        assert_eq!(
            report,
            SeedReport {
                workflows: 1,
                triggers: 1
            }
        );

        let workflow_id: WorkflowId = WORKFLOW_ID.parse().expect("id");
        let workflow = storage
            .get_workflow(workflow_id)
            .await
            .expect("get")
            .expect("workflow");
        assert_eq!(workflow.nodes.len(), 2);
        assert_eq!(workflow.connections[0].port, "default");

        let trigger_id: TriggerId = TRIGGER_ID.parse().expect("id");
        let trigger = storage
            .get_trigger(trigger_id)
            .await
            .expect("get")
            .expect("trigger");
        assert!(trigger.enabled);
        assert_eq!(trigger.workflow_id, workflow_id);
    }

    #[tokio::test]
    async fn missing_directories_are_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = seed_storage(&MemoryStorage::new(), dir.path())
            .await
            .expect("seed");
        assert_eq!(report, SeedReport::default());
    }

    #[tokio::test]
    async fn malformed_definition_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "workflows/bad.json", &json!({"name": "bad", "nodes": "not a list"}));

        let err = seed_storage(&MemoryStorage::new(), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }
}

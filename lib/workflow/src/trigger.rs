//! Persisted trigger definitions.
//!
//! A trigger binds a long-running trigger executable (its `kind`) to a
//! workflow. Triggers are stored through `Storage` and survive restarts; the
//! scheduler crate supervises their processes.

use blockflow_core::{TriggerId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A trigger bound to a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Unique identifier for this trigger.
    #[serde(default)]
    pub id: TriggerId,
    /// Trigger type, e.g. `std/interval`. Maps to an executable under the triggers directory.
    #[serde(rename = "type")]
    pub kind: String,
    /// Configuration sent to the process in its `start` message.
    #[serde(default)]
    pub config: JsonValue,
    /// The workflow run on each event.
    pub workflow_id: WorkflowId,
    /// Whether this trigger is started by `load_triggers`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// When this trigger was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// When this trigger was last updated.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Trigger {
    /// Creates an enabled trigger with an empty configuration.
    #[must_use]
    pub fn new(kind: impl Into<String>, workflow_id: WorkflowId) -> Self {
        let now = Utc::now();
        Self {
            id: TriggerId::new(),
            kind: kind.into(),
            config: JsonValue::Object(serde_json::Map::new()),
            workflow_id,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: JsonValue) -> Self {
        self.config = config;
        self
    }

    /// Enables or disables the trigger.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_creation() {
        let workflow_id = WorkflowId::new();
        let trigger = Trigger::new("std/interval", workflow_id).with_config(json!({"ms": 100}));

        assert!(trigger.enabled);
        assert_eq!(trigger.workflow_id, workflow_id);
        assert_eq!(trigger.config["ms"], 100);
    }

    #[test]
    fn disable_updates_timestamp() {
        let mut trigger = Trigger::new("std/interval", WorkflowId::new());
        let created = trigger.updated_at;
        trigger.set_enabled(false);

        assert!(!trigger.enabled);
        assert!(trigger.updated_at >= created);
    }

    #[test]
    fn parses_minimal_json() {
        let workflow_id = WorkflowId::new();
        let trigger: Trigger = serde_json::from_value(json!({
            "type": "std/webhook",
            "workflow_id": workflow_id,
        }))
        .expect("parse");

        assert_eq!(trigger.kind, "std/webhook");
        assert!(trigger.enabled);
        assert_eq!(trigger.config, JsonValue::Null);
    }
}

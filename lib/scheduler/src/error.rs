//! Error types for the scheduler crate.

use crate::process::TriggerState;
use blockflow_core::TriggerId;
use blockflow_workflow::StorageError;
use std::fmt;

/// Errors from supervising trigger processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// No executable exists for the trigger's type.
    UnknownTriggerType { trigger_id: TriggerId, kind: String },
    /// The trigger is disabled.
    Disabled { trigger_id: TriggerId },
    /// A live process already exists for the trigger.
    AlreadyRunning { trigger_id: TriggerId },
    /// No process is tracked for the trigger.
    NotRunning { trigger_id: TriggerId },
    /// The process could not be spawned.
    Spawn { trigger_id: TriggerId, message: String },
    /// The process did not become ready.
    NotReady {
        trigger_id: TriggerId,
        state: TriggerState,
    },
    /// Loading triggers failed.
    Storage(StorageError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTriggerType { trigger_id, kind } => {
                write!(f, "no executable for trigger type '{kind}' ({trigger_id})")
            }
            Self::Disabled { trigger_id } => write!(f, "trigger {trigger_id} is disabled"),
            Self::AlreadyRunning { trigger_id } => {
                write!(f, "trigger {trigger_id} is already running")
            }
            Self::NotRunning { trigger_id } => write!(f, "trigger {trigger_id} is not running"),
            Self::Spawn {
                trigger_id,
                message,
            } => write!(f, "failed to spawn trigger {trigger_id}: {message}"),
            Self::NotReady { trigger_id, state } => {
                write!(f, "trigger {trigger_id} did not become ready: {state}")
            }
            Self::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<StorageError> for SchedulerError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

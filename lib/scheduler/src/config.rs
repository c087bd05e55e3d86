//! Trigger supervision settings.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// How trigger types map to executables and how their processes are supervised.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Directory holding one executable per trigger type.
    #[serde(default = "default_triggers_dir")]
    pub triggers_dir: PathBuf,

    /// Program the trigger path is passed to. Triggers are executed directly when unset.
    #[serde(default)]
    pub interpreter: Option<String>,

    /// File extension appended to the trigger type, without the dot.
    #[serde(default)]
    pub extension: Option<String>,

    /// How long a trigger has to report `ready` before it is marked crashed.
    #[serde(default = "default_ready_grace_ms")]
    pub ready_grace_ms: u64,

    /// How long a trigger has to exit after `kill` before it is force-killed.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_triggers_dir() -> PathBuf {
    PathBuf::from("triggers")
}

fn default_ready_grace_ms() -> u64 {
    5_000
}

fn default_kill_grace_ms() -> u64 {
    3_000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            triggers_dir: default_triggers_dir(),
            interpreter: None,
            extension: None,
            ready_grace_ms: default_ready_grace_ms(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

impl SupervisorConfig {
    #[must_use]
    pub fn new(triggers_dir: impl Into<PathBuf>) -> Self {
        Self {
            triggers_dir: triggers_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    #[must_use]
    pub fn with_ready_grace_ms(mut self, ms: u64) -> Self {
        self.ready_grace_ms = ms;
        self
    }

    #[must_use]
    pub fn with_kill_grace_ms(mut self, ms: u64) -> Self {
        self.kill_grace_ms = ms;
        self
    }

    #[must_use]
    pub fn ready_grace(&self) -> Duration {
        Duration::from_millis(self.ready_grace_ms)
    }

    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

//! Engine and block invoker configuration.
//!
//! Both structs deserialize with defaults for every field so the server can
//! compose them into its own configuration and override only what it needs.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Worker pool and execution control settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of runs executing at once.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// How long `stop` waits for a run to reach a terminal status, in milliseconds.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Overall deadline for a single run, in milliseconds. Unlimited when unset.
    #[serde(default)]
    pub run_timeout_ms: Option<u64>,
}

fn default_pool_capacity() -> usize {
    8
}

fn default_stop_timeout_ms() -> u64 {
    5_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_capacity: default_pool_capacity(),
            stop_timeout_ms: default_stop_timeout_ms(),
            run_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_stop_timeout_ms(mut self, ms: u64) -> Self {
        self.stop_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn with_run_timeout_ms(mut self, ms: u64) -> Self {
        self.run_timeout_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// How block types map to executables and how they are run.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockConfig {
    /// Directory holding one executable per block type.
    #[serde(default = "default_blocks_dir")]
    pub blocks_dir: PathBuf,

    /// Program the block path is passed to, e.g. `node` or `sh`.
    /// Blocks are executed directly when unset.
    #[serde(default)]
    pub interpreter: Option<String>,

    /// File extension appended to the block type, without the dot.
    #[serde(default)]
    pub extension: Option<String>,

    /// Deadline for one invocation when the node sets none, in milliseconds.
    #[serde(default = "default_block_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Maximum number of stderr bytes kept for error reports.
    #[serde(default = "default_stderr_limit")]
    pub stderr_limit: usize,
}

fn default_blocks_dir() -> PathBuf {
    PathBuf::from("blocks")
}

fn default_block_timeout_ms() -> u64 {
    30_000
}

fn default_stderr_limit() -> usize {
    8 * 1024
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            blocks_dir: default_blocks_dir(),
            interpreter: None,
            extension: None,
            default_timeout_ms: default_block_timeout_ms(),
            stderr_limit: default_stderr_limit(),
        }
    }
}

impl BlockConfig {
    /// Creates a config rooted at `blocks_dir` with default settings.
    #[must_use]
    pub fn new(blocks_dir: impl Into<PathBuf>) -> Self {
        Self {
            blocks_dir: blocks_dir.into(),
            ..Self::default()
        }
    }

    /// Runs blocks through `interpreter`.
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Appends `.{extension}` to block paths.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    #[must_use]
    pub fn with_default_timeout_ms(mut self, ms: u64) -> Self {
        self.default_timeout_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_has_correct_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.pool_capacity, 8);
        assert_eq!(config.stop_timeout_ms, 5_000);
        assert_eq!(config.run_timeout_ms, None);
    }

    #[test]
    fn block_config_has_correct_defaults() {
        let config = BlockConfig::default();
        assert_eq!(config.blocks_dir, PathBuf::from("blocks"));
        assert_eq!(config.default_timeout_ms, 30_000);
        assert_eq!(config.stderr_limit, 8192);
        assert!(config.interpreter.is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: BlockConfig =
            serde_json::from_str(r#"{"interpreter": "node", "extension": "js"}"#).expect("parse");
        assert_eq!(config.interpreter.as_deref(), Some("node"));
        assert_eq!(config.extension.as_deref(), Some("js"));
        assert_eq!(config.default_timeout_ms, 30_000);
    }
}

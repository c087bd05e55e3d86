//! Centralized server configuration.
//!
//! This module composes the library configs into one strongly-typed
//! `ServerConfig`, loaded via the `config` crate from an optional
//! `blockflow.toml` and `BLOCKFLOW__`-prefixed environment variables, e.g.
//! `BLOCKFLOW__ENGINE__POOL_CAPACITY=16`.

use blockflow_scheduler::SupervisorConfig;
use blockflow_workflow::{BlockConfig, EngineConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Server configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Worker pool and execution control.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Block executables.
    #[serde(default)]
    pub blocks: BlockConfig,

    /// Trigger executables and supervision.
    #[serde(default)]
    pub triggers: SupervisorConfig,

    /// Directory with `workflows/*.json` and `triggers/*.json` loaded at startup.
    #[serde(default = "default_definitions_dir")]
    pub definitions_dir: PathBuf,
}

fn default_definitions_dir() -> PathBuf {
    PathBuf::from("definitions")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            blocks: BlockConfig::default(),
            triggers: SupervisorConfig::default(),
            definitions_dir: default_definitions_dir(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `path` (or `./blockflow.toml` if present) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        Self::load_with(path, environment())
    }

    fn load_with(
        path: Option<&Path>,
        environment: config::Environment,
    ) -> Result<Self, config::ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path),
            None => config::File::with_name("blockflow").required(false),
        };
        config::Config::builder()
            .add_source(file)
            .add_source(environment)
            .build()?
            .try_deserialize()
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("BLOCKFLOW")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

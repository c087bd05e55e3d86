//! The `serve` and `run` commands.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::seed::{read_workflow, seed_storage};
use blockflow_core::Result;
use blockflow_scheduler::TriggerManager;
use blockflow_workflow::{Engine, MemoryStorage, ProcessInvoker, RunOutcome, Storage};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Builds an engine running blocks as configured.
#[must_use]
pub fn build_engine(config: &ServerConfig, storage: Arc<dyn Storage>) -> Engine {
    let invoker = ProcessInvoker::new(config.blocks.clone());
    Engine::new(&config.engine, storage, Arc::new(invoker))
}

/// Parses `--input`, defaulting to an empty object.
///
/// # Errors
///
/// Returns `InvalidInput` if the text is not JSON.
pub fn parse_input(input: Option<&str>) -> Result<JsonValue, ServerError> {
    match input {
        None => Ok(JsonValue::Object(serde_json::Map::new())),
        Some(text) => Ok(
            serde_json::from_str(text).map_err(|e| ServerError::InvalidInput {
                details: e.to_string(),
            })?,
        ),
    }
}

/// Seeds storage, starts triggers and waits for Ctrl-C.
///
/// # Errors
///
/// Fails if definitions cannot be loaded or the signal handler fails.
pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    let storage = MemoryStorage::new();
    seed_storage(&storage, &config.definitions_dir).await?;

    let storage: Arc<dyn Storage> = Arc::new(storage);
    let engine = build_engine(&config, Arc::clone(&storage));
    let triggers = TriggerManager::new(
        config.triggers.clone(),
        Arc::clone(&storage),
        Arc::new(engine.clone()),
    );

    let report = triggers
        .load_triggers()
        .await
        .map_err(|e| ServerError::Triggers {
            details: e.to_string(),
        })?;
    info!(
        active = report.active.len(),
        crashed = report.crashed.len(),
        pool_capacity = engine.pool_stats().capacity,
        "blockflow running"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| ServerError::Signal {
            details: e.to_string(),
        })?;

    info!("shutting down");
    triggers.stop_all().await;
    engine.shutdown().await;
    Ok(())
}

/// Runs one workflow file to completion.
///
/// Returns the outcome whatever its status.
///
/// # Errors
///
/// Fails if the file is not a workflow or the run could not be admitted.
pub async fn run_file(
    config: &ServerConfig,
    path: &Path,
    input: JsonValue,
) -> Result<RunOutcome, ServerError> {
    let workflow = read_workflow(path)?;
    let storage = MemoryStorage::new();
    storage
        .save_workflow(&workflow)
        .await
        .map_err(|e| ServerError::Storage {
            details: e.to_string(),
        })?;

    let engine = build_engine(config, Arc::new(storage));
    let outcome = engine
        .run(Arc::new(workflow), input)
        .await
        .map_err(|e| ServerError::Run {
            details: e.to_string(),
        })?;
    Ok(outcome)
}

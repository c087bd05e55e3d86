//! Trigger manager: at most one supervised process per trigger.

use crate::config::SupervisorConfig;
use crate::dispatch::TriggerSink;
use crate::error::SchedulerError;
use crate::process::{TriggerProcess, TriggerState, settled};
use blockflow_core::TriggerId;
use blockflow_workflow::{Storage, Trigger, executable_path};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Result of [`TriggerManager::load_triggers`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Triggers that reported ready.
    pub active: Vec<TriggerId>,
    /// Triggers that failed to spawn or become ready.
    pub crashed: Vec<TriggerId>,
    /// Disabled triggers, not started.
    pub disabled: Vec<TriggerId>,
}

/// Starts, tracks and stops trigger processes.
///
/// Crashed processes stay tracked so their state can be queried; they are
/// replaced by the next `start` of the same trigger.
#[derive(Clone)]
pub struct TriggerManager {
    config: SupervisorConfig,
    storage: Arc<dyn Storage>,
    sink: Arc<dyn TriggerSink>,
    processes: Arc<Mutex<HashMap<TriggerId, TriggerProcess>>>,
}

impl TriggerManager {
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        storage: Arc<dyn Storage>,
        sink: Arc<dyn TriggerSink>,
    ) -> Self {
        Self {
            config,
            storage,
            sink,
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts every enabled persisted trigger concurrently.
    ///
    /// Triggers that are already running and ready count as active.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the triggers cannot be listed. Individual start
    /// failures are reported in the `crashed` set.
    pub async fn load_triggers(&self) -> Result<LoadReport, SchedulerError> {
        let triggers = self.storage.list_triggers().await?;
        let (enabled, disabled): (Vec<Trigger>, Vec<Trigger>) =
            triggers.into_iter().partition(|t| t.enabled);

        let mut report = LoadReport {
            disabled: disabled.iter().map(|t| t.id).collect(),
            ..LoadReport::default()
        };

        let starts = enabled.into_iter().map(|trigger| {
            let trigger_id = trigger.id;
            async move { (trigger_id, self.start(trigger).await) }
        });
        for (trigger_id, result) in join_all(starts).await {
            let already_ready = matches!(result, Err(SchedulerError::AlreadyRunning { .. }))
                && self.state(trigger_id).await == Some(TriggerState::Ready);
            match result {
                Ok(_) => report.active.push(trigger_id),
                Err(_) if already_ready => report.active.push(trigger_id),
                Err(e) => {
                    warn!(trigger_id = %trigger_id, error = %e, "trigger failed to start");
                    report.crashed.push(trigger_id);
                }
            }
        }

        info!(
            active = report.active.len(),
            crashed = report.crashed.len(),
            disabled = report.disabled.len(),
            "triggers loaded"
        );
        Ok(report)
    }

    /// Spawns a trigger's process and waits until it is ready.
    ///
    /// Also used to restart a crashed or stopped trigger.
    ///
    /// # Errors
    ///
    /// - `Disabled` for a disabled trigger
    /// - `UnknownTriggerType` if no executable exists for its type
    /// - `AlreadyRunning` if a live process exists for its id
    /// - `Spawn` if the process cannot be started
    /// - `NotReady` if it crashed or did not report ready in time
    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id, kind = %trigger.kind))]
    pub async fn start(&self, trigger: Trigger) -> Result<TriggerState, SchedulerError> {
        let trigger_id = trigger.id;
        if !trigger.enabled {
            return Err(SchedulerError::Disabled { trigger_id });
        }
        let program =
            self.program(&trigger.kind)
                .ok_or_else(|| SchedulerError::UnknownTriggerType {
                    trigger_id,
                    kind: trigger.kind.clone(),
                })?;

        let state = {
            let mut processes = self.processes.lock().await;
            if processes
                .get(&trigger_id)
                .is_some_and(|p| p.state().is_live())
            {
                return Err(SchedulerError::AlreadyRunning { trigger_id });
            }
            let process =
                TriggerProcess::spawn(trigger, &program, &self.config, Arc::clone(&self.sink))?;
            let state = process.subscribe();
            processes.insert(trigger_id, process);
            state
        };

        match settled(state).await {
            TriggerState::Ready => {
                info!("trigger started");
                Ok(TriggerState::Ready)
            }
            state => Err(SchedulerError::NotReady { trigger_id, state }),
        }
    }

    /// Stops a trigger's process and forgets it.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` if no process is tracked for the id.
    pub async fn stop(&self, trigger_id: TriggerId) -> Result<TriggerState, SchedulerError> {
        let process = self
            .processes
            .lock()
            .await
            .remove(&trigger_id)
            .ok_or(SchedulerError::NotRunning { trigger_id })?;
        Ok(process.stop().await)
    }

    /// Stops every tracked process concurrently and returns their final states.
    pub async fn stop_all(&self) -> Vec<(TriggerId, TriggerState)> {
        let processes: Vec<TriggerProcess> = self
            .processes
            .lock()
            .await
            .drain()
            .map(|(_, process)| process)
            .collect();
        info!(count = processes.len(), "stopping all triggers");

        let stops = processes.into_iter().map(|process| async move {
            let trigger_id = process.trigger_id();
            (trigger_id, process.stop().await)
        });
        let mut stopped = join_all(stops).await;
        stopped.sort_by_key(|(id, _)| *id);
        stopped
    }

    /// Ids of triggers that are ready, in id order.
    pub async fn active(&self) -> Vec<TriggerId> {
        let mut ids: Vec<TriggerId> = self
            .processes
            .lock()
            .await
            .values()
            .filter(|p| p.state() == TriggerState::Ready)
            .map(TriggerProcess::trigger_id)
            .collect();
        ids.sort();
        ids
    }

    /// State of a tracked trigger.
    pub async fn state(&self, trigger_id: TriggerId) -> Option<TriggerState> {
        self.processes
            .lock()
            .await
            .get(&trigger_id)
            .map(TriggerProcess::state)
    }

    fn program(&self, kind: &str) -> Option<PathBuf> {
        executable_path(
            &self.config.triggers_dir,
            kind,
            self.config.extension.as_deref(),
        )
        .filter(|p| p.is_file())
    }
}

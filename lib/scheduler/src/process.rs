//! A supervised trigger process.
//!
//! Each trigger runs as a long-lived child process owned by a dedicated
//! supervisor task. The task is the only writer to the child's stdin and the
//! only reader of its stdout; everyone else talks to it through a command
//! channel and observes it through a `watch` channel of [`TriggerState`].
//!
//! Events are handed to the [`TriggerSink`] on their own tasks so a long run
//! never blocks the protocol. Their results come back to the supervisor over
//! an internal channel keyed by the event's request id.

use crate::config::SupervisorConfig;
use crate::dispatch::{TriggerSink, reply_data};
use crate::error::SchedulerError;
use crate::protocol::{InboundMessage, OutboundMessage, ReadyStatus};
use blockflow_core::TriggerId;
use blockflow_workflow::Trigger;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::ops::ControlFlow;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of a trigger process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// Spawned, waiting for `ready`.
    Starting,
    /// Ready; events fire workflows.
    Ready,
    /// Shut down on request.
    Stopped,
    /// Failed to start, reported a fatal error, or exited on its own.
    Crashed,
}

impl TriggerState {
    /// Whether a process is (still) running for this state.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
enum SupervisorCommand {
    Kill,
}

/// Handle to a running trigger process and its supervisor task.
#[derive(Debug)]
pub struct TriggerProcess {
    trigger_id: TriggerId,
    commands: mpsc::Sender<SupervisorCommand>,
    state: watch::Receiver<TriggerState>,
    task: JoinHandle<()>,
}

impl TriggerProcess {
    /// Spawns `program` for `trigger` and starts supervising it.
    ///
    /// The process starts in [`TriggerState::Starting`]. Dropping the handle
    /// shuts the process down.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if the process cannot be started.
    pub fn spawn(
        trigger: Trigger,
        program: &Path,
        config: &SupervisorConfig,
        sink: Arc<dyn TriggerSink>,
    ) -> Result<Self, SchedulerError> {
        let trigger_id = trigger.id;
        let mut command = match &config.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(program);
                command
            }
            None => Command::new(program),
        };
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| SchedulerError::Spawn {
            trigger_id,
            message: e.to_string(),
        })?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(SchedulerError::Spawn {
                trigger_id,
                message: "stdio was not captured".to_string(),
            });
        };
        debug!(trigger_id = %trigger_id, pid = ?child.id(), "trigger process spawned");

        tokio::spawn(forward_stderr(trigger_id, stderr));

        let (commands, command_rx) = mpsc::channel(8);
        let (state_tx, state) = watch::channel(TriggerState::Starting);
        let supervisor = Supervisor {
            trigger,
            child,
            stdin: Some(stdin),
            sink,
            state: state_tx,
            ready_grace: config.ready_grace(),
            kill_grace: config.kill_grace(),
        };
        let task = tokio::spawn(supervisor.run(stdout, command_rx));

        Ok(Self {
            trigger_id,
            commands,
            state,
            task,
        })
    }

    #[must_use]
    pub fn trigger_id(&self) -> TriggerId {
        self.trigger_id
    }

    #[must_use]
    pub fn state(&self) -> TriggerState {
        *self.state.borrow()
    }

    /// A receiver for state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TriggerState> {
        self.state.clone()
    }

    /// Asks the process to shut down and waits for the supervisor to finish.
    ///
    /// Returns the final state: `Stopped`, or `Crashed` if the process had
    /// already failed.
    pub async fn stop(self) -> TriggerState {
        if self.commands.send(SupervisorCommand::Kill).await.is_err() {
            debug!(trigger_id = %self.trigger_id, "supervisor already finished");
        }
        if let Err(e) = self.task.await {
            warn!(trigger_id = %self.trigger_id, error = %e, "trigger supervisor panicked");
            return TriggerState::Crashed;
        }
        *self.state.borrow()
    }
}

/// Waits until a trigger leaves `Starting` and returns the state it settled in.
pub async fn settled(mut state: watch::Receiver<TriggerState>) -> TriggerState {
    let seen = state
        .wait_for(|s| *s != TriggerState::Starting)
        .await
        .map(|s| *s);
    match seen {
        Ok(s) => s,
        // Supervisor gone without leaving `Starting`.
        Err(_) => TriggerState::Crashed,
    }
}

struct Supervisor {
    trigger: Trigger,
    child: Child,
    stdin: Option<ChildStdin>,
    sink: Arc<dyn TriggerSink>,
    state: watch::Sender<TriggerState>,
    ready_grace: Duration,
    kill_grace: Duration,
}

type Reply = (JsonValue, JsonValue);

impl Supervisor {
    #[instrument(
        skip_all,
        fields(trigger_id = %self.trigger.id, kind = %self.trigger.kind)
    )]
    async fn run(
        mut self,
        stdout: ChildStdout,
        mut commands: mpsc::Receiver<SupervisorCommand>,
    ) {
        let start = OutboundMessage::Start {
            config: self.trigger.config.clone(),
        };
        if let Err(e) = self.send(&start).await {
            warn!(error = %e, "failed to send start message");
            self.crash().await;
            return;
        }

        let mut lines = BufReader::new(stdout).lines();
        let (reply_tx, mut replies) = mpsc::unbounded_channel::<Reply>();
        let ready_timer = tokio::time::sleep(self.ready_grace);
        tokio::pin!(ready_timer);

        loop {
            let starting = self.current() == TriggerState::Starting;
            tokio::select! {
                command = commands.recv() => {
                    // A dropped handle means nobody can stop us later.
                    match command {
                        Some(SupervisorCommand::Kill) | None => self.shutdown().await,
                    }
                    return;
                }
                Some((request_id, data)) = replies.recv() => {
                    let reply = OutboundMessage::Reply { request_id, data };
                    if let Err(e) = self.send(&reply).await {
                        warn!(error = %e, "failed to send reply");
                    }
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if self.handle_line(&line, &reply_tx).await.is_break() {
                            return;
                        }
                    }
                    Ok(None) => {
                        self.exited().await;
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read trigger output");
                        self.crash().await;
                        return;
                    }
                },
                () = &mut ready_timer, if starting => {
                    warn!(
                        grace_ms = u64::try_from(self.ready_grace.as_millis()).unwrap_or(u64::MAX),
                        "trigger did not become ready in time"
                    );
                    self.crash().await;
                    return;
                }
            }
        }
    }

    async fn handle_line(
        &mut self,
        line: &str,
        replies: &mpsc::UnboundedSender<Reply>,
    ) -> ControlFlow<()> {
        if line.trim().is_empty() {
            return ControlFlow::Continue(());
        }
        let message = match InboundMessage::parse(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, line, "ignoring unrecognized trigger output");
                return ControlFlow::Continue(());
            }
        };

        match message {
            InboundMessage::Status {
                status: ReadyStatus::Ready,
                ..
            } => {
                if self.current() == TriggerState::Starting {
                    self.state.send_replace(TriggerState::Ready);
                    info!("trigger ready");
                }
                ControlFlow::Continue(())
            }
            InboundMessage::Status {
                status: ReadyStatus::Error,
                message,
            } => {
                error!(
                    reason = message.as_deref().unwrap_or_default(),
                    "trigger failed to initialize"
                );
                self.crash().await;
                ControlFlow::Break(())
            }
            InboundMessage::Error { message, stack } => {
                error!(
                    error = %message,
                    stack = stack.as_deref().unwrap_or_default(),
                    "trigger reported a fatal error"
                );
                self.crash().await;
                ControlFlow::Break(())
            }
            InboundMessage::Event {
                request_id,
                payload,
            } => {
                if self.current() != TriggerState::Ready {
                    warn!(request_id = %request_id, "ignoring event from trigger that is not ready");
                    return ControlFlow::Continue(());
                }
                debug!(request_id = %request_id, "trigger fired");
                self.dispatch(request_id, payload, replies.clone());
                ControlFlow::Continue(())
            }
        }
    }

    fn dispatch(
        &self,
        request_id: JsonValue,
        payload: JsonValue,
        replies: mpsc::UnboundedSender<Reply>,
    ) {
        let sink = Arc::clone(&self.sink);
        let trigger = self.trigger.clone();
        tokio::spawn(async move {
            let result = sink.fire(&trigger, payload).await;
            if let Err(e) = &result {
                warn!(trigger_id = %trigger.id, error = %e, "triggered run did not complete");
            }
            if replies.send((request_id, reply_data(&result))).is_err() {
                debug!(trigger_id = %trigger.id, "trigger stopped before the reply was ready");
            }
        });
    }

    fn current(&self) -> TriggerState {
        *self.state.borrow()
    }

    async fn send(&mut self, message: &OutboundMessage) -> std::io::Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(std::io::ErrorKind::BrokenPipe.into());
        };
        let line = message.to_line().map_err(std::io::Error::other)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    async fn crash(&mut self) {
        self.stdin = None;
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to kill trigger process");
        }
        self.state.send_replace(TriggerState::Crashed);
    }

    /// Stdout closed without a kill request.
    async fn exited(&mut self) {
        self.stdin = None;
        match tokio::time::timeout(self.kill_grace, self.child.wait()).await {
            Ok(Ok(status)) => warn!(code = ?status.code(), "trigger process exited unexpectedly"),
            Ok(Err(e)) => warn!(error = %e, "failed to wait for trigger process"),
            Err(_) => {
                warn!("trigger closed its output but kept running");
                if let Err(e) = self.child.kill().await {
                    warn!(error = %e, "failed to kill trigger process");
                }
            }
        }
        self.state.send_replace(TriggerState::Crashed);
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.send(&OutboundMessage::Kill).await {
            debug!(error = %e, "failed to send kill message");
        }
        self.stdin = None;

        match tokio::time::timeout(self.kill_grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!(code = ?status.code(), "trigger process exited"),
            Ok(Err(e)) => warn!(error = %e, "failed to wait for trigger process"),
            Err(_) => {
                warn!("trigger ignored kill, terminating");
                if let Err(e) = self.child.kill().await {
                    warn!(error = %e, "failed to kill trigger process");
                }
            }
        }

        if self.current().is_live() {
            self.state.send_replace(TriggerState::Stopped);
        }
        info!(state = %self.current(), "trigger stopped");
    }
}

async fn forward_stderr(trigger_id: TriggerId, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(trigger_id = %trigger_id, line = %line, "trigger stderr");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, script_config, write_script};
    use blockflow_core::WorkflowId;
    use serde_json::json;
    use std::path::PathBuf;

    fn program(dir: &Path, name: &str, body: &str) -> PathBuf {
        write_script(dir, name, body)
    }

    fn trigger(kind: &str) -> Trigger {
        Trigger::new(kind, WorkflowId::new()).with_config(json!({"every_ms": 10}))
    }

    #[tokio::test]
    async fn reports_ready_and_stops_on_kill() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = program(dir.path(), "ready", crate::testing::READY_TRIGGER);
        let process = TriggerProcess::spawn(
            trigger("ready"),
            &path,
            &script_config(dir.path()),
            Arc::new(RecordingSink::default()),
        )
        .expect("spawn");

        assert_eq!(settled(process.subscribe()).await, TriggerState::Ready);
        assert_eq!(process.stop().await, TriggerState::Stopped);
    }

    #[tokio::test]
    async fn start_message_carries_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let captured = dir.path().join("start.json");
        let body = format!(
            r#"read -r start
printf '%s\n' "$start" > '{}'
echo '{{"type":"status","status":"ready"}}'
while read -r line; do
  case "$line" in
    *'"kill"'*) exit 0 ;;
  esac
done"#,
            captured.display()
        );
        let path = program(dir.path(), "capture", &body);
        let process = TriggerProcess::spawn(
            trigger("capture"),
            &path,
            &script_config(dir.path()),
            Arc::new(RecordingSink::default()),
        )
        .expect("spawn");

        assert_eq!(settled(process.subscribe()).await, TriggerState::Ready);
        let start: JsonValue =
            serde_json::from_str(&std::fs::read_to_string(&captured).expect("read")).expect("json");
        assert_eq!(start, json!({"type": "start", "config": {"every_ms": 10}}));
        process.stop().await;
    }

    #[tokio::test]
    async fn status_error_marks_crashed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = program(
            dir.path(),
            "broken",
            r#"read -r start
echo '{"type":"status","status":"error","message":"bad config"}'
read -r line"#,
        );
        let process = TriggerProcess::spawn(
            trigger("broken"),
            &path,
            &script_config(dir.path()),
            Arc::new(RecordingSink::default()),
        )
        .expect("spawn");

        assert_eq!(settled(process.subscribe()).await, TriggerState::Crashed);
        assert_eq!(process.stop().await, TriggerState::Crashed);
    }

    #[tokio::test]
    async fn never_ready_is_crashed_after_grace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = program(dir.path(), "silent", crate::testing::NEVER_READY_TRIGGER);
        let config = script_config(dir.path()).with_ready_grace_ms(150);
        let process = TriggerProcess::spawn(
            trigger("silent"),
            &path,
            &config,
            Arc::new(RecordingSink::default()),
        )
        .expect("spawn");

        assert_eq!(settled(process.subscribe()).await, TriggerState::Crashed);
    }

    #[tokio::test]
    async fn unexpected_exit_marks_crashed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = program(
            dir.path(),
            "flaky",
            r#"read -r start
echo '{"type":"status","status":"ready"}'
sleep 0.1
exit 0"#,
        );
        let process = TriggerProcess::spawn(
            trigger("flaky"),
            &path,
            &script_config(dir.path()),
            Arc::new(RecordingSink::default()),
        )
        .expect("spawn");

        assert_eq!(settled(process.subscribe()).await, TriggerState::Ready);
        let mut state = process.subscribe();
        let crashed = tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == TriggerState::Crashed),
        )
        .await;
        assert!(crashed.is_ok());
    }

    #[tokio::test]
    async fn kill_is_forced_after_grace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = program(
            dir.path(),
            "stubborn",
            r#"read -r start
echo '{"type":"status","status":"ready"}'
exec sleep 30"#,
        );
        let config = script_config(dir.path()).with_kill_grace_ms(100);
        let process = TriggerProcess::spawn(
            trigger("stubborn"),
            &path,
            &config,
            Arc::new(RecordingSink::default()),
        )
        .expect("spawn");
        assert_eq!(settled(process.subscribe()).await, TriggerState::Ready);

        let stopped = tokio::time::timeout(Duration::from_secs(5), process.stop()).await;
        assert_eq!(stopped, Ok(TriggerState::Stopped));
    }

    #[tokio::test]
    async fn events_fire_sink_and_reply() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("reply.json");
        let body = format!(
            r#"read -r start
echo '{{"type":"event","requestId":"early","payload":{{}}}}'
echo '{{"type":"status","status":"ready"}}'
echo '{{"type":"event","requestId":"r1","payload":{{"n":1}}}}'
while read -r line; do
  case "$line" in
    *'"reply"'*) printf '%s\n' "$line" > '{out}.tmp' && mv '{out}.tmp' '{out}' ;;
    *'"kill"'*) exit 0 ;;
  esac
done"#,
            out = out.display()
        );
        let path = program(dir.path(), "hook", &body);
        let sink = RecordingSink::default();
        let trigger = trigger("hook");
        let process = TriggerProcess::spawn(
            trigger.clone(),
            &path,
            &script_config(dir.path()),
            Arc::new(sink.clone()),
        )
        .expect("spawn");

        let reply = crate::testing::wait_for_file(&out).await;
        let reply: JsonValue = serde_json::from_str(&reply).expect("json");
        assert_eq!(reply["type"], "reply");
        assert_eq!(reply["requestId"], "r1");
        assert_eq!(reply["data"]["status"], "completed");
        assert_eq!(reply["data"]["output"], json!({"n": 1}));
        assert_eq!(reply["data"]["error"], JsonValue::Null);

        assert_eq!(sink.fired(), vec![(trigger.id, json!({"n": 1}))]);
        assert_eq!(process.stop().await, TriggerState::Stopped);
    }

    #[test]
    fn state_display() {
        assert_eq!(TriggerState::Crashed.to_string(), "crashed");
        assert!(TriggerState::Starting.is_live());
        assert!(!TriggerState::Stopped.is_live());
    }
}

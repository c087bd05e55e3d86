//! Block invocation over standard streams.
//!
//! Every invocation spawns a fresh process for the block type. The request
//! `{"config": …, "input": …}` is written to stdin as one JSON line and stdin
//! is closed. The block must exit 0 after printing exactly one JSON object
//! `{"data": …, "port": …}` to stdout; `port` defaults to `"default"`.
//!
//! stdout and stderr are drained concurrently with the stdin write so a
//! chatty block cannot deadlock on a full pipe. Deadline expiry or
//! cancellation kills the child.

use crate::config::BlockConfig;
use crate::error::BlockError;
use crate::execution::NodeResult;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// One block invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRequest {
    /// Block type.
    pub block: String,
    /// Resolved node configuration.
    pub config: JsonValue,
    /// Data from the predecessor, or the run input for start nodes.
    pub input: JsonValue,
    /// Deadline for this invocation. The invoker default applies when unset.
    pub timeout: Option<Duration>,
    /// Absolute cap from the run's overall deadline.
    pub deadline: Option<Instant>,
}

impl BlockRequest {
    #[must_use]
    pub fn new(block: impl Into<String>, config: JsonValue, input: JsonValue) -> Self {
        Self {
            block: block.into(),
            config,
            input,
            timeout: None,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// The effective deadline: the smaller of `timeout` (or `default`) and the
    /// time left before `deadline`.
    #[must_use]
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        let timeout = self.timeout.unwrap_or(default);
        match self.deadline {
            Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => timeout,
        }
    }
}

/// Executes blocks.
///
/// This abstraction allows the runner to be tested without spawning
/// processes while the engine uses [`ProcessInvoker`] in production.
#[async_trait]
pub trait BlockInvoker: Send + Sync {
    /// Returns true if `block` names an executable this invoker can run.
    fn has_block(&self, block: &str) -> bool;

    /// Runs one block to completion.
    async fn invoke(
        &self,
        request: BlockRequest,
        cancel: &CancellationToken,
    ) -> Result<NodeResult, BlockError>;
}

/// Runs each block as a subprocess under the configured blocks directory.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    config: BlockConfig,
}

impl ProcessInvoker {
    #[must_use]
    pub fn new(config: BlockConfig) -> Self {
        Self { config }
    }

    /// Maps a block type to `<blocks_dir>/<type>[.<extension>]`.
    ///
    /// Returns `None` for types that would escape the blocks directory.
    #[must_use]
    pub fn block_path(&self, block: &str) -> Option<PathBuf> {
        executable_path(
            &self.config.blocks_dir,
            block,
            self.config.extension.as_deref(),
        )
    }

    fn command(&self, path: &Path) -> Command {
        let mut command = match &self.config.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(path);
                command
            }
            None => Command::new(path),
        };
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// Maps a block or trigger type to an executable path under `root`.
///
/// Types are relative paths such as `std/delay`; anything absolute or
/// containing `..` is rejected.
#[must_use]
pub fn executable_path(root: &Path, kind: &str, extension: Option<&str>) -> Option<PathBuf> {
    let relative = Path::new(kind);
    let well_formed = !kind.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !well_formed {
        return None;
    }

    let mut path = root.join(relative);
    if let Some(extension) = extension {
        let mut file = path.file_name()?.to_os_string();
        file.push(".");
        file.push(extension);
        path.set_file_name(file);
    }
    Some(path)
}

#[async_trait]
impl BlockInvoker for ProcessInvoker {
    fn has_block(&self, block: &str) -> bool {
        self.block_path(block).is_some_and(|p| p.is_file())
    }

    #[instrument(skip(self, request, cancel), fields(block = %request.block))]
    async fn invoke(
        &self,
        request: BlockRequest,
        cancel: &CancellationToken,
    ) -> Result<NodeResult, BlockError> {
        let path = self.block_path(&request.block).ok_or_else(|| BlockError::Spawn {
            block: request.block.clone(),
            message: "invalid block type".to_string(),
        })?;

        let timeout =
            request.effective_timeout(Duration::from_millis(self.config.default_timeout_ms));
        let payload = request_payload(&request)?;

        let started = Instant::now();
        let mut child = self.command(&path).spawn().map_err(|e| BlockError::Spawn {
            block: request.block.clone(),
            message: e.to_string(),
        })?;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(BlockError::Cancelled),
            () = tokio::time::sleep(timeout) => Err(BlockError::Timeout {
                after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            exchanged = exchange(&mut child, payload) => Ok(exchanged),
        };

        let exchanged = match outcome {
            Ok(exchanged) => exchanged?,
            Err(e) => {
                if let Err(kill_err) = child.kill().await {
                    warn!(error = %kill_err, "failed to kill block process");
                }
                debug!(error = %e, "block invocation interrupted");
                return Err(e);
            }
        };

        let stderr = truncate_lossy(&exchanged.stderr, self.config.stderr_limit);
        debug!(
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            status = ?exchanged.status.code(),
            "block exited"
        );

        if !exchanged.status.success() {
            return Err(BlockError::NonZeroExit {
                code: exchanged.status.code(),
                stderr,
            });
        }

        parse_response(&exchanged.stdout, stderr)
    }
}

struct Exchanged {
    status: std::process::ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn request_payload(request: &BlockRequest) -> Result<Vec<u8>, BlockError> {
    let mut payload = serde_json::to_vec(&serde_json::json!({
        "config": request.config,
        "input": request.input,
    }))
    .map_err(|e| BlockError::Io {
        message: format!("failed to encode request: {e}"),
    })?;
    payload.push(b'\n');
    Ok(payload)
}

async fn exchange(child: &mut Child, payload: Vec<u8>) -> Result<Exchanged, BlockError> {
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let write = async move {
        let Some(mut stdin) = stdin else {
            return Ok(());
        };
        match stdin.write_all(&payload).await {
            // A block that ignores its input may exit before reading it.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
        // stdin dropped here, closing the pipe
    };

    let (written, stdout, stderr) = tokio::join!(write, read_all(stdout), read_all(stderr));
    written.map_err(|e| BlockError::Io {
        message: format!("failed to write request: {e}"),
    })?;
    let stdout = stdout.map_err(|e| BlockError::Io {
        message: format!("failed to read stdout: {e}"),
    })?;
    let stderr = stderr.map_err(|e| BlockError::Io {
        message: format!("failed to read stderr: {e}"),
    })?;

    let status = child.wait().await.map_err(|e| BlockError::Io {
        message: format!("failed to wait for block: {e}"),
    })?;

    Ok(Exchanged {
        status,
        stdout,
        stderr,
    })
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut data).await?;
    }
    Ok(data)
}

fn parse_response(stdout: &[u8], stderr: String) -> Result<NodeResult, BlockError> {
    let mut values = serde_json::Deserializer::from_slice(stdout).into_iter::<JsonValue>();

    let first = match values.next() {
        None => return Err(BlockError::MissingResponse { stderr }),
        Some(Err(e)) => {
            return Err(BlockError::MalformedResponse {
                reason: e.to_string(),
                stderr,
            });
        }
        Some(Ok(value)) => value,
    };

    if values.next().is_some() {
        return Err(BlockError::MalformedResponse {
            reason: "expected exactly one JSON value on stdout".to_string(),
            stderr,
        });
    }

    if !first.is_object() {
        return Err(BlockError::MalformedResponse {
            reason: "response is not a JSON object".to_string(),
            stderr,
        });
    }

    serde_json::from_value(first).map_err(|e| BlockError::MalformedResponse {
        reason: e.to_string(),
        stderr,
    })
}

/// Lossily decodes `bytes`, keeping at most `limit` bytes on a char boundary.
fn truncate_lossy(bytes: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_end();
    if trimmed.len() <= limit {
        return trimmed.to_string();
    }
    let mut end = limit;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [truncated]", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{script_invoker, write_script};
    use serde_json::json;

    #[test]
    fn block_path_mapping() {
        let invoker = ProcessInvoker::new(BlockConfig::new("/opt/blocks").with_extension("js"));
        assert_eq!(
            invoker.block_path("std/delay"),
            Some(PathBuf::from("/opt/blocks/std/delay.js"))
        );

        let bare = ProcessInvoker::new(BlockConfig::new("/opt/blocks"));
        assert_eq!(
            bare.block_path("http"),
            Some(PathBuf::from("/opt/blocks/http"))
        );
    }

    #[test]
    fn block_path_rejects_escapes() {
        let invoker = ProcessInvoker::new(BlockConfig::new("/opt/blocks"));
        assert_eq!(invoker.block_path("../bin/sh"), None);
        assert_eq!(invoker.block_path("/bin/sh"), None);
        assert_eq!(invoker.block_path(""), None);
    }

    #[test]
    fn run_deadline_caps_node_timeout() {
        let request = BlockRequest::new("x", JsonValue::Null, JsonValue::Null)
            .with_timeout(Duration::from_secs(60))
            .with_deadline(Some(Instant::now() + Duration::from_millis(200)));
        assert!(request.effective_timeout(Duration::from_secs(30)) <= Duration::from_millis(200));

        let unbounded = BlockRequest::new("x", JsonValue::Null, JsonValue::Null);
        assert_eq!(
            unbounded.effective_timeout(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn has_block_checks_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "std/echo", "cat");
        let invoker = script_invoker(dir.path());

        assert!(invoker.has_block("std/echo"));
        assert!(!invoker.has_block("std/missing"));
    }

    #[test]
    fn truncates_on_char_boundary() {
        let text = "héllo".as_bytes();
        let truncated = truncate_lossy(text, 2);
        assert!(truncated.starts_with('h'));
        assert!(truncated.ends_with("[truncated]"));
        assert_eq!(truncate_lossy(b"short\n", 100), "short");
    }

    #[tokio::test]
    async fn echoes_request_through_stdin() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(
            dir.path(),
            "echo",
            r#"read payload; printf '{"data": %s, "port": "out"}' "$payload""#,
        );
        let invoker = script_invoker(dir.path());

        let result = invoker
            .invoke(
                BlockRequest::new("echo", json!({"k": "v"}), json!([1, 2])),
                &CancellationToken::new(),
            )
            .await
            .expect("invoke");

        assert_eq!(result.port, "out");
        assert_eq!(result.data, json!({"config": {"k": "v"}, "input": [1, 2]}));
    }

    #[tokio::test]
    async fn port_defaults_when_omitted() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "const", r#"echo '{"data": 7}'"#);
        let invoker = script_invoker(dir.path());

        let result = invoker
            .invoke(
                BlockRequest::new("const", json!({}), JsonValue::Null),
                &CancellationToken::new(),
            )
            .await
            .expect("invoke");

        assert_eq!(result, NodeResult::new(json!(7), "default"));
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "fail", "echo boom >&2; exit 3");
        let invoker = script_invoker(dir.path());

        let err = invoker
            .invoke(
                BlockRequest::new("fail", json!({}), JsonValue::Null),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BlockError::NonZeroExit {
                code: Some(3),
                stderr: "boom".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn rejects_non_json_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "garbage", "echo not json");
        let invoker = script_invoker(dir.path());

        let err = invoker
            .invoke(
                BlockRequest::new("garbage", json!({}), JsonValue::Null),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BlockError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn rejects_multiple_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(
            dir.path(),
            "twice",
            r#"echo '{"data": 1}'; echo '{"data": 2}'"#,
        );
        let invoker = script_invoker(dir.path());

        let err = invoker
            .invoke(
                BlockRequest::new("twice", json!({}), JsonValue::Null),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BlockError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn rejects_non_object_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "number", "echo 42");
        let invoker = script_invoker(dir.path());

        let err = invoker
            .invoke(
                BlockRequest::new("number", json!({}), JsonValue::Null),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BlockError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn silent_block_is_missing_response() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "silent", "exit 0");
        let invoker = script_invoker(dir.path());

        let err = invoker
            .invoke(
                BlockRequest::new("silent", json!({}), JsonValue::Null),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BlockError::MissingResponse {
                stderr: String::new()
            }
        );
    }

    #[tokio::test]
    async fn deadline_kills_child() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "slow", "exec sleep 5");
        let invoker = script_invoker(dir.path());

        let started = Instant::now();
        let err = invoker
            .invoke(
                BlockRequest::new("slow", json!({}), JsonValue::Null)
                    .with_timeout(Duration::from_millis(100)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err, BlockError::Timeout { after_ms: 100 });
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn cancellation_kills_child() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "slow", "exec sleep 5");
        let invoker = script_invoker(dir.path());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = invoker
            .invoke(
                BlockRequest::new("slow", json!({}), JsonValue::Null),
                &cancel,
            )
            .await
            .unwrap_err();

        assert_eq!(err, BlockError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn missing_executable_fails_to_spawn() {
        let dir = tempfile::tempdir().expect("tempdir");
        let invoker = ProcessInvoker::new(BlockConfig::new(dir.path()));

        let err = invoker
            .invoke(
                BlockRequest::new("nowhere", json!({}), JsonValue::Null),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BlockError::Spawn { .. }));
    }
}

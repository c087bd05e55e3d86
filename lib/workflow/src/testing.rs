//! Shared helpers for unit tests: shell-script blocks and an in-memory invoker.

use crate::config::BlockConfig;
use crate::error::BlockError;
use crate::execution::NodeResult;
use crate::invoker::{BlockInvoker, BlockRequest, ProcessInvoker};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Writes `<dir>/<name>.sh` containing `body`.
pub fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(format!("{name}.sh"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create block dir");
    }
    std::fs::write(&path, format!("{body}\n")).expect("write block script");
}

/// A process invoker that runs `<dir>/<type>.sh` through `sh`.
pub fn script_invoker(dir: &Path) -> ProcessInvoker {
    ProcessInvoker::new(
        BlockConfig::new(dir)
            .with_interpreter("sh")
            .with_extension("sh")
            .with_default_timeout_ms(5_000),
    )
}

type Behaviour = Arc<dyn Fn(&BlockRequest) -> Result<NodeResult, BlockError> + Send + Sync>;

/// In-process invoker with scripted behaviour per block type.
#[derive(Clone, Default)]
pub struct FakeInvoker {
    blocks: Arc<Mutex<HashMap<String, Behaviour>>>,
    calls: Arc<Mutex<Vec<BlockRequest>>>,
    delay: Option<Duration>,
}

impl FakeInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block(
        self,
        block: &str,
        behaviour: impl Fn(&BlockRequest) -> Result<NodeResult, BlockError> + Send + Sync + 'static,
    ) -> Self {
        self.blocks
            .lock()
            .unwrap()
            .insert(block.to_string(), Arc::new(behaviour));
        self
    }

    /// Every invocation sleeps for `delay` before answering, honouring cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<BlockRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlockInvoker for FakeInvoker {
    fn has_block(&self, block: &str) -> bool {
        self.blocks.lock().unwrap().contains_key(block)
    }

    async fn invoke(
        &self,
        request: BlockRequest,
        cancel: &CancellationToken,
    ) -> Result<NodeResult, BlockError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(BlockError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
        let behaviour = self
            .blocks
            .lock()
            .unwrap()
            .get(&request.block)
            .cloned()
            .expect("block registered");
        behaviour(&request)
    }
}

//! Bounded admission for workflow runs.
//!
//! Every run, manual or trigger-initiated, holds a `WorkerPermit` for its
//! whole lifetime. The permit wraps an owned semaphore permit, so the slot is
//! released when the permit is dropped, whichever way the run ends.

use crate::error::EngineError;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Occupancy of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Runs currently admitted.
    pub in_flight: usize,
    /// Maximum concurrent runs.
    pub capacity: usize,
}

/// A held slot in the pool.
#[derive(Debug)]
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
}

/// Semaphore-backed gate admitting at most `capacity` runs at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    /// Creates a pool. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits for a free slot.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::QueueCancelled` if `cancel` fires before a slot
    /// frees up. Cancellation wins when both are ready.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<WorkerPermit, EngineError> {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::QueueCancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit,
        };
        // The semaphore is never closed.
        let permit = permit.map_err(|_| EngineError::QueueCancelled)?;
        debug!(in_flight = self.stats().in_flight, "worker slot acquired");
        Ok(WorkerPermit { _permit: permit })
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            in_flight: self.capacity - self.semaphore.available_permits(),
            capacity: self.capacity,
        }
    }
}

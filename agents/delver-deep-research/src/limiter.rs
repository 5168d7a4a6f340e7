//! Run-wide bound on simultaneous external calls.
//!
//! Only planning, search, fetch, extraction, clarification, analysis and synthesis
//! calls hold a slot. Node tasks never do, so a parent waiting on its
//! children cannot starve them.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Shared semaphore sized to the configured concurrency
#[derive(Debug, Clone)]
pub struct CallLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl CallLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot; `None` means the token fired first.
    pub async fn acquire(&self, token: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        if token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        }
    }

    /// Wait for a slot regardless of cancellation.
    ///
    /// Used for the final synthesis call, which runs even after the run was
    /// cancelled. `None` only if the semaphore was closed.
    pub async fn acquire_uncancellable(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }
}

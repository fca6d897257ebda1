//! Bound on concurrently running fetch+write tasks.

use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting gate shared by every task of a run
///
/// A task holds its permit for its whole life (fetch and write); the permit is
/// returned when it is dropped, whether the task succeeded, failed or panicked.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting `capacity` tasks at once
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot
    ///
    /// Only fails if the limiter has been [`close`](Self::close)d.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("concurrency limiter closed".to_string()))
    }

    /// Stop admitting tasks; pending and future [`acquire`](Self::acquire) calls fail
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Maximum number of concurrent tasks
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Tasks currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

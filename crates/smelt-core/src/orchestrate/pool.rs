//! Bounded worker pool shared by every request.
//!
//! The pool caps how many compiler processes run at once across the whole
//! service. It is a fair semaphore: permits are handed out in the order
//! jobs started waiting, whichever request they belong to.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

/// A reserved worker slot. Dropping it frees the slot.
pub type WorkerSlot = OwnedSemaphorePermit;

impl WorkerPool {
    /// Create a pool with `size` slots (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Wait for a free slot, queueing FIFO behind earlier waiters.
    pub async fn acquire(&self) -> Result<WorkerSlot> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("worker pool closed".to_string()))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Slots currently held by running jobs.
    pub fn in_use(&self) -> usize {
        self.size - self.available()
    }
}

//! Admission control for concurrent outbound sends.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

/// Counting semaphore gating how many sends may be in flight at once.
pub struct ConnectionSlots {
    semaphore: Arc<Semaphore>,
}

impl ConnectionSlots {
    #[must_use]
    pub fn new(max_slots: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_slots)),
        }
    }

    /// Waits for a free slot, or for `token` to fire first.
    pub async fn acquire(
        &self,
        token: &tokio_util::sync::CancellationToken,
    ) -> crate::Result<SemaphorePermit<'_>> {
        tokio::select! {
            permit = self.semaphore.acquire() => {
                permit.map_err(|_e| crate::error::Error::cancelled())
            }
            () = token.cancelled() => Err(crate::error::Error::cancelled()),
        }
    }

    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}

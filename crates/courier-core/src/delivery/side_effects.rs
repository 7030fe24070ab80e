//! Bounded runner for best-effort background work (status broadcasts,
//! receipt writes).
//!
//! Each effect holds a semaphore permit while it runs. When every permit is
//! taken the effect is dropped with a warning instead of queueing without
//! bound. Failures are logged, never propagated.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::warn;

pub struct SideEffects {
    permits: Arc<Semaphore>,
    capacity: u32,
}

impl SideEffects {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, u16::MAX as usize) as u32;
        Self {
            permits: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
        }
    }

    /// Spawn `effect` if a permit is free. Returns `false` if it was dropped.
    pub fn spawn<F, E>(&self, label: &'static str, effect: F) -> bool
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            warn!(effect = label, "side effect capacity exhausted, dropping");
            return false;
        };

        tokio::spawn(async move {
            if let Err(e) = effect.await {
                warn!(effect = label, error = %e, "side effect failed");
            }
            drop(permit);
        });
        true
    }

    /// Number of effects currently running.
    pub fn in_flight(&self) -> usize {
        self.capacity as usize - self.permits.available_permits()
    }

    /// Wait until every running effect has finished.
    pub async fn wait_idle(&self) {
        if let Ok(all) = self.permits.acquire_many(self.capacity).await {
            drop(all);
        }
    }
}

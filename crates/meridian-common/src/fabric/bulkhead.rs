//! Bulkhead: bounded-concurrency admission per callee.
//!
//! A semaphore with a bounded admission wait. Over-limit callers fail fast
//! with [`CoreError::BulkheadFull`], a classification distinct from both
//! circuit-open and transport failure. Cancelled callers release their slot
//! through permit drop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::error::CoreError;

/// Bulkhead parameters for one peer.
#[derive(Debug, Clone, Copy)]
pub struct BulkheadConfig {
    /// Concurrent calls admitted.
    pub max_concurrent: usize,
    /// How long a caller may wait for admission.
    pub max_wait: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_wait: Duration::from_secs(1),
        }
    }
}

/// Per-callee admission gate.
pub struct Bulkhead {
    name: String,
    permits: Arc<Semaphore>,
    max_wait: Duration,
}

impl Bulkhead {
    /// Build a bulkhead for the named peer.
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            max_wait: config.max_wait,
        }
    }

    /// Acquire a call slot, waiting at most the configured admission time.
    /// The slot is released when the returned permit drops, including on
    /// cancellation.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, CoreError> {
        match timeout(self.max_wait, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(CoreError::unexpected("bulkhead", "semaphore closed")),
            Err(_) => Err(CoreError::BulkheadFull {
                peer: self.name.clone(),
            }),
        }
    }

    /// Slots currently free, for logs and tests.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Bulkhead {
        Bulkhead::new(
            "identity",
            BulkheadConfig {
                max_concurrent: 2,
                max_wait: Duration::from_millis(20),
            },
        )
    }

    #[tokio::test]
    async fn admits_up_to_the_limit() {
        let bulkhead = small();
        let _a = bulkhead.acquire().await.unwrap();
        let _b = bulkhead.acquire().await.unwrap();
        assert_eq!(bulkhead.available(), 0);
    }

    #[tokio::test]
    async fn over_limit_callers_fail_fast() {
        let bulkhead = small();
        let _a = bulkhead.acquire().await.unwrap();
        let _b = bulkhead.acquire().await.unwrap();

        let err = bulkhead.acquire().await.unwrap_err();
        assert!(matches!(err, CoreError::BulkheadFull { .. }));
    }

    #[tokio::test]
    async fn dropping_a_permit_frees_the_slot() {
        let bulkhead = small();
        let a = bulkhead.acquire().await.unwrap();
        let _b = bulkhead.acquire().await.unwrap();
        drop(a);
        assert!(bulkhead.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn waiting_caller_is_admitted_when_a_slot_frees_in_time() {
        let bulkhead = Bulkhead::new(
            "identity",
            BulkheadConfig {
                max_concurrent: 1,
                max_wait: Duration::from_secs(1),
            },
        );
        let held = bulkhead.acquire().await.unwrap();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(held);
        });

        assert!(bulkhead.acquire().await.is_ok());
        release.await.unwrap();
    }
}

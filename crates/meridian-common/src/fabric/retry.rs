//! Transport-level retry with exponential backoff and jitter.
//!
//! Only transient transport failures are retried (`Unavailable`,
//! `DeadlineExceeded` classifications), and only for calls the caller marks
//! idempotent; mutating methods go through exactly once unless explicitly
//! marked otherwise.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::CoreError;

/// Retry policy for a peer.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts including the original call.
    pub max_attempts: u32,
    /// Backoff before the first retry; also the jitter range.
    pub initial_backoff: Duration,
    /// Exponential multiplier between retries.
    pub multiplier: f64,
    /// Cap on the exponential component.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based): exponential, capped,
    /// plus uniform jitter in `[0, initial_backoff)`.
    fn backoff(&self, retry: u32) -> Duration {
        let exponential = self.initial_backoff.as_secs_f64()
            * self.multiplier.powi(retry.saturating_sub(1) as i32);
        let capped = exponential.min(self.max_backoff.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.0..self.initial_backoff.as_secs_f64().max(f64::EPSILON));
        Duration::from_secs_f64(capped + jitter)
    }
}

/// Run `operation`, retrying transient transport failures for idempotent
/// calls.
///
/// Non-idempotent calls and non-transport failures return the first error
/// unchanged.
pub async fn retry_call<F, Fut, T>(
    policy: &RetryPolicy,
    idempotent: bool,
    operation_name: &str,
    mut operation: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !idempotent || !e.is_transport_retryable() || attempt >= policy.max_attempts {
                    return Err(e);
                }

                let delay = policy.backoff(attempt);
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

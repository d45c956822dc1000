//! Composition of the resilience stack around one peer.
//!
//! A [`ResilientPeer`] owns the bulkhead, circuit breaker, and retry policy
//! for a single callee and applies them to every call in the fixed order
//! bulkhead → breaker → retry → deadline → call. Each stage only sees the
//! call handed down by the stage above it; cancellation propagates downward
//! and releases the bulkhead slot through permit drop.

use std::future::Future;
use std::time::Duration;

use crate::clock::SharedClock;
use crate::error::CoreError;
use crate::fabric::breaker::{BreakerConfig, CircuitBreaker};
use crate::fabric::bulkhead::{Bulkhead, BulkheadConfig};
use crate::fabric::retry::{retry_call, RetryPolicy};

/// Resilience settings for one peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerSettings {
    /// Admission gate.
    pub bulkhead: BulkheadConfig,
    /// Failure guard.
    pub breaker: BreakerConfig,
    /// Transport retry policy.
    pub retry: RetryPolicy,
}

/// Per-call options.
#[derive(Debug, Clone, Copy)]
pub struct CallSpec {
    /// Operation name for logs.
    pub name: &'static str,
    /// Whether the transport retry policy may replay the call.
    pub idempotent: bool,
    /// Per-attempt deadline; the peer default (10 s) when absent.
    pub deadline: Option<Duration>,
}

impl CallSpec {
    /// A read-style call: retryable, default deadline.
    pub fn idempotent(name: &'static str) -> Self {
        Self {
            name,
            idempotent: true,
            deadline: None,
        }
    }

    /// A mutating call: never retried, default deadline.
    pub fn mutating(name: &'static str) -> Self {
        Self {
            name,
            idempotent: false,
            deadline: None,
        }
    }

    /// Override the per-attempt deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// The resilience stack for one callee.
pub struct ResilientPeer {
    name: String,
    bulkhead: Bulkhead,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    default_deadline: Duration,
}

impl ResilientPeer {
    /// Build the stack for the named peer.
    pub fn new(name: impl Into<String>, settings: PeerSettings, clock: SharedClock) -> Self {
        let name = name.into();
        Self {
            bulkhead: Bulkhead::new(name.clone(), settings.bulkhead),
            breaker: CircuitBreaker::new(name.clone(), settings.breaker, clock),
            retry: settings.retry,
            default_deadline: Duration::from_secs(10),
            name,
        }
    }

    /// Override the default per-call deadline.
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// The peer's circuit breaker, for observation and manual tripping.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Peer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Place a call through the stack.
    ///
    /// `operation` is invoked once per attempt; it must build a fresh
    /// request each time. The breaker records one outcome per logical call
    /// (after retries), and only peer-health failures count against it.
    pub async fn call<T, F, Fut>(&self, spec: CallSpec, mut operation: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let _permit = self.bulkhead.acquire().await?;
        self.breaker.try_acquire()?;

        let deadline = spec.deadline.unwrap_or(self.default_deadline);
        let peer = self.name.clone();

        let result = retry_call(&self.retry, spec.idempotent, spec.name, || {
            let attempt = operation();
            let peer = peer.clone();
            async move {
                match tokio::time::timeout(deadline, attempt).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(CoreError::RemoteDeadline { peer }),
                }
            }
        })
        .await;

        match &result {
            Ok(_) => self.breaker.record(true),
            Err(e) => self.breaker.record(!e.is_peer_failure()),
        }
        result
    }
}

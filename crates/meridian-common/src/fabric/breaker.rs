//! Circuit breaker.
//!
//! Three-state guard per callee. Closed records outcomes over a sliding
//! window of recent calls and opens when the failure rate crosses the
//! threshold; Open fast-fails everything until its interval elapses;
//! Half-Open admits a bounded number of trial calls and closes or re-opens
//! based on their outcome. A fast-failed call is classified as
//! [`CoreError::CircuitOpen`], distinguishable from transport failure.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::error::CoreError;

/// Breaker parameters for one peer.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Sliding-window length in calls.
    pub window: usize,
    /// Minimum observed calls before the failure rate is evaluated.
    pub min_calls: usize,
    /// Failure rate at or above which the breaker opens.
    pub failure_rate: f64,
    /// How long the breaker stays open before admitting trials.
    pub open_for: Duration,
    /// Trial calls admitted in half-open state.
    pub half_open_max_calls: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: 10,
            min_calls: 5,
            failure_rate: 0.5,
            open_for: Duration::from_secs(10),
            half_open_max_calls: 5,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow; outcomes are recorded.
    Closed,
    /// Calls fast-fail.
    Open,
    /// Bounded trial calls are admitted.
    HalfOpen,
}

#[derive(Debug)]
enum State {
    Closed,
    Open { until_ms: i64 },
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    window: VecDeque<bool>,
    trial_admitted: usize,
    trial_completed: usize,
    trial_failures: usize,
}

/// Per-callee circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: SharedClock,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Build a breaker for the named peer.
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: State::Closed,
                window: VecDeque::with_capacity(config.window),
                trial_admitted: 0,
                trial_completed: 0,
                trial_failures: 0,
            }),
        }
    }

    /// Ask to place a call. Fails fast with [`CoreError::CircuitOpen`] when
    /// the breaker is open or half-open trials are exhausted.
    pub fn try_acquire(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        match inner.state {
            State::Closed => Ok(()),
            State::Open { until_ms } => {
                if self.clock.now_millis() >= until_ms {
                    info!(peer = %self.name, "circuit half-open, admitting trial calls");
                    inner.state = State::HalfOpen;
                    inner.trial_admitted = 1;
                    inner.trial_completed = 0;
                    inner.trial_failures = 0;
                    Ok(())
                } else {
                    Err(CoreError::CircuitOpen {
                        peer: self.name.clone(),
                    })
                }
            }
            State::HalfOpen => {
                if inner.trial_admitted < self.config.half_open_max_calls {
                    inner.trial_admitted += 1;
                    Ok(())
                } else {
                    Err(CoreError::CircuitOpen {
                        peer: self.name.clone(),
                    })
                }
            }
        }
    }

    /// Record the outcome of an admitted call.
    pub fn record(&self, success: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        match inner.state {
            State::Closed => {
                if inner.window.len() == self.config.window {
                    inner.window.pop_front();
                }
                inner.window.push_back(success);

                let observed = inner.window.len();
                if observed >= self.config.min_calls {
                    let failures = inner.window.iter().filter(|ok| !**ok).count();
                    let rate = failures as f64 / observed as f64;
                    if rate >= self.config.failure_rate {
                        warn!(
                            peer = %self.name,
                            failure_rate = rate,
                            observed,
                            "circuit opened"
                        );
                        inner.state = State::Open {
                            until_ms: self.clock.now_millis()
                                + self.config.open_for.as_millis() as i64,
                        };
                        inner.window.clear();
                    }
                }
            }
            State::HalfOpen => {
                inner.trial_completed += 1;
                if !success {
                    inner.trial_failures += 1;
                }
                if inner.trial_completed >= self.config.half_open_max_calls {
                    let rate = inner.trial_failures as f64 / inner.trial_completed as f64;
                    if rate <= self.config.failure_rate {
                        info!(peer = %self.name, "circuit closed after successful trials");
                        inner.state = State::Closed;
                        inner.window.clear();
                    } else {
                        warn!(peer = %self.name, failure_rate = rate, "circuit re-opened");
                        inner.state = State::Open {
                            until_ms: self.clock.now_millis()
                                + self.config.open_for.as_millis() as i64,
                        };
                    }
                }
            }
            // A late record after the breaker opened carries no information.
            State::Open { .. } => {}
        }
    }

    /// Force the breaker open for its configured interval.
    pub fn trip(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        warn!(peer = %self.name, "circuit forced open");
        inner.state = State::Open {
            until_ms: self.clock.now_millis() + self.config.open_for.as_millis() as i64,
        };
        inner.window.clear();
    }

    /// Current state, for logs and tests.
    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            State::Closed => BreakerState::Closed,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen => BreakerState::HalfOpen,
        }
    }
}

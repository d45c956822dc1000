//! Client-side RPC fabric.
//!
//! Long-lived channels to named peers, plus the resilience stack applied to
//! every outgoing call. Decoration order is fixed:
//!
//! ```text
//! bulkhead -> circuit breaker -> retry -> deadline -> decorated call
//! ```
//!
//! Each policy is its own small state machine ([`bulkhead`], [`breaker`],
//! [`retry`]); [`peer::ResilientPeer`] composes them in that order and
//! nothing else merges their state.

pub mod breaker;
pub mod bulkhead;
pub mod peer;
pub mod retry;

use std::time::Duration;

use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::info;

use crate::error::CoreError;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use bulkhead::{Bulkhead, BulkheadConfig};
pub use peer::{CallSpec, PeerSettings, ResilientPeer};
pub use retry::{retry_call, RetryPolicy};

/// Smallest permitted inbound message cap: 4 MiB.
pub const MIN_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Largest permitted inbound message cap: 20 MiB.
pub const MAX_MESSAGE_BYTES: usize = 20 * 1024 * 1024;

/// Transport settings for one peer.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Peer address(es), scheme included; comma-separated addresses are
    /// load-balanced round-robin.
    pub address: String,
    /// Use TLS instead of plaintext.
    pub tls: bool,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Idle interval after which a keep-alive ping is sent.
    pub keepalive_interval: Duration,
    /// How long to wait for a keep-alive ack before tearing down.
    pub keepalive_timeout: Duration,
    /// Maximum inbound message size, clamped to [4 MiB, 20 MiB].
    pub max_message_bytes: usize,
}

impl ChannelSettings {
    /// Settings for the given address with the documented defaults.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls: false,
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            max_message_bytes: 16 * 1024 * 1024,
        }
    }

    /// The message cap, clamped into the permitted range.
    pub fn message_limit(&self) -> usize {
        self.max_message_bytes
            .clamp(MIN_MESSAGE_BYTES, MAX_MESSAGE_BYTES)
    }

    fn endpoint(&self, address: &str) -> Result<Endpoint, CoreError> {
        let mut endpoint = Endpoint::from_shared(address.to_string())
            .map_err(|e| CoreError::unexpected("channel-config", e.to_string()))?
            .connect_timeout(self.connect_timeout)
            .http2_keep_alive_interval(self.keepalive_interval)
            .keep_alive_timeout(self.keepalive_timeout)
            .keep_alive_while_idle(true);

        if self.tls {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| CoreError::unexpected("channel-tls", e.to_string()))?;
        }
        Ok(endpoint)
    }

    /// Build the channel. Connection is lazy; the channel reconnects on its
    /// own and is shared by all concurrent callers.
    pub fn build(&self) -> Result<Channel, CoreError> {
        let addresses: Vec<&str> = self
            .address
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect();

        if addresses.is_empty() {
            return Err(CoreError::unexpected(
                "channel-config",
                "no peer address configured",
            ));
        }

        info!(
            address = %self.address,
            tls = self.tls,
            backends = addresses.len(),
            "building peer channel"
        );

        if addresses.len() == 1 {
            Ok(self.endpoint(addresses[0])?.connect_lazy())
        } else {
            let endpoints = addresses
                .iter()
                .map(|a| self.endpoint(a))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Channel::balance_list(endpoints.into_iter()))
        }
    }
}

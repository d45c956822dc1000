//! Shared building blocks for the Meridian identity and order services.
//!
//! Both services are built from the same small set of components:
//!
//! - [`auth`]: the token codec, principal resolution, the server-side
//!   interceptor chain, and outbound request decoration.
//! - [`fabric`]: long-lived client channels with keep-alive plus the
//!   resilience stack (bulkhead, circuit breaker, retry, deadline) applied to
//!   every outgoing call.
//! - [`cache`]: the read-through user-validation cache.
//! - [`error`]: the failure taxonomy shared across the workspace and its
//!   single mapping onto RPC status codes.
//! - [`config`]: the typed configuration surface.
//! - [`clock`]: the injected time source; nothing in this crate reads the
//!   wall clock directly.

pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fabric;
pub mod telemetry;

pub use clock::{Clock, SystemClock};
pub use error::{CoreError, Result};

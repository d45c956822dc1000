//! Meridian identity service.
//!
//! Owns the user directory: account creation, profile reads and updates, and
//! the order-eligibility check consumed by the order service. The inbound
//! side runs the shared interceptor chain; eligibility answers are served
//! through the read-through validation cache.

pub mod directory;
pub mod server;
pub mod service;

pub use directory::{NewUser, UserRecord, UserStore};
pub use server::{IdentityServer, IdentityServerConfig};

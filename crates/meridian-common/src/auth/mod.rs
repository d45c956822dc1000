//! Authentication pipeline shared by both services.
//!
//! The pipeline is assembled from four pieces, replicated in each service
//! process:
//!
//! 1. [`token`]: the signed-token codec (issue/verify).
//! 2. [`principal`] and [`resolver`]: turning verified claims into a
//!    request-scoped [`principal::Principal`], optionally against a user
//!    directory.
//! 3. [`server`]: the inbound interceptor chain (correlation id, token
//!    extraction and verification, per-method enforcement).
//! 4. [`client`]: outbound request decoration (correlation propagation,
//!    token propagation or minting).

pub mod client;
pub mod principal;
pub mod resolver;
pub mod server;
pub mod token;

pub use client::RequestAuth;
pub use principal::{AccountStatus, Principal};
pub use resolver::{DirectoryUser, PrincipalResolver, UserDirectory};
pub use server::{CallContext, MethodGate, MethodPolicy};
pub use token::{Claims, TokenCodec, TokenError};

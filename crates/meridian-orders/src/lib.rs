//! Meridian order service.
//!
//! Orders are created through a short-lived saga that validates the buyer
//! against the identity service, confirms on success, and compensates into a
//! cancelled order on failure. Status changes after creation go through an
//! explicit transition table; all writes use optimistic versioning.

pub mod identity;
pub mod order;
pub mod saga;
pub mod server;
pub mod service;
pub mod store;

pub use order::{Order, OrderItem, OrderStatus, SagaState};
pub use server::{OrdersServer, OrdersServerConfig};
pub use store::OrderStore;

//! Protocol buffer definitions for the Meridian identity and order services.
//!
//! This crate provides the gRPC service and message definitions shared by the
//! identity service, the order service, and their clients, together with the
//! wire-level metadata keys and fully-qualified method names both sides agree
//! on.
//!
//! # Wire conventions
//!
//! - Monetary amounts travel as canonical decimal strings (`"1059.97"`), never
//!   as floating point. Services parse them with exact decimal arithmetic.
//! - Timestamps travel as RFC 3339 strings.
//! - Every call carries an `x-correlation-id` metadata entry; servers echo the
//!   effective id in response metadata and in error trailers.

// Generated protobuf code doesn't have docs
#![allow(missing_docs)]

/// Generated types for the identity service.
pub mod identity {
    /// Version 1 of the identity protocol.
    pub mod v1 {
        tonic::include_proto!("meridian.identity.v1");
    }
}

/// Generated types for the order service.
pub mod orders {
    /// Version 1 of the order protocol.
    pub mod v1 {
        tonic::include_proto!("meridian.orders.v1");
    }
}

/// Metadata keys both services read and write.
pub mod metadata {
    /// Bearer token header, `authorization: Bearer <token>`.
    pub const AUTHORIZATION: &str = "authorization";
    /// Prefix expected in front of the token in [`AUTHORIZATION`].
    pub const BEARER_PREFIX: &str = "Bearer ";
    /// Correlation id threaded through an entire request chain.
    pub const CORRELATION_ID: &str = "x-correlation-id";
    /// Per-call request id minted by clients.
    pub const REQUEST_ID: &str = "x-request-id";
}

/// Fully-qualified method names, as they appear in request paths and in
/// per-method security policy.
pub mod methods {
    pub const CREATE_USER: &str = "/meridian.identity.v1.IdentityService/CreateUser";
    pub const GET_USER: &str = "/meridian.identity.v1.IdentityService/GetUser";
    pub const GET_USER_BY_USERNAME: &str =
        "/meridian.identity.v1.IdentityService/GetUserByUsername";
    pub const UPDATE_USER_PROFILE: &str =
        "/meridian.identity.v1.IdentityService/UpdateUserProfile";
    pub const VALIDATE_USER: &str = "/meridian.identity.v1.IdentityService/ValidateUser";
    pub const IDENTITY_HEALTH_CHECK: &str =
        "/meridian.identity.v1.IdentityService/HealthCheck";

    pub const CREATE_ORDER: &str = "/meridian.orders.v1.OrderService/CreateOrder";
    pub const GET_ORDER: &str = "/meridian.orders.v1.OrderService/GetOrder";
    pub const LIST_USER_ORDERS: &str = "/meridian.orders.v1.OrderService/ListUserOrders";
    pub const UPDATE_ORDER_STATUS: &str =
        "/meridian.orders.v1.OrderService/UpdateOrderStatus";
    pub const ORDERS_HEALTH_CHECK: &str = "/meridian.orders.v1.OrderService/HealthCheck";
}

/// Strip the bearer prefix from an `authorization` header value.
///
/// Returns `None` when the value does not carry a bearer token, which callers
/// treat as an anonymous request.
///
/// # Examples
///
/// ```
/// use meridian_proto::bearer_token;
///
/// assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
/// assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
/// assert_eq!(bearer_token(""), None);
/// ```
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix(metadata::BEARER_PREFIX)
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_extracts_token() {
        assert_eq!(bearer_token("Bearer tok"), Some("tok"));
    }

    #[test]
    fn bearer_token_trims_whitespace() {
        assert_eq!(bearer_token("Bearer  tok "), Some("tok"));
    }

    #[test]
    fn bearer_token_rejects_other_schemes() {
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("bearer tok"), None);
    }

    #[test]
    fn bearer_token_rejects_empty_remainder() {
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
    }

    #[test]
    fn method_names_are_fully_qualified() {
        assert!(methods::CREATE_USER.starts_with("/meridian.identity.v1."));
        assert!(methods::CREATE_ORDER.starts_with("/meridian.orders.v1."));
    }
}

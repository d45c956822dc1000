//! Inbound interceptor chain.
//!
//! Every inbound RPC passes through two interceptors and one per-method gate,
//! in fixed order:
//!
//! 1. [`CorrelationStage`]: adopt the caller's `x-correlation-id` or mint a
//!    new one, and publish it into the request scope.
//! 2. [`AuthStage`]: extract a bearer token from `authorization`, verify it,
//!    and publish the outcome into the request scope. This stage never
//!    rejects a call on its own; a request without a token continues as
//!    anonymous.
//! 3. [`MethodGate::authorize`]: invoked first thing by every handler with
//!    the method's fully-qualified name. Applies the exclusion list, the
//!    server mode, principal resolution, and the per-method policy, and
//!    returns the request's [`CallContext`].
//!
//! Request-scoped values (correlation id, auth outcome, principal) live in
//! the request's extensions and are dropped with it on success, error, and
//! cancellation alike, so nothing from one call can leak into another even
//! when the same worker picks up both.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use meridian_proto::{bearer_token, metadata};
use tonic::metadata::MetadataValue;
use tonic::service::Interceptor;
use tonic::{Request, Response, Status};
use tracing::debug;
use uuid::Uuid;

use crate::auth::principal::Principal;
use crate::auth::resolver::PrincipalResolver;
use crate::auth::token::{Claims, TokenCodec};
use crate::config::ServerAuthMode;
use crate::error::{with_correlation, CoreError};

/// Correlation id for the current request, published by [`CorrelationStage`].
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// Raw bearer token of the current request, kept for propagation to
/// downstream calls.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Outcome of the authentication stage.
#[derive(Debug, Clone)]
pub enum AuthState {
    /// No token presented.
    Anonymous,
    /// A token was presented and failed verification.
    Failed {
        /// Specific verification failure, safe to echo.
        reason: String,
    },
    /// A token was presented and verified.
    Verified {
        /// The verified claim set.
        claims: Claims,
    },
}

/// Everything a handler needs from the request scope after authorization.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Effective correlation id for this request.
    pub correlation_id: String,
    /// Resolved principal, present only in full mode on non-excluded
    /// methods.
    pub principal: Option<Principal>,
    /// The caller's bearer token, for propagation.
    pub bearer: Option<String>,
}

impl CallContext {
    /// Context for work not rooted in an inbound RPC; mints a fresh
    /// correlation id so background calls stay traceable.
    pub fn background() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            principal: None,
            bearer: None,
        }
    }

    /// Map an error to a wire status carrying this request's correlation id.
    pub fn fail(&self, err: CoreError) -> Status {
        err.into_status(&self.correlation_id)
    }

    /// Build a success response carrying this request's correlation id.
    pub fn reply<T>(&self, message: T) -> Response<T> {
        let mut response = Response::new(message);
        if let Ok(value) = MetadataValue::try_from(self.correlation_id.as_str()) {
            response
                .metadata_mut()
                .insert(metadata::CORRELATION_ID, value);
        }
        response
    }
}

/// First stage: correlation-id adoption.
#[derive(Debug, Clone, Default)]
pub struct CorrelationStage;

impl Interceptor for CorrelationStage {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let correlation_id = request
            .metadata()
            .get(metadata::CORRELATION_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        request
            .extensions_mut()
            .insert(CorrelationId(correlation_id));
        Ok(request)
    }
}

/// Second stage: token extraction and verification.
///
/// Publishes an [`AuthState`] and, when a token is present, the raw
/// [`BearerToken`]. Enforcement is deferred to the per-method gate so
/// excluded methods are never failed by a bad token.
#[derive(Clone)]
pub struct AuthStage {
    mode: ServerAuthMode,
    codec: Arc<TokenCodec>,
}

impl AuthStage {
    /// Build the stage for the given server mode.
    pub fn new(mode: ServerAuthMode, codec: Arc<TokenCodec>) -> Self {
        Self { mode, codec }
    }
}

impl Interceptor for AuthStage {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if self.mode == ServerAuthMode::None {
            return Ok(request);
        }

        let token = request
            .metadata()
            .get(metadata::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(String::from);

        let state = match token {
            None => AuthState::Anonymous,
            Some(token) => match self.codec.verify(&token) {
                Ok(claims) => {
                    request.extensions_mut().insert(BearerToken(token));
                    AuthState::Verified { claims }
                }
                Err(e) => {
                    debug!(error = %e, "bearer token failed verification");
                    AuthState::Failed {
                        reason: e.to_string(),
                    }
                }
            },
        };

        request.extensions_mut().insert(state);
        Ok(request)
    }
}

/// Per-method access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodPolicy {
    /// No authentication required.
    Public,
    /// Any authenticated caller (the default for unlisted methods).
    Authenticated,
    /// Caller must hold the named authority.
    RequireAuthority(&'static str),
}

/// Third stage: per-method enforcement.
///
/// Shared by all handlers of a service; each handler passes its own
/// fully-qualified method name as the first thing it does.
pub struct MethodGate {
    mode: ServerAuthMode,
    excluded: HashSet<String>,
    policies: HashMap<&'static str, MethodPolicy>,
    resolver: Arc<PrincipalResolver>,
}

impl MethodGate {
    /// Build a gate. Methods without an explicit policy require an
    /// authenticated caller.
    pub fn new(
        mode: ServerAuthMode,
        excluded: HashSet<String>,
        resolver: Arc<PrincipalResolver>,
    ) -> Self {
        Self {
            mode,
            excluded,
            policies: HashMap::new(),
            resolver,
        }
    }

    /// Register a policy for a method.
    pub fn with_policy(mut self, method: &'static str, policy: MethodPolicy) -> Self {
        self.policies.insert(method, policy);
        self
    }

    fn policy_for(&self, method: &str) -> MethodPolicy {
        self.policies
            .get(method)
            .copied()
            .unwrap_or(MethodPolicy::Authenticated)
    }

    /// Authorize the request for `method` and return its [`CallContext`].
    ///
    /// Error surfaces: missing token and verification or resolution failures
    /// yield `UNAUTHENTICATED`; policy denials yield `PERMISSION_DENIED`.
    /// Every error carries the correlation id in its trailers.
    pub async fn authorize<T>(
        &self,
        method: &'static str,
        request: &Request<T>,
    ) -> Result<CallContext, Status> {
        let correlation_id = request
            .extensions()
            .get::<CorrelationId>()
            .map(|c| c.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let bearer = request
            .extensions()
            .get::<BearerToken>()
            .map(|b| b.0.clone());

        let mut context = CallContext {
            correlation_id,
            principal: None,
            bearer,
        };

        // Pass-through cases: disabled security, excluded methods, public
        // policy. The cleanup contract still holds; there is simply nothing
        // to enforce.
        if self.mode == ServerAuthMode::None
            || self.excluded.contains(method)
            || self.policy_for(method) == MethodPolicy::Public
        {
            return Ok(context);
        }

        let state = request
            .extensions()
            .get::<AuthState>()
            .cloned()
            .unwrap_or(AuthState::Anonymous);

        let claims = match state {
            AuthState::Anonymous => {
                return Err(unauthenticated("missing token", &context.correlation_id));
            }
            AuthState::Failed { reason } => {
                return Err(unauthenticated(&reason, &context.correlation_id));
            }
            AuthState::Verified { claims } => claims,
        };

        match self.mode {
            ServerAuthMode::BasicValidation => {
                // Token verified; no principal is published. Authority
                // policies fall back to the token's role claims.
                if let MethodPolicy::RequireAuthority(authority) = self.policy_for(method) {
                    if !claims.roles.iter().any(|r| r == authority) {
                        return Err(CoreError::PolicyDenied {
                            method: method.to_string(),
                        }
                        .into_status(&context.correlation_id));
                    }
                }
                Ok(context)
            }
            ServerAuthMode::Full => {
                let principal = self
                    .resolver
                    .resolve(&claims, &context)
                    .await
                    .map_err(|e| e.into_status(&context.correlation_id))?;

                if let MethodPolicy::RequireAuthority(authority) = self.policy_for(method) {
                    if !principal.has_authority(authority) {
                        return Err(CoreError::PolicyDenied {
                            method: method.to_string(),
                        }
                        .into_status(&context.correlation_id));
                    }
                }

                context.principal = Some(principal);
                Ok(context)
            }
            ServerAuthMode::None => Ok(context),
        }
    }
}

/// Ownership check used by methods whose policy compares the caller against
/// a method argument: the caller must be the target user or hold the given
/// authority.
pub fn ensure_owner_or_authority(
    principal: &Principal,
    target_user_id: &str,
    authority: &str,
    method: &str,
) -> Result<(), CoreError> {
    if principal.user_id == target_user_id || principal.has_authority(authority) {
        Ok(())
    } else {
        Err(CoreError::PolicyDenied {
            method: method.to_string(),
        })
    }
}

fn unauthenticated(message: &str, correlation_id: &str) -> Status {
    with_correlation(Status::unauthenticated(message), correlation_id)
}

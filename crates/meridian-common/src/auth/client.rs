//! Outbound request decoration.
//!
//! Every outgoing RPC is decorated before it touches the wire: the current
//! request's correlation id (or a freshly minted one for background work) and
//! a per-call request id are copied into metadata, and depending on the
//! client mode a bearer token is propagated, minted, or additionally
//! re-verified locally.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tonic::metadata::MetadataValue;
use tonic::Request;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::principal::Principal;
use crate::auth::server::CallContext;
use crate::auth::token::{TokenCodec, TokenError};
use crate::clock::SharedClock;
use crate::config::ClientAuthMode;
use crate::error::CoreError;
use meridian_proto::metadata;

/// Minting attempts before the failure surfaces to the caller.
const MINT_ATTEMPTS: u32 = 3;

/// Fixed pause between minting attempts.
const MINT_BACKOFF: Duration = Duration::from_millis(100);

/// A minted token is reused until this fraction of its lifetime has passed,
/// keeping a safety margin against clock skew on the receiving side.
const REUSE_FRACTION: f64 = 0.9;

struct MintedToken {
    token: String,
    reuse_until_ms: i64,
}

/// Decorates outgoing requests with tracing metadata and credentials.
pub struct RequestAuth {
    mode: ClientAuthMode,
    codec: Arc<TokenCodec>,
    token_ttl: Duration,
    minted: DashMap<String, MintedToken>,
    clock: SharedClock,
}

impl RequestAuth {
    /// Build the decorator.
    ///
    /// `token_ttl` is the lifetime of tokens minted on behalf of a principal
    /// when the caller has none to propagate.
    pub fn new(
        mode: ClientAuthMode,
        codec: Arc<TokenCodec>,
        token_ttl: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            mode,
            codec,
            token_ttl,
            minted: DashMap::new(),
            clock,
        }
    }

    /// Decorate one outgoing request.
    ///
    /// In `Propagate` mode the caller's token is reused when present and
    /// minted from the current principal otherwise. `Validate` additionally
    /// re-verifies the token and fails locally, without touching the wire,
    /// when verification fails. Token errors map to `UNAUTHENTICATED` at the
    /// call site.
    pub async fn decorate<T>(
        &self,
        request: &mut Request<T>,
        context: &CallContext,
    ) -> Result<(), CoreError> {
        insert_ascii(request, metadata::CORRELATION_ID, &context.correlation_id)?;
        insert_ascii(request, metadata::REQUEST_ID, &Uuid::new_v4().to_string())?;

        if self.mode == ClientAuthMode::None {
            return Ok(());
        }

        let token = match (&context.bearer, &context.principal) {
            (Some(token), _) => token.clone(),
            (None, Some(principal)) => self.minted_for(principal).await?,
            (None, None) => {
                // Nothing to attach; the callee decides whether anonymous
                // access is acceptable for the method.
                debug!("outbound call has neither token nor principal");
                return Ok(());
            }
        };

        if self.mode == ClientAuthMode::Validate {
            self.codec.verify(&token).map_err(CoreError::Token)?;
        }

        insert_ascii(
            request,
            metadata::AUTHORIZATION,
            &format!("{}{}", metadata::BEARER_PREFIX, token),
        )?;
        Ok(())
    }

    /// Mint (or reuse) a token for the principal.
    async fn minted_for(&self, principal: &Principal) -> Result<String, CoreError> {
        let now_ms = self.clock.now_millis();
        if let Some(entry) = self.minted.get(&principal.username) {
            if entry.reuse_until_ms > now_ms {
                return Ok(entry.token.clone());
            }
        }

        let mut last_error = TokenError::Issuance {
            message: "no attempt made".to_string(),
        };
        for attempt in 1..=MINT_ATTEMPTS {
            match self.codec.issue(principal, self.token_ttl) {
                Ok(token) => {
                    let reuse_for =
                        (self.token_ttl.as_millis() as f64 * REUSE_FRACTION) as i64;
                    self.minted.insert(
                        principal.username.clone(),
                        MintedToken {
                            token: token.clone(),
                            reuse_until_ms: now_ms + reuse_for,
                        },
                    );
                    return Ok(token);
                }
                Err(e) => {
                    warn!(
                        username = %principal.username,
                        attempt,
                        error = %e,
                        "token minting failed"
                    );
                    last_error = e;
                    if attempt < MINT_ATTEMPTS {
                        tokio::time::sleep(MINT_BACKOFF).await;
                    }
                }
            }
        }
        Err(CoreError::Token(last_error))
    }
}

fn insert_ascii<T>(request: &mut Request<T>, key: &'static str, value: &str) -> Result<(), CoreError> {
    let value = MetadataValue::try_from(value)
        .map_err(|e| CoreError::unexpected("outbound-metadata", e.to_string()))?;
    request.metadata_mut().insert(key, value);
    Ok(())
}

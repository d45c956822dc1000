//! Signed-token codec.
//!
//! Produces and verifies compact HMAC-signed tokens carrying the claim set
//! both services agree on: `sub`, `iss`, `aud`, `iat`, `exp`, `roles`, `jti`.
//! Verification is a pure function over (key, token, now); the codec holds no
//! mutable state and is safe to share across requests.
//!
//! Expiry is strict: a token whose `exp` equals the current second is already
//! expired. Clock skew is tolerated only through the explicitly configured
//! leeway (zero by default), and every time comparison goes through the
//! injected [`Clock`].

use std::time::Duration;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::principal::Principal;
use crate::clock::SharedClock;
use crate::config::{ConfigError, JwtConfig};

/// Verified claim set carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the principal's username.
    pub sub: String,
    /// Issuer; must match the configured value.
    pub iss: String,
    /// Audience; must match the configured value.
    pub aud: String,
    /// Issue time, epoch seconds.
    pub iat: i64,
    /// Expiry, epoch seconds, strictly greater than `iat`.
    pub exp: i64,
    /// Role strings; absent on the wire means empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Unique token id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// Decoded shape before mandatory-claim checks, so a missing claim is
/// reported as such instead of as a parse failure.
#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: Option<String>,
    iss: Option<String>,
    aud: Option<String>,
    iat: Option<i64>,
    exp: Option<i64>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    jti: Option<String>,
}

/// Token failures, distinct per cause. All map to `UNAUTHENTICATED` on the
/// wire except issuance, which only occurs server-side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Not a structurally valid token.
    #[error("malformed token")]
    Malformed,

    /// Signature did not verify under the configured key and algorithm.
    #[error("bad token signature")]
    BadSignature,

    /// `now >= exp` (after leeway).
    #[error("token expired")]
    Expired,

    /// `iss` does not match the configured issuer.
    #[error("wrong token issuer")]
    WrongIssuer,

    /// `aud` does not match the configured audience.
    #[error("wrong token audience")]
    WrongAudience,

    /// A mandatory claim is absent or empty.
    #[error("missing required claim: {claim}")]
    MissingRequiredClaim {
        /// The absent claim name
        claim: &'static str,
    },

    /// Token could not be produced.
    #[error("token issuance failed: {message}")]
    Issuance {
        /// Why signing failed
        message: String,
    },
}

/// Encoder/decoder for signed tokens.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    header: Header,
    validation: Validation,
    issuer: String,
    audience: String,
    leeway_secs: i64,
    clock: SharedClock,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec from the JWT configuration. Fails when the key is
    /// unusable (not base64, or under 256 bits).
    pub fn new(config: &JwtConfig, clock: SharedClock) -> Result<Self, ConfigError> {
        let key = config.signing_key()?;
        let algorithm: jsonwebtoken::Algorithm = config.algorithm.into();

        // Issuer, audience, and expiry are checked below against the
        // injected clock, so the library's own wall-clock checks stay off.
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Ok(Self {
            encoding_key: EncodingKey::from_secret(&key),
            decoding_key: DecodingKey::from_secret(&key),
            header: Header::new(algorithm),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            leeway_secs: config.leeway.as_secs() as i64,
            clock,
        })
    }

    /// Issue a token for a principal with the given lifetime.
    pub fn issue(&self, principal: &Principal, ttl: Duration) -> Result<String, TokenError> {
        if ttl.as_secs() == 0 {
            return Err(TokenError::Issuance {
                message: "ttl must be at least one second".to_string(),
            });
        }

        let now = self.clock.now_secs();
        let claims = Claims {
            sub: principal.username.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
            roles: principal.authorities.clone(),
            jti: Some(Uuid::new_v4().to_string()),
        };

        encode(&self.header, &claims, &self.encoding_key).map_err(|e| TokenError::Issuance {
            message: e.to_string(),
        })
    }

    /// Verify a token: structure, signature, mandatory claims, issuer,
    /// audience, and expiry, in that order.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<RawClaims>(token, &self.decoding_key, &self.validation)
            .map_err(map_decode_error)?;
        let raw = data.claims;

        let sub = raw
            .sub
            .filter(|s| !s.is_empty())
            .ok_or(TokenError::MissingRequiredClaim { claim: "sub" })?;
        let iss = raw
            .iss
            .ok_or(TokenError::MissingRequiredClaim { claim: "iss" })?;
        let aud = raw
            .aud
            .ok_or(TokenError::MissingRequiredClaim { claim: "aud" })?;
        let iat = raw
            .iat
            .ok_or(TokenError::MissingRequiredClaim { claim: "iat" })?;
        let exp = raw
            .exp
            .ok_or(TokenError::MissingRequiredClaim { claim: "exp" })?;

        if iss != self.issuer {
            return Err(TokenError::WrongIssuer);
        }
        if aud != self.audience {
            return Err(TokenError::WrongAudience);
        }
        if self.clock.now_secs() >= exp + self.leeway_secs {
            return Err(TokenError::Expired);
        }

        Ok(Claims {
            sub,
            iss,
            aud,
            iat,
            exp,
            roles: raw.roles,
            jti: raw.jti,
        })
    }

}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::BadSignature,
        _ => TokenError::Malformed,
    }
}

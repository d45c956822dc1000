//! Typed configuration surface for the services.
//!
//! Each struct mirrors a group of `MERIDIAN_*` environment variables and
//! carries the documented defaults. Channel and resilience settings live with
//! their components in [`crate::fabric`]; this module owns the security and
//! cache surface.

use std::collections::HashSet;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

/// Minimum symmetric key length: 256 bits.
const MIN_KEY_BYTES: usize = 32;

/// Default token lifetime: 24 hours.
const DEFAULT_EXPIRATION_MS: u64 = 86_400_000;

/// Configuration errors surfaced at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is absent.
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    /// A variable is present but unparseable.
    #[error("invalid value for {name}: {message}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// The signing key decodes to fewer than 256 bits.
    #[error("jwt secret must decode to at least {MIN_KEY_BYTES} bytes")]
    WeakKey,
}

/// MAC algorithm used to sign tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenAlgorithm {
    /// HMAC-SHA256
    Hs256,
    /// HMAC-SHA384
    Hs384,
    /// HMAC-SHA512 (default)
    #[default]
    Hs512,
}

impl From<TokenAlgorithm> for jsonwebtoken::Algorithm {
    fn from(alg: TokenAlgorithm) -> Self {
        match alg {
            TokenAlgorithm::Hs256 => jsonwebtoken::Algorithm::HS256,
            TokenAlgorithm::Hs384 => jsonwebtoken::Algorithm::HS384,
            TokenAlgorithm::Hs512 => jsonwebtoken::Algorithm::HS512,
        }
    }
}

/// Token issuance and verification settings.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Base64-encoded symmetric key; must decode to ≥ 256 bits.
    pub secret_base64: String,
    /// Expected `iss` claim.
    pub issuer: String,
    /// Expected `aud` claim.
    pub audience: String,
    /// Lifetime of issued tokens.
    pub expiration: Duration,
    /// Clock-skew tolerance applied to expiry checks. Zero by default.
    pub leeway: Duration,
    /// MAC algorithm.
    pub algorithm: TokenAlgorithm,
}

impl JwtConfig {
    /// Build a config with defaults around the given secret.
    pub fn new(secret_base64: impl Into<String>) -> Self {
        Self {
            secret_base64: secret_base64.into(),
            issuer: "meridian-identity".to_string(),
            audience: "meridian-services".to_string(),
            expiration: Duration::from_millis(DEFAULT_EXPIRATION_MS),
            leeway: Duration::ZERO,
            algorithm: TokenAlgorithm::default(),
        }
    }

    /// Load from `MERIDIAN_JWT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = std::env::var("MERIDIAN_JWT_SECRET")
            .map_err(|_| ConfigError::Missing("MERIDIAN_JWT_SECRET"))?;
        let mut config = Self::new(secret);
        if let Ok(issuer) = std::env::var("MERIDIAN_JWT_ISSUER") {
            config.issuer = issuer;
        }
        if let Ok(audience) = std::env::var("MERIDIAN_JWT_AUDIENCE") {
            config.audience = audience;
        }
        if let Ok(ms) = std::env::var("MERIDIAN_JWT_EXPIRATION_MS") {
            let ms: u64 = ms.parse().map_err(|e| ConfigError::Invalid {
                name: "MERIDIAN_JWT_EXPIRATION_MS",
                message: format!("{e}"),
            })?;
            config.expiration = Duration::from_millis(ms);
        }
        if let Ok(secs) = std::env::var("MERIDIAN_JWT_LEEWAY_SECS") {
            let secs: u64 = secs.parse().map_err(|e| ConfigError::Invalid {
                name: "MERIDIAN_JWT_LEEWAY_SECS",
                message: format!("{e}"),
            })?;
            config.leeway = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that must hold before a service starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Invalid {
                name: "MERIDIAN_JWT_ISSUER",
                message: "must not be empty".into(),
            });
        }
        if self.audience.is_empty() {
            return Err(ConfigError::Invalid {
                name: "MERIDIAN_JWT_AUDIENCE",
                message: "must not be empty".into(),
            });
        }
        if self.expiration.is_zero() {
            return Err(ConfigError::Invalid {
                name: "MERIDIAN_JWT_EXPIRATION_MS",
                message: "must be positive".into(),
            });
        }
        self.signing_key().map(|_| ())
    }

    /// Decode the symmetric key, enforcing the minimum length.
    pub fn signing_key(&self) -> Result<Vec<u8>, ConfigError> {
        let bytes = BASE64
            .decode(self.secret_base64.as_bytes())
            .map_err(|e| ConfigError::Invalid {
                name: "MERIDIAN_JWT_SECRET",
                message: format!("not valid base64: {e}"),
            })?;
        if bytes.len() < MIN_KEY_BYTES {
            return Err(ConfigError::WeakKey);
        }
        Ok(bytes)
    }
}

/// Server-side security posture, uniform for the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerAuthMode {
    /// Pass everything through; no token handling.
    None,
    /// Tokens must verify when required, but no principal is resolved.
    BasicValidation,
    /// Verify, resolve a principal, and enforce per-method policy (default).
    #[default]
    Full,
}

impl std::str::FromStr for ServerAuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "basic" | "basic_validation" => Ok(Self::BasicValidation),
            "full" => Ok(Self::Full),
            other => Err(ConfigError::Invalid {
                name: "MERIDIAN_SERVER_AUTH_MODE",
                message: format!("unknown mode: {other}"),
            }),
        }
    }
}

/// Client-side token handling for outgoing calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientAuthMode {
    /// Attach nothing.
    None,
    /// Reuse the caller's token, minting one when absent (default).
    #[default]
    Propagate,
    /// As `Propagate`, plus re-verify locally before sending.
    Validate,
}

impl std::str::FromStr for ClientAuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "propagate" => Ok(Self::Propagate),
            "validate" => Ok(Self::Validate),
            other => Err(ConfigError::Invalid {
                name: "MERIDIAN_CLIENT_AUTH_MODE",
                message: format!("unknown mode: {other}"),
            }),
        }
    }
}

/// Security settings for one service process.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Server posture.
    pub server_mode: ServerAuthMode,
    /// Outgoing-call posture.
    pub client_mode: ClientAuthMode,
    /// Fully-qualified method names that bypass authentication and
    /// authorization entirely.
    pub excluded_methods: HashSet<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            server_mode: ServerAuthMode::default(),
            client_mode: ClientAuthMode::default(),
            excluded_methods: [
                meridian_proto::methods::CREATE_USER,
                meridian_proto::methods::IDENTITY_HEALTH_CHECK,
                meridian_proto::methods::ORDERS_HEALTH_CHECK,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl SecurityConfig {
    /// Defaults overridden by `MERIDIAN_SERVER_AUTH_MODE`,
    /// `MERIDIAN_CLIENT_AUTH_MODE`, and `MERIDIAN_EXCLUDED_METHODS`
    /// (comma-separated fully-qualified method names).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(mode) = std::env::var("MERIDIAN_SERVER_AUTH_MODE") {
            config.server_mode = mode.parse()?;
        }
        if let Ok(mode) = std::env::var("MERIDIAN_CLIENT_AUTH_MODE") {
            config.client_mode = mode.parse()?;
        }
        if let Ok(methods) = std::env::var("MERIDIAN_EXCLUDED_METHODS") {
            config.excluded_methods = methods
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(config)
    }
}

/// Validation-cache TTLs.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtlConfig {
    /// TTL for entries written when an account is created.
    pub post_create: Duration,
    /// TTL for entries written after an authoritative lookup.
    pub post_lookup: Duration,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            post_create: Duration::from_secs(24 * 60 * 60),
            post_lookup: Duration::from_secs(30 * 60),
        }
    }
}

impl CacheTtlConfig {
    /// Defaults overridden by `MERIDIAN_CACHE_POST_CREATE_TTL_SECS` and
    /// `MERIDIAN_CACHE_POST_LOOKUP_TTL_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(secs) = std::env::var("MERIDIAN_CACHE_POST_CREATE_TTL_SECS") {
            config.post_create =
                Duration::from_secs(secs.parse().map_err(|e| ConfigError::Invalid {
                    name: "MERIDIAN_CACHE_POST_CREATE_TTL_SECS",
                    message: format!("{e}"),
                })?);
        }
        if let Ok(secs) = std::env::var("MERIDIAN_CACHE_POST_LOOKUP_TTL_SECS") {
            config.post_lookup =
                Duration::from_secs(secs.parse().map_err(|e| ConfigError::Invalid {
                    name: "MERIDIAN_CACHE_POST_LOOKUP_TTL_SECS",
                    message: format!("{e}"),
                })?);
        }
        Ok(config)
    }
}

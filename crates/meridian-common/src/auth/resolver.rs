//! Principal resolution.
//!
//! Converts a verified claim set into a [`Principal`], consulting a user
//! directory by token subject when one is configured. Directory results are
//! cached per username with a bounded TTL (default five minutes) so a hot
//! caller does not pay a directory round trip on every RPC. There is no
//! invalidation channel; a stale entry simply ages out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::auth::principal::{AccountStatus, Principal};
use crate::auth::server::CallContext;
use crate::auth::token::Claims;
use crate::clock::SharedClock;
use crate::error::CoreError;

/// Default lifetime of a cached principal.
pub const DEFAULT_PRINCIPAL_TTL: Duration = Duration::from_secs(5 * 60);

/// Failed logins at or above this count lock the account.
const MAX_FAILED_LOGINS: u32 = 5;

/// A user as the directory reports it.
#[derive(Debug, Clone)]
pub struct DirectoryUser {
    /// Stable identifier.
    pub user_id: String,
    /// Unique username; the token subject.
    pub username: String,
    /// Granted authorities.
    pub authorities: Vec<String>,
    /// Deactivated accounts resolve to an error.
    pub is_active: bool,
    /// Email verification state (feeds the order-eligibility predicate).
    pub is_email_verified: bool,
    /// Consecutive failed logins.
    pub failed_login_attempts: u32,
    /// Explicit lockout deadline, when set.
    pub locked_until: Option<DateTime<Utc>>,
}

impl DirectoryUser {
    /// Current standing, considering deactivation and lockouts.
    pub fn account_status(&self, now: DateTime<Utc>) -> AccountStatus {
        if !self.is_active {
            return AccountStatus::Disabled;
        }
        if self.failed_login_attempts >= MAX_FAILED_LOGINS {
            return AccountStatus::Locked;
        }
        if self.locked_until.is_some_and(|until| until > now) {
            return AccountStatus::Locked;
        }
        AccountStatus::Active
    }

    /// Eligibility predicate for order creation: active, email verified, and
    /// below the failed-login threshold.
    pub fn is_valid_for_order(&self) -> bool {
        self.is_active && self.is_email_verified && self.failed_login_attempts < MAX_FAILED_LOGINS
    }
}

/// Lookup interface the resolver consults by username.
///
/// The current request's [`CallContext`] rides along so remote directories
/// can propagate the caller's credentials and correlation id.
#[tonic::async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fetch a user by username. `Ok(None)` means the subject is unknown.
    async fn lookup(
        &self,
        username: &str,
        context: &CallContext,
    ) -> Result<Option<DirectoryUser>, CoreError>;
}

struct CachedPrincipal {
    principal: Principal,
    expires_at_ms: i64,
}

/// Turns verified claims into a [`Principal`].
pub struct PrincipalResolver {
    directory: Option<Arc<dyn UserDirectory>>,
    cache: DashMap<String, CachedPrincipal>,
    ttl: Duration,
    clock: SharedClock,
}

impl PrincipalResolver {
    /// Resolver backed by a directory.
    pub fn new(directory: Arc<dyn UserDirectory>, clock: SharedClock) -> Self {
        Self {
            directory: Some(directory),
            cache: DashMap::new(),
            ttl: DEFAULT_PRINCIPAL_TTL,
            clock,
        }
    }

    /// Resolver with no directory: claims are trusted verbatim.
    pub fn from_claims_only(clock: SharedClock) -> Self {
        Self {
            directory: None,
            cache: DashMap::new(),
            ttl: DEFAULT_PRINCIPAL_TTL,
            clock,
        }
    }

    /// Override the cache TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Resolve claims into a principal.
    ///
    /// With a directory configured, the returned principal reflects the
    /// currently stored account: unknown subjects fail with
    /// [`CoreError::UnknownSubject`], disabled or locked accounts with
    /// [`CoreError::AccountDisabled`]. Resolution failures are never retried.
    pub async fn resolve(
        &self,
        claims: &Claims,
        context: &CallContext,
    ) -> Result<Principal, CoreError> {
        let Some(directory) = &self.directory else {
            return Ok(self.resolve_from_claims(claims));
        };

        let now_ms = self.clock.now_millis();
        if let Some(entry) = self.cache.get(&claims.sub) {
            if entry.expires_at_ms > now_ms {
                return Ok(entry.principal.clone());
            }
        }
        self.cache
            .remove_if(&claims.sub, |_, e| e.expires_at_ms <= now_ms);

        let user = directory
            .lookup(&claims.sub, context)
            .await?
            .ok_or_else(|| CoreError::UnknownSubject {
                subject: claims.sub.clone(),
            })?;

        let status = user.account_status(self.clock.now_utc());
        if status != AccountStatus::Active {
            debug!(username = %user.username, status = ?status, "rejecting non-active account");
            return Err(CoreError::AccountDisabled {
                subject: user.username,
            });
        }

        let principal = Principal {
            user_id: user.user_id,
            username: user.username,
            authorities: user.authorities,
            account_status: status,
        };
        self.cache.insert(
            claims.sub.clone(),
            CachedPrincipal {
                principal: principal.clone(),
                expires_at_ms: now_ms + self.ttl.as_millis() as i64,
            },
        );
        Ok(principal)
    }

    /// Build a principal from claims alone, trusting them verbatim.
    pub fn resolve_from_claims(&self, claims: &Claims) -> Principal {
        Principal {
            user_id: claims.sub.clone(),
            username: claims.sub.clone(),
            authorities: claims.roles.clone(),
            account_status: AccountStatus::Active,
        }
    }
}

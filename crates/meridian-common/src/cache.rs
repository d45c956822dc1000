//! Read-through user-validation cache.
//!
//! Maps a user id to the order-eligibility boolean. Entries written on the
//! account-creation path live 24 hours; entries written after an
//! authoritative lookup live 30 minutes. The store is an abstraction so a
//! store failure can be treated as a miss: callers always get an answer, the
//! RPC never fails on cache errors.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::config::CacheTtlConfig;
use crate::error::CoreError;

const KEY_PREFIX: &str = "user:valid:";

/// Store-level failure. Never fatal to a request.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store could not be reached or refused the operation.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value store with per-entry TTL.
#[tonic::async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry. Expired entries are absent.
    async fn get(&self, key: &str) -> Result<Option<bool>, CacheError>;

    /// Write an entry with a TTL.
    async fn put(&self, key: &str, value: bool, ttl: Duration) -> Result<(), CacheError>;
}

struct Entry {
    value: bool,
    expires_at_ms: i64,
}

/// In-process store on a concurrent map.
pub struct MemoryCacheStore {
    entries: DashMap<String, Entry>,
    clock: SharedClock,
}

impl MemoryCacheStore {
    /// Build an empty store.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

#[tonic::async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<bool>, CacheError> {
        let now_ms = self.clock.now_millis();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at_ms > now_ms {
                return Ok(Some(entry.value));
            }
        }
        self.entries.remove_if(key, |_, e| e.expires_at_ms <= now_ms);
        Ok(None)
    }

    async fn put(&self, key: &str, value: bool, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at_ms: self.clock.now_millis() + ttl.as_millis() as i64,
            },
        );
        Ok(())
    }
}

/// Read-through cache over a [`CacheStore`].
pub struct ValidationCache {
    store: Arc<dyn CacheStore>,
    ttl: CacheTtlConfig,
}

impl ValidationCache {
    /// Build the cache.
    pub fn new(store: Arc<dyn CacheStore>, ttl: CacheTtlConfig) -> Self {
        Self { store, ttl }
    }

    /// Answer the eligibility question for a user.
    ///
    /// A live entry is returned without consulting `authoritative`. On miss,
    /// expiry, or store failure the authoritative lookup runs and its result
    /// is cached with the post-lookup TTL. Store failures on either side are
    /// logged and otherwise ignored.
    pub async fn is_valid_for_order<F, Fut>(
        &self,
        user_id: &str,
        authoritative: F,
    ) -> Result<bool, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool, CoreError>>,
    {
        let key = format!("{KEY_PREFIX}{user_id}");

        match self.store.get(&key).await {
            Ok(Some(value)) => {
                debug!(user_id = %user_id, valid = value, "validation cache hit");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "validation cache read failed, falling through");
            }
        }

        let value = authoritative().await?;
        if let Err(e) = self.store.put(&key, value, self.ttl.post_lookup).await {
            warn!(user_id = %user_id, error = %e, "validation cache write failed");
        }
        Ok(value)
    }

    /// Prime the cache on the account-creation path with the long TTL.
    pub async fn prime(&self, user_id: &str, valid: bool) {
        let key = format!("{KEY_PREFIX}{user_id}");
        if let Err(e) = self.store.put(&key, valid, self.ttl.post_create).await {
            warn!(user_id = %user_id, error = %e, "validation cache prime failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingStore;

    #[tonic::async_trait]
    impl CacheStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<bool>, CacheError> {
            Err(CacheError::Unavailable("store down".into()))
        }

        async fn put(&self, _key: &str, _value: bool, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("store down".into()))
        }
    }

    fn cache_with_clock(clock: SharedClock) -> ValidationCache {
        ValidationCache::new(
            Arc::new(MemoryCacheStore::new(clock)),
            CacheTtlConfig::default(),
        )
    }

    #[tokio::test]
    async fn miss_runs_authoritative_lookup_and_caches() {
        let clock = ManualClock::at(0);
        let cache = cache_with_clock(clock);
        let lookups = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let l = lookups.clone();
            let valid = cache
                .is_valid_for_order("u-1", || async move {
                    l.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                })
                .await
                .unwrap();
            assert!(valid);
        }
        // Second call was served from cache.
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lookup_entry_expires_after_thirty_minutes() {
        let clock = ManualClock::at(0);
        let cache = cache_with_clock(clock.clone());
        let lookups = Arc::new(AtomicU32::new(0));

        let l = lookups.clone();
        cache
            .is_valid_for_order("u-1", || async move {
                l.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            })
            .await
            .unwrap();

        clock.advance(Duration::from_secs(30 * 60 + 1));

        let l = lookups.clone();
        let valid = cache
            .is_valid_for_order("u-1", || async move {
                l.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })
            .await
            .unwrap();
        assert!(valid);
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn primed_entry_lives_a_full_day() {
        let clock = ManualClock::at(0);
        let cache = cache_with_clock(clock.clone());
        cache.prime("u-1", true).await;

        clock.advance(Duration::from_secs(23 * 60 * 60));
        let valid = cache
            .is_valid_for_order("u-1", || async {
                panic!("lookup must not run inside the primed ttl")
            })
            .await
            .unwrap();
        assert!(valid);

        clock.advance(Duration::from_secs(60 * 60 + 1));
        let valid = cache
            .is_valid_for_order("u-1", || async { Ok(false) })
            .await
            .unwrap();
        assert!(!valid);
    }

    #[tokio::test]
    async fn store_failure_falls_through_to_authoritative_lookup() {
        let cache = ValidationCache::new(Arc::new(FailingStore), CacheTtlConfig::default());

        let valid = cache
            .is_valid_for_order("u-1", || async { Ok(true) })
            .await
            .unwrap();
        assert!(valid);

        // Priming against a dead store is silently dropped.
        cache.prime("u-1", false).await;
    }

    #[tokio::test]
    async fn authoritative_errors_propagate() {
        let clock = ManualClock::at(0);
        let cache = cache_with_clock(clock);
        let result = cache
            .is_valid_for_order("u-1", || async {
                Err(CoreError::unexpected("store", "load failed"))
            })
            .await;
        assert!(result.is_err());
    }
}

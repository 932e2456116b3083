//! Result Cache
//!
//! TTL-bounded map from (request fingerprint, handler id) to a previously
//! computed [`HandlerResult`].
//!
//! # Eviction
//!
//! Expiry is lazy: an entry older than the TTL is removed the next time it
//! is looked up. Nothing sweeps in the background. [`ResultCache::purge_expired`]
//! exists for callers that want to reclaim memory explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::handler::HandlerResult;

/// Deterministic fingerprint of request text (hex SHA-256)
#[must_use]
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Cache key: one request against one handler
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Request fingerprint
    pub fingerprint: String,
    /// Handler id
    pub handler_id: String,
}

impl CacheKey {
    /// Build a key
    pub fn new(fingerprint: impl Into<String>, handler_id: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            handler_id: handler_id.into(),
        }
    }
}

/// A cached result and when it was stored
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached result
    pub result: HandlerResult,
    /// Insertion time
    pub inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= ttl
    }
}

/// Cache statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups that returned a live entry
    pub hits: u64,
    /// Lookups that found nothing live
    pub misses: u64,
    /// Entries removed because they expired
    pub evictions: u64,
    /// Entries currently stored (including expired ones not yet read)
    pub entries: usize,
    /// hits / (hits + misses)
    pub hit_rate: f64,
    /// Configured TTL in seconds
    pub ttl_secs: u64,
}

/// Thread-safe TTL cache
pub struct ResultCache {
    ttl: Duration,
    entries: DashMap<CacheKey, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    /// Create a cache with the given TTL
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Configured TTL
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live result, evicting it if it has expired
    #[must_use]
    pub fn get(&self, fingerprint: &str, handler_id: &str) -> Option<HandlerResult> {
        let key = CacheKey::new(fingerprint, handler_id);
        let now = Instant::now();

        let live = match self.entries.get(&key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => Some(entry.result.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(handler = handler_id, "Cache miss");
                return None;
            }
        };

        if live.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(handler = handler_id, "Cache hit");
            return live;
        }

        // Read guard is released above; safe to take the shard write lock
        if self
            .entries
            .remove_if(&key, |_, entry| entry.is_expired(self.ttl, now))
            .is_some()
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(handler = handler_id, "Evicted expired cache entry");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a result, replacing any existing entry
    ///
    /// Callers decide whether the handler allows caching.
    pub fn put(&self, fingerprint: &str, handler_id: &str, result: HandlerResult) {
        self.entries.insert(
            CacheKey::new(fingerprint, handler_id),
            CacheEntry {
                result,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry for one handler
    pub fn invalidate_handler(&self, handler_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.handler_id != handler_id);
        before.saturating_sub(self.entries.len())
    }

    /// Remove all expired entries now
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.is_expired(self.ttl, now));
        let purged = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    /// Remove everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups > 0 {
            hits as f64 / lookups as f64
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
            hit_rate,
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ResultKind;

    fn result(id: &str) -> HandlerResult {
        HandlerResult::new(id, ResultKind::Analysis, serde_json::json!({"ok": true}), 0.9)
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(fingerprint("hello"), fingerprint("hello"));
        assert_ne!(fingerprint("hello"), fingerprint("Hello"));
        assert_eq!(fingerprint("").len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_then_get() {
        let cache = ResultCache::new(Duration::from_secs(60));
        let fp = fingerprint("design an api");
        cache.put(&fp, "api", result("api"));

        assert_eq!(cache.get(&fp, "api"), Some(result("api")));
        assert_eq!(cache.get(&fp, "security"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_ttl_and_is_evicted() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.put("fp", "api", result("api"));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("fp", "api").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("fp", "api").is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_refreshes_timestamp() {
        let cache = ResultCache::new(Duration::from_secs(10));
        cache.put("fp", "api", result("api"));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put("fp", "api", result("api"));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert!(cache.get("fp", "api").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_lazy_until_purged() {
        let cache = ResultCache::new(Duration::from_secs(1));
        cache.put("fp-1", "api", result("api"));
        cache.put("fp-2", "api", result("api"));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_handler() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.put("fp", "api", result("api"));
        cache.put("fp", "security", result("security"));

        assert_eq!(cache.invalidate_handler("api"), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("fp", "security").is_some());
    }
}

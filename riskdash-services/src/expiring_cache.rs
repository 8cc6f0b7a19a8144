//! Expiring Cache
//!
//! In-memory key/value store with a per-entry time-to-live. Expired entries
//! are purged lazily on read and, when running inside a tokio runtime,
//! proactively by a deferred cleanup task scheduled on insert.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::clock::SharedClock;

/// Shortest TTL accepted; keeps `expires_at` strictly after `stored_at`
const MIN_TTL: Duration = Duration::from_millis(1);

/// Cached value with its lifetime
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    /// Distinguishes successive entries stored under the same key
    generation: u64,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

type EntryMap<V> = Arc<RwLock<HashMap<String, CacheEntry<V>>>>;

/// Key/value store with per-entry expiry
pub struct ExpiringCache<V> {
    entries: EntryMap<V>,
    clock: SharedClock,
    next_generation: AtomicU64,
    proactive_eviction: bool,
}

impl<V> ExpiringCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache reading time from `clock`, with proactive eviction on
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
            next_generation: AtomicU64::new(1),
            proactive_eviction: true,
        }
    }

    /// Enable or disable deferred cleanup tasks (lazy eviction always applies)
    pub fn with_proactive_eviction(mut self, enabled: bool) -> Self {
        self.proactive_eviction = enabled;
        self
    }

    /// Insert or overwrite `key`, replacing both value and expiry
    pub fn store(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let ttl = ttl.max(MIN_TTL);
        let stored_at = self.clock.now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| stored_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        self.entries.write().insert(
            key.clone(),
            CacheEntry {
                value,
                stored_at,
                expires_at,
                generation,
            },
        );
        trace!("Cached {} (generation {}) for {:?}", key, generation, ttl);

        if self.proactive_eviction {
            self.schedule_cleanup(key, generation, ttl);
        }
    }

    /// Get the value for `key` if it has not expired
    ///
    /// An expired entry found here is removed before returning `None`.
    pub fn fetch(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        {
            let read = self.entries.read();
            match read.get(key) {
                Some(entry) if entry.is_fresh(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Re-check under the write lock: the entry may have been replaced
        let mut write = self.entries.write();
        if let Some(entry) = write.get(key) {
            if entry.is_fresh(now) {
                return Some(entry.value.clone());
            }
            write.remove(key);
            debug!("Evicted expired cache entry {} on read", key);
        }
        None
    }

    /// Remove `key` regardless of expiry
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut write = self.entries.write();
        let before = write.len();
        write.retain(|_, entry| entry.is_fresh(now));
        let purged = before - write.len();
        if purged > 0 {
            debug!("Purged {} expired cache entries", purged);
        }
        purged
    }

    /// Number of physically stored entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let read = self.entries.read();

        let total = read.len();
        let fresh = read.values().filter(|e| e.is_fresh(now)).count();
        let oldest_entry = read.values().map(|e| e.stored_at).min();

        CacheStats {
            total,
            fresh,
            stale: total - fresh,
            oldest_entry,
        }
    }

    fn schedule_cleanup(&self, key: String, generation: u64, ttl: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let entries = Arc::clone(&self.entries);
        let clock = Arc::clone(&self.clock);
        handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            evict_if_current(&entries, &key, generation, clock.now());
        });
    }
}

/// Remove `key` only if it still holds `generation` and has expired
///
/// Deferred cleanups race with re-stores of the same key; the generation
/// check makes a stale cleanup a no-op instead of evicting the newer entry.
fn evict_if_current<V>(
    entries: &RwLock<HashMap<String, CacheEntry<V>>>,
    key: &str,
    generation: u64,
    now: DateTime<Utc>,
) -> bool {
    let mut write = entries.write();
    match write.get(key) {
        Some(entry) if entry.generation == generation && !entry.is_fresh(now) => {
            write.remove(key);
            trace!("Deferred cleanup evicted {} (generation {})", key, generation);
            true
        }
        _ => false,
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub total: usize,
    pub fresh: usize,
    pub stale: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
}

impl<V> std::fmt::Debug for ExpiringCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("entries", &self.entries.read().len())
            .field("proactive_eviction", &self.proactive_eviction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use serde_json::json;

    fn manual_cache() -> (Arc<ManualClock>, ExpiringCache<serde_json::Value>) {
        let clock = Arc::new(ManualClock::default());
        let cache = ExpiringCache::new(clock.clone()).with_proactive_eviction(false);
        (clock, cache)
    }

    #[test]
    fn test_fetch_before_and_after_expiry() {
        let (clock, cache) = manual_cache();

        cache.store("m", json!({"x": 1}), Duration::from_secs(5));
        assert_eq!(cache.fetch("m"), Some(json!({"x": 1})));

        clock.advance(chrono::Duration::seconds(6));
        assert_eq!(cache.fetch("m"), None);
        // Lazy eviction removed it physically too
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expires_exactly_at_ttl() {
        let (clock, cache) = manual_cache();

        cache.store("k", json!(1), Duration::from_secs(5));
        clock.advance(chrono::Duration::milliseconds(4_999));
        assert!(cache.fetch("k").is_some());

        clock.advance(chrono::Duration::milliseconds(1));
        assert!(cache.fetch("k").is_none());
    }

    #[test]
    fn test_overwrite_replaces_value_and_expiry() {
        let (clock, cache) = manual_cache();

        cache.store("k", json!("old"), Duration::from_secs(10));
        clock.advance(chrono::Duration::seconds(5));
        cache.store("k", json!("new"), Duration::from_secs(2));
        assert_eq!(cache.fetch("k"), Some(json!("new")));

        // Old expiry would still be 5s away; new one has passed
        clock.advance(chrono::Duration::seconds(3));
        assert_eq!(cache.fetch("k"), None);
    }

    #[test]
    fn test_stale_cleanup_does_not_evict_newer_entry() {
        let (clock, cache) = manual_cache();

        cache.store("k", json!("first"), Duration::from_secs(1));
        let first_generation = cache.entries.read()["k"].generation;
        cache.store("k", json!("second"), Duration::from_secs(60));

        clock.advance(chrono::Duration::seconds(2));
        let evicted = evict_if_current(&cache.entries, "k", first_generation, clock.now());

        assert!(!evicted);
        assert_eq!(cache.fetch("k"), Some(json!("second")));
    }

    #[test]
    fn test_cleanup_after_eviction_is_noop() {
        let (clock, cache) = manual_cache();

        cache.store("k", json!(1), Duration::from_secs(1));
        let generation = cache.entries.read()["k"].generation;
        clock.advance(chrono::Duration::seconds(2));

        assert!(evict_if_current(&cache.entries, "k", generation, clock.now()));
        assert!(!evict_if_current(&cache.entries, "k", generation, clock.now()));
    }

    #[test]
    fn test_purge_and_stats() {
        let (clock, cache) = manual_cache();

        cache.store("short", json!(1), Duration::from_secs(1));
        cache.store("long", json!(2), Duration::from_secs(60));
        clock.advance(chrono::Duration::seconds(2));

        let stats = cache.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.fresh, 1);
        assert_eq!(stats.stale, 1);

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.fetch("long").is_some());
    }

    #[test]
    fn test_zero_ttl_is_clamped() {
        let (clock, cache) = manual_cache();

        cache.store("k", json!(1), Duration::ZERO);
        let entry = cache.entries.read()["k"].clone();
        assert!(entry.expires_at > entry.stored_at);

        clock.advance(chrono::Duration::milliseconds(1));
        assert!(cache.fetch("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_proactive_eviction_removes_without_read() {
        let clock = Arc::new(ManualClock::default());
        let cache: ExpiringCache<u32> = ExpiringCache::new(clock.clone());

        cache.store("k", 7, Duration::from_secs(1));
        clock.advance(chrono::Duration::seconds(2));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proactive_eviction_spares_overwritten_key() {
        let clock = Arc::new(ManualClock::default());
        let cache: ExpiringCache<u32> = ExpiringCache::new(clock.clone());

        cache.store("k", 1, Duration::from_secs(1));
        cache.store("k", 2, Duration::from_secs(30));
        clock.advance(chrono::Duration::seconds(2));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(cache.fetch("k"), Some(2));
    }
}

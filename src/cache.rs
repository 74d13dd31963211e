//! # TTL Cache for dashboard-provider
//!
//! This module implements the keyed cache shared by every source of a scheduler:
//! - **Per-entry TTL**: Each entry carries its own time-to-live, set when it is stored.
//! - **Lazy expiry**: An expired entry is reported as absent by [`TtlCache::get`] but is
//!   kept so the fallback path can still serve it through [`TtlCache::get_stale_or_none`].
//! - **Maintenance**: [`TtlCache::purge_expired`] drops expired entries on demand; there is
//!   no background sweep.
//! - **Stats**: Hit/miss counters for introspection and tuning.
//!
//! ## Example
//! ```rust
//! use dashboard_provider::cache::TtlCache;
//! use dashboard_provider::clock::ManualClock;
//! use std::time::Duration;
//!
//! let clock = ManualClock::new();
//! let cache = TtlCache::with_clock(clock.clone());
//! cache.set("idx", 100u32, Duration::from_secs(5));
//! assert_eq!(cache.get("idx"), Some(100));
//!
//! clock.advance(Duration::from_secs(5));
//! assert_eq!(cache.get("idx"), None);
//! assert_eq!(cache.get_stale_or_none("idx"), Some(100));
//! ```

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;

use crate::{
    clock::{Clock, TokioClock},
    types::SourceValueBounds,
};

/// A cached value with the time it was stored and how long it stays fresh
///
/// Entries are replaced wholesale on refresh and never mutated in place.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Creates a new cache entry.
    ///
    /// # Arguments
    ///
    /// * `value` - The value to cache.
    /// * `stored_at` - The instant the value was stored.
    /// * `ttl` - How long the value stays fresh.
    pub fn new(value: V, stored_at: Instant, ttl: Duration) -> Self {
        Self {
            value,
            stored_at,
            ttl,
        }
    }

    /// The cached value, fresh or not
    pub fn value(&self) -> &V {
        &self.value
    }

    /// The instant the value was stored
    pub fn stored_at(&self) -> Instant {
        self.stored_at
    }

    /// The time-to-live the entry was stored with
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Checks whether the entry is still fresh at `now`.
    ///
    /// An entry is fresh while `now - stored_at < ttl`; at exactly `ttl` it is stale.
    ///
    /// # Arguments
    ///
    /// * `now` - The instant to evaluate freshness at.
    ///
    /// # Returns
    ///
    /// `true` if the entry is fresh.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }

    /// Age of the entry at `now`
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }
}

/// A point-in-time view of one cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<V> {
    /// The cached value
    pub value: V,
    /// When the value was stored
    pub stored_at: Instant,
    /// Whether the value is still within its TTL
    pub is_fresh: bool,
}

/// Keyed cache with per-entry expiry
///
/// Cloning a `TtlCache` yields another handle to the same storage.
#[derive(Clone)]
pub struct TtlCache<V, C = TokioClock> {
    entries: Arc<Mutex<HashMap<String, CacheEntry<V>>>>,
    clock: C,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl<V: SourceValueBounds> TtlCache<V, TokioClock> {
    /// Creates a new cache driven by the tokio clock.
    pub fn new() -> Self {
        Self::with_clock(TokioClock)
    }
}

impl<V: SourceValueBounds> Default for TtlCache<V, TokioClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, C> TtlCache<V, C>
where
    V: SourceValueBounds,
    C: Clock,
{
    /// Creates a new cache that reads time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The clock this cache evaluates freshness against
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Retrieves a fresh value by key.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to retrieve.
    ///
    /// # Returns
    ///
    /// `Some(value)` if an entry exists and is fresh, `None` otherwise.
    ///
    /// # Side Effects
    ///
    /// Updates the hit/miss counters. An expired entry is left in place.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_fresh_entry(key).map(|lookup| lookup.value)
    }

    /// Like [`get`](Self::get), but also returns when the value was stored.
    pub fn get_fresh_entry(&self, key: &str) -> Option<CacheLookup<V>> {
        let now = self.clock.now();
        let lookup = self
            .entries
            .lock()
            .ok()?
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| CacheLookup {
                value: entry.value.clone(),
                stored_at: entry.stored_at,
                is_fresh: true,
            });

        match lookup {
            Some(lookup) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::log_cache_hit!("fresh value for key: {}", key);
                Some(lookup)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Retrieves the last stored value by key, even if it has expired.
    ///
    /// This is the read used by the fallback path after a failed refresh.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to retrieve.
    ///
    /// # Returns
    ///
    /// `Some(value)` if anything was ever stored under `key` and not invalidated since.
    pub fn get_stale_or_none(&self, key: &str) -> Option<V> {
        self.entries
            .lock()
            .ok()?
            .get(key)
            .map(|entry| entry.value.clone())
    }

    /// Retrieves a value together with its freshness information.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to retrieve.
    ///
    /// # Returns
    ///
    /// A [`CacheLookup`] if an entry exists, fresh or not.
    pub fn get_entry(&self, key: &str) -> Option<CacheLookup<V>> {
        let now = self.clock.now();
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(key)?;
        Some(CacheLookup {
            value: entry.value.clone(),
            stored_at: entry.stored_at,
            is_fresh: entry.is_fresh(now),
        })
    }

    /// Stores a value, replacing any existing entry unconditionally.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to set.
    /// * `value` - The value to store.
    /// * `ttl` - How long the value stays fresh.
    ///
    /// # Returns
    ///
    /// The instant the value was stored.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) -> Instant {
        let key = key.into();
        let now = self.clock.now();
        if let Ok(mut entries) = self.entries.lock() {
            crate::log_cache_store!("stored value for key: {} (ttl {:?})", key, ttl);
            entries.insert(key, CacheEntry::new(value, now, ttl));
        }
        now
    }

    /// Removes an entry by key.
    ///
    /// # Returns
    ///
    /// `true` if an entry was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self
            .entries
            .lock()
            .map(|mut entries| entries.remove(key).is_some())
            .unwrap_or(false);
        if removed {
            crate::log_cache_invalidate!("invalidated cache entry for key: {}", key);
        }
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            #[cfg(feature = "tracing")]
            let count = entries.len();
            entries.clear();
            #[cfg(feature = "tracing")]
            crate::log_cache_invalidate!("cleared {} cache entries", count);
        }
    }

    /// Drops every expired entry.
    ///
    /// Expired entries are otherwise kept so a failed refresh can serve them as stale.
    /// Run this only when that last-known value is no longer wanted.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        if let Ok(mut entries) = self.entries.lock() {
            let initial_size = entries.len();
            entries.retain(|_key, entry| entry.is_fresh(now));
            let removed = initial_size - entries.len();
            if removed > 0 {
                crate::debug_log!("🧹 [CACHE-CLEANUP] Removed {} expired entries", removed);
            }
            removed
        } else {
            0
        }
    }

    /// Whether an entry exists for `key`, fresh or not
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets cache statistics.
    ///
    /// # Returns
    ///
    /// A [`CacheStats`] describing the current contents and lookup counters.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let (entry_count, fresh_count, total_age) = self
            .entries
            .lock()
            .map(|entries| {
                let fresh = entries.values().filter(|e| e.is_fresh(now)).count();
                let age = entries
                    .values()
                    .fold(Duration::ZERO, |acc, e| acc + e.age(now));
                (entries.len(), fresh, age)
            })
            .unwrap_or((0, 0, Duration::ZERO));

        let avg_age = if entry_count > 0 {
            total_age / entry_count as u32
        } else {
            Duration::ZERO
        };

        CacheStats {
            entry_count,
            fresh_count,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            avg_age,
        }
    }
}

/// General cache statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub fresh_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub avg_age: Duration,
}

impl CacheStats {
    /// Number of entries past their TTL that are still retained
    pub fn expired_count(&self) -> usize {
        self.entry_count - self.fresh_count
    }

    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups > 0 {
            self.hits as f64 / lookups as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (TtlCache<u32, ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        (TtlCache::with_clock(clock.clone()), clock)
    }

    #[test]
    fn test_freshness_boundary() {
        let ttl = Duration::from_millis(5000);

        let (cache, clock) = cache();
        cache.set("idx", 100, ttl);
        clock.advance(ttl - Duration::from_millis(1));
        assert_eq!(cache.get("idx"), Some(100));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("idx"), None, "exactly ttl is stale");

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("idx"), None);
    }

    #[test]
    fn test_expired_entry_is_kept_for_stale_reads() {
        let (cache, clock) = cache();
        cache.set("idx", 105, Duration::from_secs(5));
        clock.advance(Duration::from_secs(6));

        assert_eq!(cache.get("idx"), None);
        assert_eq!(cache.get_stale_or_none("idx"), Some(105));
        assert_eq!(cache.len(), 1, "lazy expiry must not evict");

        let lookup = cache.get_entry("idx").unwrap();
        assert_eq!(lookup.value, 105);
        assert!(!lookup.is_fresh);
    }

    #[test]
    fn test_set_replaces_entry_and_ttl() {
        let (cache, clock) = cache();
        cache.set("sdr", 1, Duration::from_secs(1));
        clock.advance(Duration::from_secs(2));
        cache.set("sdr", 2, Duration::from_secs(10));

        assert_eq!(cache.get("sdr"), Some(2));
        clock.advance(Duration::from_secs(9));
        assert_eq!(cache.get("sdr"), Some(2));
    }

    #[test]
    fn test_keys_are_isolated() {
        let (cache, clock) = cache();
        cache.set("a", 1, Duration::from_secs(1));
        cache.set("b", 2, Duration::from_secs(10));
        clock.advance(Duration::from_secs(5));

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let (cache, _clock) = cache();
        cache.set("a", 1, Duration::from_secs(1));
        cache.set("b", 2, Duration::from_secs(1));

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.get_stale_or_none("a"), None);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get_stale_or_none("b"), None);
    }

    #[test]
    fn test_purge_expired_only_drops_expired() {
        let (cache, clock) = cache();
        cache.set("short", 1, Duration::from_secs(1));
        cache.set("long", 2, Duration::from_secs(60));
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.purge_expired(), 1);
        assert!(!cache.contains_key("short"));
        assert!(cache.contains_key("long"));
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let (cache, clock) = cache();
        cache.set("a", 1, Duration::from_secs(1));
        cache.set("b", 2, Duration::from_secs(10));
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.fresh_count, 1);
        assert_eq!(stats.expired_count(), 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.avg_age, Duration::from_secs(2));
    }

    #[test]
    fn test_clones_share_storage() {
        let (cache, _clock) = cache();
        let other = cache.clone();
        other.set("a", 7, Duration::from_secs(1));
        assert_eq!(cache.get("a"), Some(7));
    }
}

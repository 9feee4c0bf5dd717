use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use crate::config::CacheConfig;

/// One evaluation of a check instance. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub data: serde_json::Value,
    pub duration_millis: u64,
}

impl CacheEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        success: bool,
        data: serde_json::Value,
        duration_millis: u64,
    ) -> Self {
        Self {
            timestamp,
            success,
            data,
            duration_millis,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.timestamp)
    }

    /// Expired strictly after `ttl` has elapsed.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self.age(now) > ttl,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    entry: CacheEntry,
    ttl: Duration,
}

enum Lookup {
    Fresh(CacheEntry),
    Expired,
    Missing,
}

impl Lookup {
    fn of(slot: Option<&Slot>, now: DateTime<Utc>) -> Self {
        match slot {
            Some(slot) if !slot.entry.is_expired(slot.ttl, now) => Lookup::Fresh(slot.entry.clone()),
            Some(_) => Lookup::Expired,
            None => Lookup::Missing,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub current_size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
    pub total_requests: u64,
}

impl CacheStats {
    pub fn new(max_size: usize) -> Self {
        Self {
            hits: 0,
            misses: 0,
            expirations: 0,
            evictions: 0,
            current_size: 0,
            max_size,
            hit_rate: 0.0,
            total_requests: 0,
        }
    }

    fn record_hit(&mut self) {
        self.hits += 1;
        self.total_requests += 1;
        self.update_hit_rate();
    }

    fn record_miss(&mut self) {
        self.misses += 1;
        self.total_requests += 1;
        self.update_hit_rate();
    }

    fn update_hit_rate(&mut self) {
        if self.total_requests > 0 {
            self.hit_rate = self.hits as f64 / self.total_requests as f64;
        }
    }
}

/// In-memory TTL store for check results.
///
/// Each key carries its own TTL. Expired entries are dropped lazily when
/// looked up; there is no background sweep. The lock is only ever held for
/// the lookup or the replacement itself.
///
/// Pinned keys (one per declared check, with its configured parameters) live
/// outside the LRU and are never evicted, so caller-chosen override keys
/// cannot push a check's own result out before its TTL.
#[derive(Clone)]
pub struct ResultCache {
    pinned: Arc<RwLock<HashMap<String, Slot>>>,
    entries: Arc<RwLock<LruCache<String, Slot>>>,
    stats: Arc<RwLock<CacheStats>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("len", &self.len())
            .finish()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);

        Self {
            pinned: Arc::new(RwLock::new(HashMap::new())),
            entries: Arc::new(RwLock::new(LruCache::new(capacity))),
            stats: Arc::new(RwLock::new(CacheStats::new(capacity.get()))),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn record(&self, key: &str, lookup: Lookup) -> Option<CacheEntry> {
        match lookup {
            Lookup::Fresh(entry) => {
                self.stats.write().record_hit();
                debug!("Cache hit for key: {}", key);
                return Some(entry);
            }
            Lookup::Expired => {
                self.stats.write().expirations += 1;
                debug!("Cache entry expired for key: {}", key);
            }
            Lookup::Missing => debug!("Cache miss for key: {}", key),
        }
        self.stats.write().record_miss();
        None
    }

    /// Returns the entry unless it is missing or older than its TTL.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();

        let pinned = {
            let mut pinned = self.pinned.write();
            let lookup = Lookup::of(pinned.get(key), now);
            if matches!(lookup, Lookup::Expired) {
                pinned.remove(key);
            }
            lookup
        };
        if !matches!(pinned, Lookup::Missing) {
            return self.record(key, pinned);
        }

        let lookup = {
            let mut entries = self.entries.write();
            let lookup = Lookup::of(entries.get(key), now);
            if matches!(lookup, Lookup::Expired) {
                entries.pop(key);
            }
            lookup
        };
        self.record(key, lookup)
    }

    /// Returns whatever is stored under `key`, expired or not, without touching
    /// recency or statistics.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        if let Some(slot) = self.pinned.read().get(key) {
            return Some(slot.entry.clone());
        }
        self.entries.read().peek(key).map(|slot| slot.entry.clone())
    }

    /// Stores `entry` under a key exempt from LRU eviction.
    pub fn set_pinned(&self, key: &str, entry: CacheEntry, ttl: Duration) {
        self.entries.write().pop(key);
        self.pinned.write().insert(key.to_string(), Slot { entry, ttl });
        debug!("Cached pinned result for key: {} (TTL: {:?})", key, ttl);
    }

    /// Stores `entry` under an evictable key. A key already pinned stays pinned.
    pub fn set(&self, key: &str, entry: CacheEntry, ttl: Duration) {
        {
            let mut pinned = self.pinned.write();
            if let Some(slot) = pinned.get_mut(key) {
                *slot = Slot { entry, ttl };
                debug!("Cached pinned result for key: {} (TTL: {:?})", key, ttl);
                return;
            }
        }

        let mut entries = self.entries.write();
        let displaced = entries.push(key.to_string(), Slot { entry, ttl });

        if let Some((old_key, _)) = displaced {
            if old_key != key {
                self.stats.write().evictions += 1;
                debug!("Evicted cache entry for key: {}", old_key);
            }
        }

        debug!("Cached result for key: {} (TTL: {:?})", key, ttl);
    }

    pub fn remove(&self, key: &str) -> bool {
        let pinned = self.pinned.write().remove(key).is_some();
        self.entries.write().pop(key).is_some() || pinned
    }

    pub fn clear(&self) {
        self.pinned.write().clear();
        self.entries.write().clear();
        debug!("Cleared all cache entries");
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().clone();
        stats.current_size = self.len();
        stats
    }

    pub fn len(&self) -> usize {
        self.pinned.read().len() + self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use serde_json::json;

    fn cache_with_clock() -> (ResultCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResultCache::with_clock(CacheConfig::default(), clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_entry_visible_until_ttl_elapses() {
        let (cache, clock) = cache_with_clock();
        let entry = CacheEntry::new(clock.now(), true, json!({"ok": true}), 12);

        cache.set("p/a-", entry.clone(), Duration::from_secs(60));

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get("p/a-"), Some(entry));

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get("p/a-"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entry_at_exact_ttl_is_still_fresh() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", CacheEntry::new(clock.now(), false, json!(null), 1), Duration::from_secs(60));

        clock.advance(Duration::from_secs(60));
        assert!(cache.get("k").is_some());
    }

    #[test]
    fn test_set_overwrites_unconditionally() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", CacheEntry::new(clock.now(), true, json!(1), 1), Duration::from_secs(60));
        cache.set("k", CacheEntry::new(clock.now(), false, json!(2), 1), Duration::from_secs(60));

        let entry = cache.get("k").unwrap();
        assert!(!entry.success);
        assert_eq!(entry.data, json!(2));
    }

    #[test]
    fn test_peek_ignores_expiry() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", CacheEntry::new(clock.now(), false, json!(null), 1), Duration::from_secs(1));

        clock.advance(Duration::from_secs(10));
        assert!(cache.peek("k").is_some());
        assert!(cache.get("k").is_none());
        assert!(cache.peek("k").is_none());
    }

    #[test]
    fn test_cache_stats() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", CacheEntry::new(clock.now(), true, json!(null), 1), Duration::from_secs(60));

        let _ = cache.get("k");
        let _ = cache.get("k");
        let _ = cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.current_size, 1);
        assert!((stats.hit_rate - 0.6666666666666666).abs() < 0.0001);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResultCache::with_clock(CacheConfig { max_entries: 2 }, clock.clone());
        let ttl = Duration::from_secs(60);

        cache.set("a", CacheEntry::new(clock.now(), true, json!(null), 1), ttl);
        cache.set("b", CacheEntry::new(clock.now(), true, json!(null), 1), ttl);
        cache.set("c", CacheEntry::new(clock.now(), true, json!(null), 1), ttl);

        assert!(cache.peek("a").is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_pinned_entries_survive_capacity_pressure() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResultCache::with_clock(CacheConfig { max_entries: 1 }, clock.clone());
        let ttl = Duration::from_secs(60);

        cache.set_pinned("p/a-", CacheEntry::new(clock.now(), false, json!(null), 1), ttl);
        cache.set("p/a-max_age=1", CacheEntry::new(clock.now(), true, json!(null), 1), ttl);
        cache.set("p/a-max_age=2", CacheEntry::new(clock.now(), true, json!(null), 1), ttl);

        assert!(cache.get("p/a-").is_some());
        assert!(cache.peek("p/a-max_age=1").is_none());
        assert_eq!(cache.len(), 2);

        // A plain set on a pinned key keeps it pinned.
        cache.set("p/a-", CacheEntry::new(clock.now(), true, json!(1), 1), ttl);
        cache.set("p/a-max_age=3", CacheEntry::new(clock.now(), true, json!(null), 1), ttl);
        assert_eq!(cache.get("p/a-").map(|e| e.data), Some(json!(1)));

        clock.advance(Duration::from_secs(61));
        assert!(cache.get("p/a-").is_none());
        assert!(cache.peek("p/a-").is_none());
    }
}

//! TTL- and capacity-bounded cache of retrieval results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

const FINGERPRINT_DIMS: usize = 20;
const HEALTHY_UTILIZATION: f64 = 0.9;
const HEALTHY_EXPIRED_RATIO: f64 = 0.3;

/// First 20 vector dimensions rounded to 3 decimals, comma-joined.
#[must_use]
pub fn query_fingerprint(query_vector: &[f32]) -> String {
    query_vector
        .iter()
        .take(FINGERPRINT_DIMS)
        .map(|v| format!("{v:.3}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scope_id: String,
    pub query_fingerprint: String,
    pub limit: usize,
    threshold_bits: u32,
}

impl CacheKey {
    #[must_use]
    pub fn new(
        scope_id: impl Into<String>,
        query_vector: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Self {
        Self {
            scope_id: scope_id.into(),
            query_fingerprint: query_fingerprint(query_vector),
            limit,
            threshold_bits: threshold.to_bits(),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> f32 {
        f32::from_bits(self.threshold_bits)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    results: T,
    timestamp: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.timestamp) > self.ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub utilization: f64,
    pub is_healthy: bool,
}

impl CacheStats {
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Mutex-guarded result cache. Lookups and inserts never fail; a poisoned
/// lock is recovered rather than propagated.
///
/// At capacity, an insert first purges expired entries and then evicts the
/// entry with the oldest insertion time. Reads do not refresh entries.
pub struct RetrievalCache<T> {
    entries: Mutex<HashMap<CacheKey, CacheEntry<T>>>,
    default_ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> RetrievalCache<T> {
    #[must_use]
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<T> {
        let mut entries = self.lock();
        let now = Instant::now();
        let found = match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.results.clone()),
            None => None,
        };
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Insert results, with `ttl` overriding the default.
    pub fn set(&self, key: CacheKey, results: T, ttl: Option<Duration>) {
        let mut entries = self.lock();
        let now = Instant::now();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, e| !e.is_expired(now));
            if entries.len() >= self.max_entries
                && let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.timestamp)
                    .map(|(k, _)| k.clone())
            {
                tracing::debug!(scope = %oldest.scope_id, "evicting oldest cache entry");
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                results,
                timestamp: now,
                ttl: ttl.unwrap_or(self.default_ttl),
            },
        );
    }

    /// Purge expired entries, returning how many were removed.
    pub fn remove_expired(&self) -> usize {
        let mut entries = self.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Drop every entry cached for `scope_id`.
    pub fn invalidate_scope(&self, scope_id: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|k, _| k.scope_id != scope_id);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        let now = Instant::now();
        let total_entries = entries.len();
        let expired_entries = entries.values().filter(|e| e.is_expired(now)).count();
        let utilization = total_entries as f64 / self.max_entries as f64;
        let expired_ratio = if total_entries == 0 {
            0.0
        } else {
            expired_entries as f64 / total_entries as f64
        };
        CacheStats {
            total_entries,
            expired_entries,
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            utilization,
            is_healthy: utilization < HEALTHY_UTILIZATION && expired_ratio < HEALTHY_EXPIRED_RATIO,
        }
    }
}

impl<T: Clone> Default for RetrievalCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl<T> std::fmt::Debug for RetrievalCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalCache")
            .field("default_ttl", &self.default_ttl)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(scope: &str, v: f32) -> CacheKey {
        CacheKey::new(scope, &[v, 0.5, -0.25], 10, 0.5)
    }

    #[test]
    fn fingerprint_rounds_and_truncates() {
        let v: Vec<f32> = (0..30).map(|i| i as f32 / 7.0).collect();
        let fp = query_fingerprint(&v);
        assert_eq!(fp.split(',').count(), 20);
        assert!(fp.starts_with("0.000,0.143,0.286"));
    }

    #[test]
    fn nearby_vectors_share_key() {
        let a = CacheKey::new("s", &[0.12341, 0.5], 5, 0.5);
        let b = CacheKey::new("s", &[0.12344, 0.5], 5, 0.5);
        assert_eq!(a, b);
        assert_ne!(a, CacheKey::new("s", &[0.12341, 0.5], 5, 0.6));
        assert!((a.threshold() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn set_then_get() {
        let cache = RetrievalCache::default();
        cache.set(key("s", 0.1), vec![1, 2, 3], None);
        assert_eq!(cache.get(&key("s", 0.1)), Some(vec![1, 2, 3]));
        assert_eq!(cache.get(&key("s", 0.9)), None);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = RetrievalCache::new(Duration::from_millis(20), 10);
        cache.set(key("s", 0.1), "r", None);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&key("s", 0.1)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn explicit_ttl_overrides_default() {
        let cache = RetrievalCache::new(Duration::from_millis(10), 10);
        cache.set(key("s", 0.1), "long", Some(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&key("s", 0.1)), Some("long"));
    }

    #[test]
    fn capacity_one_evicts_previous() {
        let cache = RetrievalCache::new(DEFAULT_TTL, 1);
        cache.set(key("s", 0.1), "k1", None);
        cache.set(key("s", 0.2), "k2", None);
        assert_eq!(cache.get(&key("s", 0.1)), None);
        assert_eq!(cache.get(&key("s", 0.2)), Some("k2"));
    }

    #[test]
    fn eviction_prefers_expired_entries() {
        let cache = RetrievalCache::new(DEFAULT_TTL, 2);
        cache.set(key("s", 0.1), "old-live", None);
        cache.set(key("s", 0.2), "short", Some(Duration::from_millis(5)));
        std::thread::sleep(Duration::from_millis(20));
        cache.set(key("s", 0.3), "new", None);
        assert_eq!(cache.get(&key("s", 0.1)), Some("old-live"));
        assert_eq!(cache.get(&key("s", 0.3)), Some("new"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn never_exceeds_capacity() {
        let cache = RetrievalCache::new(DEFAULT_TTL, 5);
        for i in 0..50 {
            #[allow(clippy::cast_precision_loss)]
            cache.set(key("s", i as f32), i, None);
            assert!(cache.len() <= 5);
        }
    }

    #[test]
    fn overwrite_does_not_evict() {
        let cache = RetrievalCache::new(DEFAULT_TTL, 2);
        cache.set(key("s", 0.1), 1, None);
        cache.set(key("s", 0.2), 2, None);
        cache.set(key("s", 0.2), 3, None);
        assert_eq!(cache.get(&key("s", 0.1)), Some(1));
        assert_eq!(cache.get(&key("s", 0.2)), Some(3));
    }

    #[test]
    fn remove_expired_and_health() {
        let cache = RetrievalCache::new(Duration::from_millis(5), 10);
        for i in 0..4 {
            #[allow(clippy::cast_precision_loss)]
            cache.set(key("s", i as f32), i, None);
        }
        std::thread::sleep(Duration::from_millis(20));
        let stats = cache.stats();
        assert_eq!(stats.expired_entries, 4);
        assert!(!stats.is_healthy);
        assert_eq!(cache.remove_expired(), 4);
        assert!(cache.stats().is_healthy);
    }

    #[test]
    fn high_utilization_is_unhealthy() {
        let cache = RetrievalCache::new(DEFAULT_TTL, 10);
        for i in 0..9 {
            #[allow(clippy::cast_precision_loss)]
            cache.set(key("s", i as f32), i, None);
        }
        let stats = cache.stats();
        assert!((stats.utilization - 0.9).abs() < 1e-9);
        assert!(!stats.is_healthy);
    }

    #[test]
    fn invalidate_scope_only_touches_scope() {
        let cache = RetrievalCache::default();
        cache.set(key("a", 0.1), 1, None);
        cache.set(key("a", 0.2), 2, None);
        cache.set(key("b", 0.1), 3, None);
        assert_eq!(cache.invalidate_scope("a"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("b", 0.1)), Some(3));
    }
}

//! Cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Events counted by [`CacheMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCounter {
    /// Fresh hit served from the cache.
    Hit,
    /// Stale hit served inside the stale-while-revalidate window.
    Stale,
    /// Lookup that found nothing servable.
    Miss,
    /// Request the cache does not handle (non-GET).
    Bypass,
    /// Conditional request answered with 304.
    NotModified,
    /// Entry written to the store.
    Store,
    /// Revalidation that refreshed an entry.
    Revalidation,
    /// Revalidation whose origin call or write failed.
    RevalidationFailure,
    /// Keys removed by invalidation.
    InvalidatedKeys,
}

/// Counters for a single cache instance.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    stale: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    not_modified: AtomicU64,
    stores: AtomicU64,
    revalidations: AtomicU64,
    revalidation_failures: AtomicU64,
    invalidated_keys: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub stale: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub not_modified: u64,
    pub stores: u64,
    pub revalidations: u64,
    pub revalidation_failures: u64,
    pub invalidated_keys: u64,
}

impl CacheMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn incr(&self, counter: CacheCounter) {
        self.add(counter, 1);
    }

    /// Increment a counter by `n`.
    pub fn add(&self, counter: CacheCounter, n: u64) {
        self.slot(counter).fetch_add(n, Ordering::Relaxed);
    }

    /// Read a single counter.
    pub fn get(&self, counter: CacheCounter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    /// Copy all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.get(CacheCounter::Hit),
            stale: self.get(CacheCounter::Stale),
            misses: self.get(CacheCounter::Miss),
            bypasses: self.get(CacheCounter::Bypass),
            not_modified: self.get(CacheCounter::NotModified),
            stores: self.get(CacheCounter::Store),
            revalidations: self.get(CacheCounter::Revalidation),
            revalidation_failures: self.get(CacheCounter::RevalidationFailure),
            invalidated_keys: self.get(CacheCounter::InvalidatedKeys),
        }
    }

    fn slot(&self, counter: CacheCounter) -> &AtomicU64 {
        match counter {
            CacheCounter::Hit => &self.hits,
            CacheCounter::Stale => &self.stale,
            CacheCounter::Miss => &self.misses,
            CacheCounter::Bypass => &self.bypasses,
            CacheCounter::NotModified => &self.not_modified,
            CacheCounter::Store => &self.stores,
            CacheCounter::Revalidation => &self.revalidations,
            CacheCounter::RevalidationFailure => &self.revalidation_failures,
            CacheCounter::InvalidatedKeys => &self.invalidated_keys,
        }
    }
}

impl MetricsSnapshot {
    /// Fraction of cache lookups served from the cache (fresh, stale or 304).
    pub fn hit_ratio(&self) -> f64 {
        let served = self.hits + self.stale + self.not_modified;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    /// Format as JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = CacheMetrics::new();
        metrics.incr(CacheCounter::Hit);
        metrics.incr(CacheCounter::Hit);
        metrics.add(CacheCounter::InvalidatedKeys, 5);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.invalidated_keys, 5);
        assert_eq!(snapshot.misses, 0);
    }

    #[test]
    fn test_hit_ratio() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.snapshot().hit_ratio(), 0.0);

        metrics.incr(CacheCounter::Hit);
        metrics.incr(CacheCounter::Stale);
        metrics.incr(CacheCounter::Miss);
        metrics.incr(CacheCounter::Miss);

        assert_eq!(metrics.snapshot().hit_ratio(), 0.5);
    }

    #[test]
    fn test_snapshot_json() {
        let metrics = CacheMetrics::new();
        metrics.incr(CacheCounter::Store);

        let json: serde_json::Value = serde_json::from_str(&metrics.snapshot().to_json()).unwrap();
        assert_eq!(json["stores"], 1);
    }
}

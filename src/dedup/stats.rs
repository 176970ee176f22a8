//! Counters maintained by the deduplicator and their read-only snapshot.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters. Every `execute` bumps `total_requests` and exactly one
/// of `hits`/`misses`, except calls rejected after `destroy`, which count
/// nowhere.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    total_requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    cancellations: AtomicU64,
}

impl Counters {
    pub(crate) fn record_hit(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_expirations(&self, count: usize) {
        self.expirations.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_cancellations(&self, count: usize) {
        self.cancellations.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, cache_size: usize) -> StatsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let cache_hits = self.hits.load(Ordering::Relaxed);
        let dedup_rate = if total_requests == 0 {
            0.0
        } else {
            cache_hits as f64 / total_requests as f64 * 100.0
        };
        StatsSnapshot {
            total_requests,
            cache_hits,
            cache_misses: self.misses.load(Ordering::Relaxed),
            duplicates_prevented: cache_hits,
            active_count: cache_size,
            cache_size,
            dedup_rate,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the deduplicator. Derived, never a source of truth.
///
/// `total_requests` counts calls that reached the cache, so it always equals
/// `cache_hits + cache_misses`. Calls made after `destroy` are rejected
/// before that point and are not counted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub duplicates_prevented: u64,
    pub active_count: usize,
    pub cache_size: usize,
    /// Percentage of requests served from a shared entry.
    pub dedup_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub cancellations: u64,
}

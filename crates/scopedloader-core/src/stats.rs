//! Loader statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time counters for one loader (or several, combined).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Calls to `load` (each key of `load_many` counts once).
    pub loads: u64,
    /// Loads answered by an existing cache entry.
    pub cache_hits: u64,
    /// Times the batch function was invoked.
    pub batch_invocations: u64,
    /// Keys handed to the batch function across all invocations.
    pub batched_keys: u64,
    /// Batch invocations that failed as a whole.
    pub batch_failures: u64,
    /// Individual keys that resolved to an error.
    pub load_errors: u64,
}

impl Statistics {
    /// Fraction of loads served from cache (0.0 when nothing was loaded).
    pub fn cache_hit_ratio(&self) -> f64 {
        ratio(self.cache_hits, self.loads)
    }

    /// Average keys per batch invocation.
    pub fn keys_per_batch(&self) -> f64 {
        ratio(self.batched_keys, self.batch_invocations)
    }

    /// Sum two snapshots (used for registry-wide statistics).
    pub fn combine(self, other: Statistics) -> Statistics {
        Statistics {
            loads: self.loads + other.loads,
            cache_hits: self.cache_hits + other.cache_hits,
            batch_invocations: self.batch_invocations + other.batch_invocations,
            batched_keys: self.batched_keys + other.batched_keys,
            batch_failures: self.batch_failures + other.batch_failures,
            load_errors: self.load_errors + other.load_errors,
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Lock-free counters behind a [`Statistics`] snapshot.
#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    loads: AtomicU64,
    cache_hits: AtomicU64,
    batch_invocations: AtomicU64,
    batched_keys: AtomicU64,
    batch_failures: AtomicU64,
    load_errors: AtomicU64,
}

impl StatsCollector {
    pub(crate) fn record_load(&self, cache_hit: bool) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_batch(&self, keys: usize) {
        self.batch_invocations.fetch_add(1, Ordering::Relaxed);
        self.batched_keys.fetch_add(keys as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_batch_failure(&self) {
        self.batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_errors(&self, n: usize) {
        self.load_errors.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> Statistics {
        Statistics {
            loads: self.loads.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            batch_invocations: self.batch_invocations.load(Ordering::Relaxed),
            batched_keys: self.batched_keys.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            load_errors: self.load_errors.load(Ordering::Relaxed),
        }
    }
}

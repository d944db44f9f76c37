//! Loader statistics as structured log events.
//!
//! Field names are stable so log pipelines can aggregate on them:
//! `loader`, `loads`, `cache_hits`, `cache_hit_ratio`, `batch_invocations`,
//! `keys_per_batch`, `batch_failures`, `load_errors`.

use std::collections::BTreeMap;
use std::fmt::Display;

use scopedloader_core::Statistics;

/// Emit one loader's counters at `info`, or `warn` if any key failed.
pub fn log_statistics(loader: &str, stats: &Statistics) {
    if stats.load_errors > 0 {
        tracing::warn!(
            loader,
            loads = stats.loads,
            cache_hits = stats.cache_hits,
            cache_hit_ratio = stats.cache_hit_ratio(),
            batch_invocations = stats.batch_invocations,
            keys_per_batch = stats.keys_per_batch(),
            batch_failures = stats.batch_failures,
            load_errors = stats.load_errors,
            "loader statistics"
        );
    } else {
        tracing::info!(
            loader,
            loads = stats.loads,
            cache_hits = stats.cache_hits,
            cache_hit_ratio = stats.cache_hit_ratio(),
            batch_invocations = stats.batch_invocations,
            keys_per_batch = stats.keys_per_batch(),
            "loader statistics"
        );
    }
}

/// Emit counters for every loader in `stats` and return the combined total.
pub fn log_statistics_map<N: Display>(stats: &BTreeMap<N, Statistics>) -> Statistics {
    let mut total = Statistics::default();
    for (name, s) in stats {
        log_statistics(&name.to_string(), s);
        total = total.combine(*s);
    }
    total
}

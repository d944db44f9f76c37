//! The `Loader` trait and `DataLoader`, the per-scope batching engine.
//!
//! A `DataLoader` queues keys on [`load`](DataLoader::load) and fires its
//! batch function only when [`dispatch`](DataLoader::dispatch) runs. Equal
//! keys share one [`PendingValue`] until the cache entry is cleared.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::batch::{
    BatchFn, BatchLoader, Batched, ListAdapter, LoaderKey, LoaderValue, MappedAdapter,
    MappedBatchLoader,
};
use crate::error::{LoadError, LoaderError};
use crate::options::LoaderOptions;
use crate::pending::{Completer, PendingValue};
use crate::stats::{Statistics, StatsCollector};

/// Maps a key to the key used for caching.
pub type CacheKeyFn<K> = Arc<dyn Fn(&K) -> K + Send + Sync>;

/// The operation set shared by `DataLoader` and scope-resolving handles.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn Loader<K, V>>`.
#[async_trait]
pub trait Loader<K: LoaderKey, V: LoaderValue>: Send + Sync {
    /// The loader's registered name.
    fn name(&self) -> &str;

    /// Request one key. The value resolves on the next dispatch.
    fn load(&self, key: K) -> Result<PendingValue<V>, LoaderError>;

    /// Request several keys at once.
    fn load_many(&self, keys: Vec<K>) -> Result<Vec<PendingValue<V>>, LoaderError> {
        keys.into_iter().map(|k| self.load(k)).collect()
    }

    /// Fire the batch function for every queued key and resolve their
    /// pending values. Returns each dispatched key's outcome in order.
    async fn dispatch(&self) -> Result<Vec<Result<V, LoadError>>, LoaderError>;

    /// Dispatch until nothing is queued, returning all values or the first
    /// failure.
    async fn dispatch_and_join(&self) -> Result<Vec<V>, LoaderError>;

    /// Number of keys waiting for the next dispatch.
    fn dispatch_depth(&self) -> Result<usize, LoaderError>;

    /// Evict one key from the cache.
    fn clear(&self, key: &K) -> Result<(), LoaderError>;

    /// Evict every cached key.
    fn clear_all(&self) -> Result<(), LoaderError>;

    /// Seed the cache with a value, unless the key is already cached.
    fn prime(&self, key: K, value: V) -> Result<(), LoaderError>;

    /// Seed the cache with a failure, unless the key is already cached.
    fn prime_error(&self, key: K, error: LoadError) -> Result<(), LoaderError>;

    /// The key under which `key` is cached.
    fn cache_key(&self, key: &K) -> Result<K, LoaderError>;

    /// Snapshot of this loader's counters.
    fn statistics(&self) -> Result<Statistics, LoaderError>;
}

/// Outcome summary of one dispatch, independent of `K`/`V`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Distinct keys sent to the batch function.
    pub keys: usize,
    /// Keys that resolved to an error.
    pub failed: usize,
}

/// Type-erased view of a loader, used to dispatch loaders of different
/// key/value types together.
#[async_trait]
pub trait AnyLoader: Send + Sync {
    fn loader_name(&self) -> &str;

    async fn dispatch_erased(&self) -> DispatchReport;

    fn queued(&self) -> usize;

    fn stats_snapshot(&self) -> Statistics;
}

/// A key waiting for dispatch, with the sender that resolves it.
struct Queued<K, V> {
    key: K,
    pending: PendingValue<V>,
    completer: Completer<V>,
}

struct LoaderState<K, V> {
    cache: HashMap<K, PendingValue<V>>,
    queue: Vec<Queued<K, V>>,
}

/// Batching, caching loader for one unit of work.
pub struct DataLoader<K, V> {
    name: Arc<str>,
    batch_fn: Arc<dyn BatchFn<K, V>>,
    options: LoaderOptions,
    cache_key_fn: Option<CacheKeyFn<K>>,
    state: Mutex<LoaderState<K, V>>,
    stats: StatsCollector,
}

impl<K: LoaderKey, V: LoaderValue> DataLoader<K, V> {
    pub fn new(
        name: impl Into<String>,
        batch_fn: Arc<dyn BatchFn<K, V>>,
        options: LoaderOptions,
    ) -> Self {
        Self {
            name: Arc::from(name.into()),
            batch_fn,
            options,
            cache_key_fn: None,
            state: Mutex::new(LoaderState {
                cache: HashMap::new(),
                queue: Vec::new(),
            }),
            stats: StatsCollector::default(),
        }
    }

    pub fn with_options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    /// Cache under a derived key instead of the key itself.
    pub fn with_cache_key(mut self, f: CacheKeyFn<K>) -> Self {
        self.cache_key_fn = Some(f);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    pub fn cache_key(&self, key: &K) -> K {
        match &self.cache_key_fn {
            Some(f) => f(key),
            None => key.clone(),
        }
    }

    pub fn load(&self, key: K) -> PendingValue<V> {
        let cache_key = self.cache_key(&key);
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.cache.get(&cache_key) {
            self.stats.record_load(true);
            return existing.clone();
        }
        let (pending, completer) = PendingValue::channel(self.name.clone());
        state.cache.insert(cache_key, pending.clone());
        state.queue.push(Queued {
            key,
            pending: pending.clone(),
            completer,
        });
        self.stats.record_load(false);
        pending
    }

    pub fn load_many(&self, keys: Vec<K>) -> Vec<PendingValue<V>> {
        keys.into_iter().map(|k| self.load(k)).collect()
    }

    pub fn dispatch_depth(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn clear(&self, key: &K) {
        let cache_key = self.cache_key(key);
        self.state.lock().unwrap().cache.remove(&cache_key);
    }

    pub fn clear_all(&self) {
        self.state.lock().unwrap().cache.clear();
    }

    pub fn prime(&self, key: K, value: V) {
        self.prime_outcome(key, Ok(value));
    }

    pub fn prime_error(&self, key: K, error: LoadError) {
        self.prime_outcome(key, Err(error));
    }

    fn prime_outcome(&self, key: K, outcome: Result<V, LoadError>) {
        let cache_key = self.cache_key(&key);
        self.state
            .lock()
            .unwrap()
            .cache
            .entry(cache_key)
            .or_insert_with(|| PendingValue::completed(self.name.clone(), outcome));
    }

    pub fn statistics(&self) -> Statistics {
        self.stats.snapshot()
    }

    pub async fn dispatch(&self) -> Vec<Result<V, LoadError>> {
        let queue = std::mem::take(&mut self.state.lock().unwrap().queue);
        if queue.is_empty() {
            return Vec::new();
        }

        let mut in_flight = InFlight::new(self, queue);
        let total = in_flight.keys.len();
        let chunk_size = self.options.max_batch_size.unwrap_or(total).max(1);
        tracing::debug!(
            loader = %self.name,
            keys = total,
            batches = total.div_ceil(chunk_size),
            "dispatching"
        );

        let mut outcomes = Vec::with_capacity(total);
        while in_flight.done < total {
            let chunk = in_flight.done..(in_flight.done + chunk_size).min(total);
            let results = self.run_batch(in_flight.keys[chunk.clone()].to_vec()).await;
            for (index, result) in chunk.clone().zip(results) {
                in_flight.complete(index, &result);
                outcomes.push(result);
            }
            in_flight.done = chunk.end;
        }

        if !self.options.caching_enabled {
            in_flight.evict(0..total);
        }
        outcomes
    }

    pub async fn dispatch_and_join(&self) -> Result<Vec<V>, LoadError> {
        let mut values = Vec::new();
        loop {
            for outcome in self.dispatch().await {
                values.push(outcome?);
            }
            if self.dispatch_depth() == 0 {
                return Ok(values);
            }
        }
    }

    /// Call the batch function once and produce one outcome per key.
    async fn run_batch(&self, keys: Vec<K>) -> Vec<Result<V, LoadError>> {
        let expected = keys.len();
        self.stats.record_batch(expected);

        let outcomes: Vec<Result<V, LoadError>> = match self.batch_fn.call(keys.clone()).await {
            Ok(Batched::Positional(values)) if values.len() == expected => {
                values.into_iter().map(Ok).collect()
            }
            Ok(Batched::Positional(values)) => {
                tracing::warn!(
                    loader = %self.name,
                    expected,
                    actual = values.len(),
                    "batch function returned mismatched result count"
                );
                self.stats.record_batch_failure();
                let err = LoadError::LengthMismatch {
                    loader: self.name.to_string(),
                    expected,
                    actual: values.len(),
                };
                vec![Err(err); expected]
            }
            Ok(Batched::Keyed(mut map)) => keys
                .iter()
                .map(|k| {
                    map.remove(k).ok_or_else(|| LoadError::MissingKey {
                        loader: self.name.to_string(),
                        key: format!("{k:?}"),
                    })
                })
                .collect(),
            Err(e) => {
                tracing::warn!(loader = %self.name, error = %e, "batch function failed");
                self.stats.record_batch_failure();
                let err = LoadError::Batch {
                    loader: self.name.to_string(),
                    reason: e.to_string(),
                };
                vec![Err(err); expected]
            }
        };

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        if failed > 0 {
            self.stats.record_load_errors(failed);
        }
        outcomes
    }
}

impl<K: LoaderKey, V: LoaderValue> DataLoader<K, V> {
    /// Build a loader around a list-style batch function.
    pub fn from_batch_loader<L>(name: impl Into<String>, loader: L) -> Self
    where
        L: BatchLoader<Key = K, Value = V>,
    {
        DataLoader::new(name, Arc::new(ListAdapter::new(loader)), LoaderOptions::default())
    }

    /// Build a loader around a mapping-style batch function.
    pub fn from_mapped_batch_loader<L>(name: impl Into<String>, loader: L) -> Self
    where
        L: MappedBatchLoader<Key = K, Value = V>,
    {
        DataLoader::new(name, Arc::new(MappedAdapter::new(loader)), LoaderOptions::default())
    }
}

/// Keys taken off the queue by one `dispatch`, grouped by key in
/// first-requested order.
///
/// Keys past `done` when this drops (the batch function panicked or the
/// dispatch future was dropped) are evicted from the cache, and their
/// senders drop with them, resolving every waiter to
/// [`LoadError::Cancelled`]. A later `load` of those keys queues afresh.
struct InFlight<'a, K: LoaderKey, V: LoaderValue> {
    loader: &'a DataLoader<K, V>,
    keys: Vec<K>,
    pending: Vec<Vec<PendingValue<V>>>,
    completers: Vec<Vec<Completer<V>>>,
    done: usize,
}

impl<'a, K: LoaderKey, V: LoaderValue> InFlight<'a, K, V> {
    fn new(loader: &'a DataLoader<K, V>, queue: Vec<Queued<K, V>>) -> Self {
        let mut in_flight = Self {
            loader,
            keys: Vec::new(),
            pending: Vec::new(),
            completers: Vec::new(),
            done: 0,
        };
        let mut index: HashMap<K, usize> = HashMap::new();
        for queued in queue {
            let i = match index.get(&queued.key).copied() {
                Some(i) => i,
                None => {
                    let i = in_flight.keys.len();
                    index.insert(queued.key.clone(), i);
                    in_flight.keys.push(queued.key);
                    in_flight.pending.push(Vec::new());
                    in_flight.completers.push(Vec::new());
                    i
                }
            };
            in_flight.pending[i].push(queued.pending);
            in_flight.completers[i].push(queued.completer);
        }
        in_flight
    }

    fn complete(&mut self, index: usize, outcome: &Result<V, LoadError>) {
        for completer in std::mem::take(&mut self.completers[index]) {
            completer.complete(outcome.clone());
        }
    }

    /// Drop cache entries still holding one of these keys' pending values.
    fn evict(&self, range: Range<usize>) {
        let Ok(mut state) = self.loader.state.lock() else {
            return;
        };
        for i in range {
            let cache_key = self.loader.cache_key(&self.keys[i]);
            let ours = state
                .cache
                .get(&cache_key)
                .is_some_and(|p| self.pending[i].iter().any(|w| w.ptr_eq(p)));
            if ours {
                state.cache.remove(&cache_key);
            }
        }
    }
}

impl<K: LoaderKey, V: LoaderValue> Drop for InFlight<'_, K, V> {
    fn drop(&mut self) {
        let total = self.keys.len();
        if self.done == total {
            return;
        }
        let abandoned = total - self.done;
        tracing::warn!(
            loader = %self.loader.name,
            keys = abandoned,
            "dispatch ended before its batch completed"
        );
        self.loader.stats.record_load_errors(abandoned);
        self.evict(self.done..total);
    }
}

#[async_trait]
impl<K: LoaderKey, V: LoaderValue> Loader<K, V> for DataLoader<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self, key: K) -> Result<PendingValue<V>, LoaderError> {
        Ok(DataLoader::load(self, key))
    }

    async fn dispatch(&self) -> Result<Vec<Result<V, LoadError>>, LoaderError> {
        Ok(DataLoader::dispatch(self).await)
    }

    async fn dispatch_and_join(&self) -> Result<Vec<V>, LoaderError> {
        DataLoader::dispatch_and_join(self).await.map_err(LoaderError::Load)
    }

    fn dispatch_depth(&self) -> Result<usize, LoaderError> {
        Ok(DataLoader::dispatch_depth(self))
    }

    fn clear(&self, key: &K) -> Result<(), LoaderError> {
        DataLoader::clear(self, key);
        Ok(())
    }

    fn clear_all(&self) -> Result<(), LoaderError> {
        DataLoader::clear_all(self);
        Ok(())
    }

    fn prime(&self, key: K, value: V) -> Result<(), LoaderError> {
        DataLoader::prime(self, key, value);
        Ok(())
    }

    fn prime_error(&self, key: K, error: LoadError) -> Result<(), LoaderError> {
        DataLoader::prime_error(self, key, error);
        Ok(())
    }

    fn cache_key(&self, key: &K) -> Result<K, LoaderError> {
        Ok(DataLoader::cache_key(self, key))
    }

    fn statistics(&self) -> Result<Statistics, LoaderError> {
        Ok(DataLoader::statistics(self))
    }
}

#[async_trait]
impl<K: LoaderKey, V: LoaderValue> AnyLoader for DataLoader<K, V> {
    fn loader_name(&self) -> &str {
        &self.name
    }

    async fn dispatch_erased(&self) -> DispatchReport {
        let outcomes = DataLoader::dispatch(self).await;
        DispatchReport {
            keys: outcomes.len(),
            failed: outcomes.iter().filter(|o| o.is_err()).count(),
        }
    }

    fn queued(&self) -> usize {
        DataLoader::dispatch_depth(self)
    }

    fn stats_snapshot(&self) -> Statistics {
        DataLoader::statistics(self)
    }
}

impl<K, V> std::fmt::Debug for DataLoader<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoader")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchError;
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    /// Greets every key and records the batches it saw.
    struct Greeting {
        batches: Arc<Mutex<Vec<Vec<String>>>>,
    }

    #[async_trait]
    impl BatchLoader for Greeting {
        type Key = String;
        type Value = String;

        async fn load(&self, keys: Vec<String>) -> Result<Vec<String>, BatchError> {
            self.batches.lock().unwrap().push(keys.clone());
            Ok(keys.iter().map(|k| format!("Hello {k}")).collect())
        }
    }

    struct Failing;

    #[async_trait]
    impl BatchLoader for Failing {
        type Key = u32;
        type Value = u32;

        async fn load(&self, _keys: Vec<u32>) -> Result<Vec<u32>, BatchError> {
            Err(BatchError::new("backend unavailable"))
        }
    }

    struct ShortList;

    #[async_trait]
    impl BatchLoader for ShortList {
        type Key = u32;
        type Value = u32;

        async fn load(&self, keys: Vec<u32>) -> Result<Vec<u32>, BatchError> {
            Ok(keys.into_iter().skip(1).collect())
        }
    }

    struct EvenOnly;

    #[async_trait]
    impl MappedBatchLoader for EvenOnly {
        type Key = u32;
        type Value = u32;

        async fn load(&self, keys: Vec<u32>) -> Result<HashMap<u32, u32>, BatchError> {
            Ok(keys.into_iter().filter(|k| k % 2 == 0).map(|k| (k, k * 10)).collect())
        }
    }

    fn greeting() -> (DataLoader<String, String>, Arc<Mutex<Vec<Vec<String>>>>) {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let loader = DataLoader::from_batch_loader(
            "greeting",
            Greeting {
                batches: batches.clone(),
            },
        );
        (loader, batches)
    }

    #[tokio::test]
    async fn resolves_only_after_dispatch() {
        let (loader, _) = greeting();
        let pending = loader.load("Bill".into());
        assert!(!pending.is_done());

        loader.dispatch().await;
        assert!(pending.is_done());
        assert_eq!(pending.get_now(), Some(Ok("Hello Bill".to_string())));
    }

    #[tokio::test]
    async fn equal_keys_share_pending_value() {
        let (loader, batches) = greeting();
        let a = loader.load("Anne".into());
        let b = loader.load("Bill".into());
        let a2 = loader.load("Anne".into());
        assert!(a.ptr_eq(&a2));
        assert!(!a.ptr_eq(&b));
        assert_eq!(loader.dispatch_depth(), 2);

        let outcomes = loader.dispatch().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(*batches.lock().unwrap(), vec![vec!["Anne".to_string(), "Bill".to_string()]]);
    }

    #[tokio::test]
    async fn cached_value_survives_dispatch() {
        let (loader, batches) = greeting();
        loader.load("Bill".into());
        loader.dispatch().await;

        let again = loader.load("Bill".into());
        assert!(again.is_done());
        assert_eq!(loader.dispatch_depth(), 0);
        loader.dispatch().await;
        assert_eq!(batches.lock().unwrap().len(), 1);

        let stats = loader.statistics();
        assert_eq!(stats.loads, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.batch_invocations, 1);
    }

    #[tokio::test]
    async fn empty_dispatch_skips_batch_function() {
        let (loader, batches) = greeting();
        assert!(loader.dispatch().await.is_empty());
        assert!(batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_failure_fails_every_key() {
        let loader = DataLoader::from_batch_loader("failing", Failing);
        let a = loader.load(1);
        let b = loader.load(2);
        loader.dispatch().await;

        for p in [a, b] {
            match p.get_now() {
                Some(Err(e)) => assert!(e.is_batch_failure()),
                other => panic!("expected batch failure, got {other:?}"),
            }
        }
        let stats = loader.statistics();
        assert_eq!(stats.batch_failures, 1);
        assert_eq!(stats.load_errors, 2);
    }

    #[tokio::test]
    async fn length_mismatch_fails_every_key() {
        let loader = DataLoader::from_batch_loader("short", ShortList);
        let a = loader.load(1);
        let b = loader.load(2);
        loader.dispatch().await;
        assert!(matches!(a.get_now(), Some(Err(LoadError::LengthMismatch { expected: 2, actual: 1, .. }))));
        assert!(b.is_failed());
    }

    #[tokio::test]
    async fn mapped_loader_missing_key_fails_that_key_only() {
        let loader = DataLoader::from_mapped_batch_loader("even", EvenOnly);
        let two = loader.load(2);
        let three = loader.load(3);
        loader.dispatch().await;
        assert_eq!(two.get_now(), Some(Ok(20)));
        assert!(matches!(three.get_now(), Some(Err(LoadError::MissingKey { .. }))));
    }

    #[tokio::test]
    async fn max_batch_size_splits_dispatch() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let loader = DataLoader::from_batch_loader(
            "greeting",
            Greeting {
                batches: batches.clone(),
            },
        )
        .with_options(LoaderOptions::default().max_batch_size(2));
        let pending = loader.load_many(vec!["a".into(), "b".into(), "c".into()]);
        loader.dispatch().await;
        assert_eq!(batches.lock().unwrap().len(), 2);
        assert!(pending.iter().all(|p| p.is_done()));
    }

    #[tokio::test]
    async fn caching_disabled_still_dedupes_within_cycle() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let loader = DataLoader::from_batch_loader(
            "greeting",
            Greeting {
                batches: batches.clone(),
            },
        )
        .with_options(LoaderOptions::default().caching(false));
        let a = loader.load("x".into());
        let b = loader.load("x".into());
        assert!(a.ptr_eq(&b));
        loader.dispatch().await;

        let c = loader.load("x".into());
        assert!(!c.is_done());
        loader.dispatch().await;
        assert_eq!(batches.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn prime_and_clear() {
        let (loader, batches) = greeting();
        loader.prime("Bill".into(), "Hi Bill".into());
        loader.prime("Bill".into(), "ignored".into());
        assert_eq!(loader.load("Bill".into()).get_now(), Some(Ok("Hi Bill".to_string())));

        loader.prime_error("Anne".into(), LoadError::Primed { reason: "gone".into() });
        assert!(loader.load("Anne".into()).is_failed());

        loader.clear(&"Bill".to_string());
        let fresh = loader.load("Bill".into());
        assert!(!fresh.is_done());
        loader.dispatch().await;
        assert_eq!(fresh.get_now(), Some(Ok("Hello Bill".to_string())));
        assert_eq!(batches.lock().unwrap().len(), 1);

        loader.clear_all();
        assert!(!loader.load("Anne".into()).is_done());
    }

    #[tokio::test]
    async fn cache_key_function_collapses_keys() {
        let (loader, _) = greeting();
        let loader = loader.with_cache_key(Arc::new(|k: &String| k.to_lowercase()));
        assert_eq!(loader.cache_key(&"BILL".to_string()), "bill");
        let a = loader.load("Bill".into());
        let b = loader.load("BILL".into());
        assert!(a.ptr_eq(&b));
    }

    struct Chained {
        loader: Arc<Mutex<Option<Arc<DataLoader<u32, u32>>>>>,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BatchLoader for Chained {
        type Key = u32;
        type Value = u32;

        async fn load(&self, keys: Vec<u32>) -> Result<Vec<u32>, BatchError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            // The first round enqueues a follow-up key while the batch runs.
            if keys == vec![1] {
                let inner = self.loader.lock().unwrap().clone();
                if let Some(inner) = inner {
                    inner.load(2);
                }
            }
            Ok(keys)
        }
    }

    #[tokio::test]
    async fn dispatch_and_join_drains_follow_up_loads() {
        let slot = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU32::new(0));
        let loader = Arc::new(DataLoader::from_batch_loader(
            "chained",
            Chained {
                loader: slot.clone(),
                calls: calls.clone(),
            },
        ));
        *slot.lock().unwrap() = Some(loader.clone());

        loader.load(1);
        let values = loader.dispatch_and_join().await.unwrap();
        assert_eq!(values, vec![1, 2]);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        *slot.lock().unwrap() = None;
    }

    /// Panics on its first batch, then echoes keys.
    #[derive(Default)]
    struct PanicsOnce {
        fired: AtomicBool,
    }

    #[async_trait]
    impl BatchLoader for PanicsOnce {
        type Key = u32;
        type Value = u32;

        async fn load(&self, keys: Vec<u32>) -> Result<Vec<u32>, BatchError> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                panic!("backend driver crashed");
            }
            Ok(keys)
        }
    }

    struct Slow;

    #[async_trait]
    impl BatchLoader for Slow {
        type Key = u32;
        type Value = u32;

        async fn load(&self, keys: Vec<u32>) -> Result<Vec<u32>, BatchError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(keys)
        }
    }

    fn cancelled(loader: &str) -> Option<Result<u32, LoadError>> {
        Some(Err(LoadError::Cancelled {
            loader: loader.into(),
        }))
    }

    #[tokio::test]
    async fn panicking_batch_releases_its_keys() {
        let loader = DataLoader::from_batch_loader("panicky", PanicsOnce::default());
        let first = loader.load(1);
        let caught = AssertUnwindSafe(loader.dispatch()).catch_unwind().await;
        assert!(caught.is_err());
        assert_eq!(first.get_now(), cancelled("panicky"));

        let again = loader.load(1);
        assert!(!again.ptr_eq(&first));
        assert_eq!(loader.dispatch_depth(), 1);
        loader.dispatch().await;
        assert_eq!(again.get_now(), Some(Ok(1)));
        assert_eq!(loader.statistics().load_errors, 1);
    }

    #[tokio::test]
    async fn dropped_dispatch_releases_its_keys() {
        let loader = DataLoader::from_batch_loader("slow", Slow);
        let first = loader.load(1);
        let timed_out = tokio::time::timeout(Duration::from_millis(5), loader.dispatch()).await;
        assert!(timed_out.is_err());
        assert_eq!(first.get_now(), cancelled("slow"));

        let again = loader.load(1);
        assert!(!again.ptr_eq(&first));
        assert_eq!(loader.dispatch_depth(), 1);
        loader.dispatch().await;
        assert_eq!(again.await, Ok(1));
    }

    /// Answers key 1 at once; sleeps on anything else.
    struct SlowAfterFirst;

    #[async_trait]
    impl BatchLoader for SlowAfterFirst {
        type Key = u32;
        type Value = u32;

        async fn load(&self, keys: Vec<u32>) -> Result<Vec<u32>, BatchError> {
            if keys != vec![1] {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(keys)
        }
    }

    #[tokio::test]
    async fn completed_chunks_survive_a_dropped_dispatch() {
        let loader = DataLoader::from_batch_loader("partial", SlowAfterFirst)
            .with_options(LoaderOptions::default().max_batch_size(1));
        let one = loader.load(1);
        let two = loader.load(2);
        let timed_out = tokio::time::timeout(Duration::from_millis(20), loader.dispatch()).await;
        assert!(timed_out.is_err());

        assert_eq!(one.get_now(), Some(Ok(1)));
        assert!(loader.load(1).ptr_eq(&one));
        assert_eq!(two.get_now(), cancelled("partial"));
        assert_eq!(loader.dispatch_depth(), 0);
        let retry = loader.load(2);
        assert_eq!(loader.dispatch_depth(), 1);
        loader.dispatch().await;
        assert_eq!(retry.get_now(), Some(Ok(2)));
    }

    #[tokio::test]
    async fn dropping_loader_cancels_queued_keys() {
        let (loader, _) = greeting();
        let pending = loader.load("Bill".into());
        drop(loader);
        assert_eq!(
            pending.await,
            Err(LoadError::Cancelled {
                loader: "greeting".into()
            })
        );
    }

    #[tokio::test]
    async fn trait_object_forwards() {
        let (loader, _) = greeting();
        let dyn_loader: Arc<dyn Loader<String, String>> = Arc::new(loader);
        let p = dyn_loader.load("Bill".into()).unwrap();
        assert_eq!(dyn_loader.dispatch_depth().unwrap(), 1);
        let values = dyn_loader.dispatch_and_join().await.unwrap();
        assert_eq!(values, vec!["Hello Bill".to_string()]);
        assert!(p.is_done());
    }
}

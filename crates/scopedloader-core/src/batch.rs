//! Batch function traits and the adapters that feed them to a `DataLoader`.
//!
//! Users implement [`BatchLoader`] (keys → values, positional) or
//! [`MappedBatchLoader`] (keys → key/value map). The key and value types are
//! associated types, so they are fully determined by the implementing type.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BatchError;

/// Bounds every loader key must satisfy.
pub trait LoaderKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> LoaderKey for T {}

/// Bounds every loader value must satisfy.
pub trait LoaderValue: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> LoaderValue for T {}

/// List-style batch function: the i-th value answers the i-th key.
#[async_trait]
pub trait BatchLoader: Send + Sync + 'static {
    type Key: LoaderKey;
    type Value: LoaderValue;

    /// Load values for `keys`. Must return exactly one value per key.
    async fn load(&self, keys: Vec<Self::Key>) -> Result<Vec<Self::Value>, BatchError>;
}

/// Mapping-style batch function: values are looked up by key.
///
/// Keys missing from the returned map resolve to
/// [`LoadError::MissingKey`](crate::error::LoadError::MissingKey).
#[async_trait]
pub trait MappedBatchLoader: Send + Sync + 'static {
    type Key: LoaderKey;
    type Value: LoaderValue;

    async fn load(
        &self,
        keys: Vec<Self::Key>,
    ) -> Result<HashMap<Self::Key, Self::Value>, BatchError>;
}

/// Result of one batch call, before it is matched against pending keys.
pub enum Batched<K, V> {
    Positional(Vec<V>),
    Keyed(HashMap<K, V>),
}

/// Object-safe batch function used inside a `DataLoader`.
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync {
    async fn call(&self, keys: Vec<K>) -> Result<Batched<K, V>, BatchError>;
}

/// Produces the batch function implementation to call for one dispatch.
pub type Provider<L> = Arc<dyn Fn() -> Arc<L> + Send + Sync>;

/// Wraps a [`BatchLoader`], resolving it through a provider on every call.
pub struct ListAdapter<L> {
    provider: Provider<L>,
}

impl<L: BatchLoader> ListAdapter<L> {
    /// Share one instance across all dispatches.
    pub fn new(loader: L) -> Self {
        let loader = Arc::new(loader);
        Self::with_provider(Arc::new(move || loader.clone()))
    }

    /// Resolve the implementation on every dispatch (it may hold per-scope
    /// dependencies).
    pub fn with_provider(provider: Provider<L>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<L: BatchLoader> BatchFn<L::Key, L::Value> for ListAdapter<L> {
    async fn call(&self, keys: Vec<L::Key>) -> Result<Batched<L::Key, L::Value>, BatchError> {
        let loader = (self.provider)();
        loader.load(keys).await.map(Batched::Positional)
    }
}

/// Wraps a [`MappedBatchLoader`], resolving it through a provider on every call.
pub struct MappedAdapter<L> {
    provider: Provider<L>,
}

impl<L: MappedBatchLoader> MappedAdapter<L> {
    pub fn new(loader: L) -> Self {
        let loader = Arc::new(loader);
        Self::with_provider(Arc::new(move || loader.clone()))
    }

    pub fn with_provider(provider: Provider<L>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<L: MappedBatchLoader> BatchFn<L::Key, L::Value> for MappedAdapter<L> {
    async fn call(&self, keys: Vec<L::Key>) -> Result<Batched<L::Key, L::Value>, BatchError> {
        let loader = (self.provider)();
        loader.load(keys).await.map(Batched::Keyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Upper;

    #[async_trait]
    impl BatchLoader for Upper {
        type Key = String;
        type Value = String;

        async fn load(&self, keys: Vec<String>) -> Result<Vec<String>, BatchError> {
            Ok(keys.iter().map(|k| k.to_uppercase()).collect())
        }
    }

    struct Lengths;

    #[async_trait]
    impl MappedBatchLoader for Lengths {
        type Key = String;
        type Value = usize;

        async fn load(&self, keys: Vec<String>) -> Result<HashMap<String, usize>, BatchError> {
            Ok(keys.into_iter().map(|k| (k.clone(), k.len())).collect())
        }
    }

    #[tokio::test]
    async fn list_adapter_is_positional() {
        let adapter = ListAdapter::new(Upper);
        match adapter.call(vec!["a".into(), "b".into()]).await.unwrap() {
            Batched::Positional(v) => assert_eq!(v, vec!["A", "B"]),
            Batched::Keyed(_) => panic!("expected positional result"),
        }
    }

    #[tokio::test]
    async fn mapped_adapter_is_keyed() {
        let adapter = MappedAdapter::new(Lengths);
        match adapter.call(vec!["abc".into()]).await.unwrap() {
            Batched::Keyed(m) => assert_eq!(m.get("abc"), Some(&3)),
            Batched::Positional(_) => panic!("expected keyed result"),
        }
    }

    #[tokio::test]
    async fn provider_resolved_per_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let adapter = ListAdapter::with_provider(Arc::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            Arc::new(Upper)
        }));
        adapter.call(vec!["x".into()]).await.unwrap();
        adapter.call(vec!["y".into()]).await.unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}

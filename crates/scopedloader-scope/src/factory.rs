//! One `DataLoader` per (scope, binding).

use std::sync::Arc;

use scopedloader_core::batch::{BatchFn, ListAdapter, MappedAdapter};
use scopedloader_core::{
    AnyLoader, BatchLoader, CacheKeyFn, DataLoader, LoaderKey, LoaderOptions, LoaderValue,
    MappedBatchLoader, ScopeError,
};

use crate::descriptor::LoaderName;
use crate::scope::{ScopeKey, ScopeProvider, ScopedInstance, TaskLocalScope};

/// Creates and finds the scope-local [`DataLoader`] of one named binding.
///
/// The batch function is shared by every scope; the loader state (cache and
/// queue) is not.
pub struct ScopedLoaderFactory<K, V> {
    name: LoaderName,
    key: ScopeKey,
    batch_fn: Arc<dyn BatchFn<K, V>>,
    options: LoaderOptions,
    cache_key_fn: Option<CacheKeyFn<K>>,
    scopes: Arc<dyn ScopeProvider>,
}

impl<K: LoaderKey, V: LoaderValue> ScopedLoaderFactory<K, V> {
    pub fn new(
        name: impl Into<LoaderName>,
        batch_fn: Arc<dyn BatchFn<K, V>>,
        options: LoaderOptions,
        scopes: Arc<dyn ScopeProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            key: ScopeKey::next(),
            batch_fn,
            options,
            cache_key_fn: None,
            scopes,
        }
    }

    /// Factory over a shared list-style batch function, scoped by the
    /// calling task's [`RequestScope`](crate::scope::RequestScope).
    pub fn for_batch_loader<L>(name: impl Into<LoaderName>, loader: L) -> Self
    where
        L: BatchLoader<Key = K, Value = V>,
    {
        Self::new(
            name,
            Arc::new(ListAdapter::new(loader)),
            LoaderOptions::default(),
            Arc::new(TaskLocalScope),
        )
    }

    pub fn for_mapped_batch_loader<L>(name: impl Into<LoaderName>, loader: L) -> Self
    where
        L: MappedBatchLoader<Key = K, Value = V>,
    {
        Self::new(
            name,
            Arc::new(MappedAdapter::new(loader)),
            LoaderOptions::default(),
            Arc::new(TaskLocalScope),
        )
    }

    pub fn with_options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    /// Every loader this factory creates caches under `f(key)`.
    pub fn with_cache_key(mut self, f: CacheKeyFn<K>) -> Self {
        self.cache_key_fn = Some(f);
        self
    }

    pub fn with_scope_provider(mut self, scopes: Arc<dyn ScopeProvider>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn name(&self) -> &LoaderName {
        &self.name
    }

    pub fn scope_key(&self) -> ScopeKey {
        self.key
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Returns `true` if a scope is active for the caller.
    pub fn is_active(&self) -> bool {
        self.scopes.is_active()
    }

    /// The active scope's loader, created on first use.
    ///
    /// # Errors
    /// [`ScopeError::Inactive`] when called outside a scope.
    pub fn get_or_create(&self) -> Result<Arc<DataLoader<K, V>>, ScopeError> {
        let create = || -> ScopedInstance {
            tracing::debug!(loader = %self.name, key = %self.key, "creating scoped loader");
            let loader = DataLoader::new(
                self.name.to_string(),
                self.batch_fn.clone(),
                self.options.clone(),
            );
            let loader = match &self.cache_key_fn {
                Some(f) => loader.with_cache_key(f.clone()),
                None => loader,
            };
            Arc::new(loader)
        };
        match self.scopes.get_or_create(self.key, &create) {
            Some(instance) => self.downcast(instance),
            None => {
                tracing::error!(loader = %self.name, "loader used with no scope active");
                Err(ScopeError::Inactive {
                    loader: self.name.to_string(),
                })
            }
        }
    }

    /// The active scope's loader if it was already created. `Ok(None)` when
    /// no scope is active or the loader was never touched in this scope.
    pub fn current(&self) -> Result<Option<Arc<DataLoader<K, V>>>, ScopeError> {
        self.scopes
            .get(self.key)
            .map(|instance| self.downcast(instance))
            .transpose()
    }

    /// [`current`](Self::current), type-erased for the registry.
    pub fn current_erased(&self) -> Result<Option<Arc<dyn AnyLoader>>, ScopeError> {
        Ok(self
            .current()?
            .map(|loader| loader as Arc<dyn AnyLoader>))
    }

    fn downcast(&self, instance: ScopedInstance) -> Result<Arc<DataLoader<K, V>>, ScopeError> {
        instance.downcast::<DataLoader<K, V>>().map_err(|_| {
            tracing::error!(loader = %self.name, key = %self.key, "scope slot holds a foreign type");
            ScopeError::InstanceTypeMismatch {
                loader: self.name.to_string(),
            }
        })
    }
}

impl<K, V> std::fmt::Debug for ScopedLoaderFactory<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedLoaderFactory")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("options", &self.options)
            .field("cache_key_fn", &self.cache_key_fn.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::RequestScope;
    use async_trait::async_trait;
    use scopedloader_core::BatchError;

    struct Double;

    #[async_trait]
    impl BatchLoader for Double {
        type Key = u32;
        type Value = u32;

        async fn load(&self, keys: Vec<u32>) -> Result<Vec<u32>, BatchError> {
            Ok(keys.into_iter().map(|k| k * 2).collect())
        }
    }

    /// Hands out a `String` for every key, regardless of what was asked.
    struct Corrupt;

    impl ScopeProvider for Corrupt {
        fn is_active(&self) -> bool {
            true
        }

        fn get_or_create(
            &self,
            _key: ScopeKey,
            _create: &dyn Fn() -> ScopedInstance,
        ) -> Option<ScopedInstance> {
            Some(Arc::new(String::from("not a loader")))
        }

        fn get(&self, _key: ScopeKey) -> Option<ScopedInstance> {
            None
        }
    }

    #[test]
    fn inactive_outside_scope() {
        let factory = ScopedLoaderFactory::for_batch_loader("double", Double);
        assert!(!factory.is_active());
        assert_eq!(
            factory.get_or_create().unwrap_err(),
            ScopeError::Inactive {
                loader: "double".into()
            }
        );
        assert!(factory.current().unwrap().is_none());
    }

    #[test]
    fn one_instance_per_scope() {
        let factory = ScopedLoaderFactory::for_batch_loader("double", Double);
        let scope = RequestScope::new();
        let (a, b) = scope.enter(|| {
            assert!(factory.current().unwrap().is_none());
            (factory.get_or_create().unwrap(), factory.get_or_create().unwrap())
        });
        assert!(Arc::ptr_eq(&a, &b));

        let other = RequestScope::new().enter(|| factory.get_or_create().unwrap());
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[test]
    fn options_reach_instances() {
        let factory = ScopedLoaderFactory::for_batch_loader("double", Double)
            .with_options(LoaderOptions::default().caching(false));
        let loader = RequestScope::new().enter(|| factory.get_or_create().unwrap());
        assert!(!loader.options().caching_enabled);
        assert_eq!(loader.name(), "double");
    }

    #[tokio::test]
    async fn cache_key_reaches_instances() {
        let factory = ScopedLoaderFactory::for_batch_loader("double", Double)
            .with_cache_key(Arc::new(|k: &u32| k % 10));
        let loader = RequestScope::new().enter(|| factory.get_or_create().unwrap());
        assert_eq!(loader.cache_key(&13), 3);
        let a = loader.load(3);
        let b = loader.load(13);
        assert!(a.ptr_eq(&b));
        assert_eq!(loader.dispatch_depth(), 1);
        loader.dispatch().await;
        assert_eq!(b.await, Ok(6));
    }

    #[test]
    fn foreign_instance_is_rejected() {
        let factory = ScopedLoaderFactory::for_batch_loader("double", Double)
            .with_scope_provider(Arc::new(Corrupt));
        assert!(matches!(
            factory.get_or_create(),
            Err(ScopeError::InstanceTypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn erased_view_dispatches() {
        let factory = ScopedLoaderFactory::for_batch_loader("double", Double);
        RequestScope::new()
            .run(async {
                let loader = factory.get_or_create().unwrap();
                let pending = loader.load(21);
                let erased = factory.current_erased().unwrap().unwrap();
                assert_eq!(erased.queued(), 1);
                let report = erased.dispatch_erased().await;
                assert_eq!(report.keys, 1);
                assert_eq!(pending.await, Ok(42));
            })
            .await;
    }
}

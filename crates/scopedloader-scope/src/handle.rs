//! Stable, scope-resolving loader handles.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use scopedloader_core::{
    AnyLoader, DataLoader, LoadError, Loader, LoaderError, LoaderKey, LoaderValue,
    PendingValue, ScopeError, Statistics,
};

use crate::descriptor::{LoaderName, TypeDescriptor};
use crate::factory::ScopedLoaderFactory;

/// Long-lived handle to a named loader.
///
/// Holds no cache state. Every call resolves the active scope's
/// [`DataLoader`] (creating it on first use) and forwards to it, so one
/// handle injected at startup observes a fresh loader per unit of work.
pub struct LoaderHandle<K, V> {
    factory: Arc<ScopedLoaderFactory<K, V>>,
}

impl<K: LoaderKey, V: LoaderValue> LoaderHandle<K, V> {
    pub fn new(factory: ScopedLoaderFactory<K, V>) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }

    pub fn factory(&self) -> &ScopedLoaderFactory<K, V> {
        &self.factory
    }

    /// The loader backing this handle in the active scope.
    pub fn resolve(&self) -> Result<Arc<DataLoader<K, V>>, ScopeError> {
        self.factory.get_or_create()
    }
}

impl<K, V> Clone for LoaderHandle<K, V> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for LoaderHandle<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LoaderHandle").field(&self.factory).finish()
    }
}

#[async_trait]
impl<K: LoaderKey, V: LoaderValue> Loader<K, V> for LoaderHandle<K, V> {
    fn name(&self) -> &str {
        self.factory.name().as_str()
    }

    fn load(&self, key: K) -> Result<PendingValue<V>, LoaderError> {
        Ok(self.resolve()?.load(key))
    }

    fn load_many(&self, keys: Vec<K>) -> Result<Vec<PendingValue<V>>, LoaderError> {
        Ok(self.resolve()?.load_many(keys))
    }

    async fn dispatch(&self) -> Result<Vec<Result<V, LoadError>>, LoaderError> {
        let loader = self.resolve()?;
        Ok(loader.dispatch().await)
    }

    async fn dispatch_and_join(&self) -> Result<Vec<V>, LoaderError> {
        let loader = self.resolve()?;
        Ok(loader.dispatch_and_join().await?)
    }

    fn dispatch_depth(&self) -> Result<usize, LoaderError> {
        Ok(self.resolve()?.dispatch_depth())
    }

    fn clear(&self, key: &K) -> Result<(), LoaderError> {
        self.resolve()?.clear(key);
        Ok(())
    }

    fn clear_all(&self) -> Result<(), LoaderError> {
        self.resolve()?.clear_all();
        Ok(())
    }

    fn prime(&self, key: K, value: V) -> Result<(), LoaderError> {
        self.resolve()?.prime(key, value);
        Ok(())
    }

    fn prime_error(&self, key: K, error: LoadError) -> Result<(), LoaderError> {
        self.resolve()?.prime_error(key, error);
        Ok(())
    }

    fn cache_key(&self, key: &K) -> Result<K, LoaderError> {
        Ok(self.resolve()?.cache_key(key))
    }

    fn statistics(&self) -> Result<Statistics, LoaderError> {
        Ok(self.resolve()?.statistics())
    }
}

/// A handle stored in the registry, with its key and value types erased.
pub trait RegisteredLoader: Send + Sync {
    fn loader_name(&self) -> &LoaderName;

    fn key_type(&self) -> TypeDescriptor;

    fn value_type(&self) -> TypeDescriptor;

    /// Returns `true` if a scope is active for the caller.
    fn is_active(&self) -> bool;

    /// The loader already created in the active scope, if any. Never creates.
    fn active_instance(&self) -> Result<Option<Arc<dyn AnyLoader>>, ScopeError>;

    /// For downcasting back to `LoaderHandle<K, V>`.
    fn as_any(&self) -> &dyn Any;
}

impl<K: LoaderKey, V: LoaderValue> RegisteredLoader for LoaderHandle<K, V> {
    fn loader_name(&self) -> &LoaderName {
        self.factory.name()
    }

    fn key_type(&self) -> TypeDescriptor {
        TypeDescriptor::of::<K>()
    }

    fn value_type(&self) -> TypeDescriptor {
        TypeDescriptor::of::<V>()
    }

    fn is_active(&self) -> bool {
        self.factory.is_active()
    }

    fn active_instance(&self) -> Result<Option<Arc<dyn AnyLoader>>, ScopeError> {
        self.factory.current_erased()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

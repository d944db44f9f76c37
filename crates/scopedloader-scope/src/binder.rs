//! Startup-time loader binding.
//!
//! ```no_run
//! # use scopedloader_scope::{LoaderBinder, BindError};
//! # use scopedloader_core::{BatchError, BatchLoader};
//! # struct Greeting;
//! # #[async_trait::async_trait]
//! # impl BatchLoader for Greeting {
//! #     type Key = String;
//! #     type Value = String;
//! #     async fn load(&self, keys: Vec<String>) -> Result<Vec<String>, BatchError> { Ok(keys) }
//! # }
//! # fn main() -> Result<(), BindError> {
//! let mut binder = LoaderBinder::new();
//! binder.bind("greeting").to_batch_loader(Greeting)?;
//! let module = binder.build();
//!
//! let _greeting = module.handle::<String, String>("greeting")?;
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use scopedloader_core::batch::{BatchFn, ListAdapter, MappedAdapter};
use scopedloader_core::{
    BatchLoader, CacheKeyFn, LoaderKey, LoaderOptions, LoaderValue, MappedBatchLoader,
};

use crate::config::BinderConfig;
use crate::descriptor::{LoaderDescriptor, LoaderName};
use crate::error::BindError;
use crate::factory::ScopedLoaderFactory;
use crate::handle::LoaderHandle;
use crate::registry::LoaderRegistry;
use crate::scope::{ScopeProvider, TaskLocalScope};

/// Collects named loader bindings and builds a [`LoaderModule`].
pub struct LoaderBinder {
    registry: LoaderRegistry,
    descriptors: BTreeMap<LoaderName, LoaderDescriptor>,
    config: BinderConfig,
    scopes: Arc<dyn ScopeProvider>,
}

impl LoaderBinder {
    /// Binder whose loaders are scoped by the calling task's
    /// [`RequestScope`](crate::scope::RequestScope).
    pub fn new() -> Self {
        Self {
            registry: LoaderRegistry::new(),
            descriptors: BTreeMap::new(),
            config: BinderConfig::default(),
            scopes: Arc::new(TaskLocalScope),
        }
    }

    /// Use another scoping collaborator for loaders bound after this call.
    pub fn with_scope_provider(mut self, scopes: Arc<dyn ScopeProvider>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Default and per-name options for loaders bound after this call.
    pub fn config(mut self, config: BinderConfig) -> Self {
        self.config = config;
        self
    }

    /// Start a binding under `name`.
    pub fn bind(&mut self, name: impl Into<LoaderName>) -> BindingBuilder<'_> {
        BindingBuilder {
            binder: self,
            name: name.into(),
            options: None,
            cache_key: None,
        }
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn build(self) -> LoaderModule {
        tracing::debug!(loaders = self.registry.len(), "loader module built");
        LoaderModule {
            registry: Arc::new(self.registry),
            descriptors: Arc::new(self.descriptors),
        }
    }
}

impl Default for LoaderBinder {
    fn default() -> Self {
        Self::new()
    }
}

/// One pending binding. Finished by a `to_*` call.
pub struct BindingBuilder<'a> {
    binder: &'a mut LoaderBinder,
    name: LoaderName,
    options: Option<LoaderOptions>,
    cache_key: Option<ErasedCacheKey>,
}

/// A `CacheKeyFn<K>` whose `K` is checked when the binding finishes.
struct ErasedCacheKey {
    f: Arc<dyn Any + Send + Sync>,
    key_type: &'static str,
}

impl<'a> BindingBuilder<'a> {
    /// Options for this loader, replacing the configured ones.
    pub fn options(mut self, options: LoaderOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Cache under `f(key)` in every scope. `K` must be the bound
    /// implementation's key type.
    pub fn cache_key<K, F>(mut self, f: F) -> Self
    where
        K: LoaderKey,
        F: Fn(&K) -> K + Send + Sync + 'static,
    {
        let f: CacheKeyFn<K> = Arc::new(f);
        self.cache_key = Some(ErasedCacheKey {
            f: Arc::new(f),
            key_type: std::any::type_name::<K>(),
        });
        self
    }

    /// Bind a list-style batch function shared by every scope.
    pub fn to_batch_loader<L: BatchLoader>(self, loader: L) -> Result<&'a mut LoaderBinder, BindError> {
        self.finish::<L::Key, L::Value>(
            Arc::new(ListAdapter::new(loader)),
            LoaderDescriptor::of_batch_loader::<L>(),
        )
    }

    /// Bind a list-style batch function obtained from `provider` on every
    /// dispatch.
    pub fn to_batch_loader_with<L, F>(self, provider: F) -> Result<&'a mut LoaderBinder, BindError>
    where
        L: BatchLoader,
        F: Fn() -> Arc<L> + Send + Sync + 'static,
    {
        self.finish::<L::Key, L::Value>(
            Arc::new(ListAdapter::<L>::with_provider(Arc::new(provider))),
            LoaderDescriptor::of_batch_loader::<L>(),
        )
    }

    pub fn to_mapped_batch_loader<L: MappedBatchLoader>(
        self,
        loader: L,
    ) -> Result<&'a mut LoaderBinder, BindError> {
        self.finish::<L::Key, L::Value>(
            Arc::new(MappedAdapter::new(loader)),
            LoaderDescriptor::of_mapped_batch_loader::<L>(),
        )
    }

    pub fn to_mapped_batch_loader_with<L, F>(
        self,
        provider: F,
    ) -> Result<&'a mut LoaderBinder, BindError>
    where
        L: MappedBatchLoader,
        F: Fn() -> Arc<L> + Send + Sync + 'static,
    {
        self.finish::<L::Key, L::Value>(
            Arc::new(MappedAdapter::<L>::with_provider(Arc::new(provider))),
            LoaderDescriptor::of_mapped_batch_loader::<L>(),
        )
    }

    fn finish<K: LoaderKey, V: LoaderValue>(
        self,
        batch_fn: Arc<dyn BatchFn<K, V>>,
        descriptor: LoaderDescriptor,
    ) -> Result<&'a mut LoaderBinder, BindError> {
        let binder = self.binder;
        let options = self
            .options
            .unwrap_or_else(|| binder.config.options_for(self.name.as_str()));
        let mut factory = ScopedLoaderFactory::new(
            self.name.clone(),
            batch_fn,
            options,
            binder.scopes.clone(),
        );
        if let Some(erased) = self.cache_key {
            let f = erased.f.downcast::<CacheKeyFn<K>>().map_err(|_| {
                BindError::TypeMismatch {
                    name: self.name.to_string(),
                    expected: format!("cache key over {}", erased.key_type),
                    actual: descriptor.signature(),
                }
            })?;
            factory = factory.with_cache_key(f.as_ref().clone());
        }
        binder
            .registry
            .register(self.name.clone(), LoaderHandle::new(factory))?;
        tracing::debug!(
            loader = %self.name,
            kind = %descriptor.kind(),
            signature = %descriptor.signature(),
            "bound loader"
        );
        binder.descriptors.insert(self.name, descriptor);
        Ok(binder)
    }
}

/// The built set of loaders: typed handles by name plus the registry.
///
/// Cheap to clone; every clone hands out handles to the same bindings.
#[derive(Clone)]
pub struct LoaderModule {
    registry: Arc<LoaderRegistry>,
    descriptors: Arc<BTreeMap<LoaderName, LoaderDescriptor>>,
}

impl LoaderModule {
    /// Typed handle for `name`.
    ///
    /// # Errors
    /// [`BindError::UnknownLoader`] or [`BindError::TypeMismatch`] when
    /// `K`/`V` differ from the bound implementation's types.
    pub fn handle<K: LoaderKey, V: LoaderValue>(
        &self,
        name: &str,
    ) -> Result<LoaderHandle<K, V>, BindError> {
        let (name, descriptor) =
            self.descriptors
                .get_key_value(name)
                .ok_or_else(|| BindError::UnknownLoader {
                    name: name.to_string(),
                })?;
        descriptor.expect::<K, V>(name)?;
        self.registry.handle(name.as_str())
    }

    pub fn descriptor(&self, name: &str) -> Option<&LoaderDescriptor> {
        self.descriptors.get(name)
    }

    pub fn registry(&self) -> Arc<LoaderRegistry> {
        self.registry.clone()
    }

    pub fn names(&self) -> impl Iterator<Item = &LoaderName> {
        self.descriptors.keys()
    }
}

impl std::fmt::Debug for LoaderBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.descriptors.iter().map(|(n, d)| (n.as_str(), d.signature())))
            .finish()
    }
}

impl std::fmt::Debug for LoaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.descriptors.iter().map(|(n, d)| (n.as_str(), d.signature())))
            .finish()
    }
}

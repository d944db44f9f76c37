//! Named loader registry and per-scope snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use scopedloader_core::{AnyLoader, DispatchReport, LoaderKey, LoaderValue, ScopeError, Statistics};

use crate::descriptor::{signature, LoaderName};
use crate::error::BindError;
use crate::handle::{LoaderHandle, RegisteredLoader};

/// Name → handle mapping, built once at startup.
///
/// Shared as `Arc<LoaderRegistry>` after construction and never mutated
/// again. Iteration is by name, so registration order has no effect.
#[derive(Default)]
pub struct LoaderRegistry {
    entries: BTreeMap<LoaderName, Arc<dyn RegisteredLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `name`.
    ///
    /// # Errors
    /// [`BindError::DuplicateName`] if `name` is taken.
    pub fn register<K: LoaderKey, V: LoaderValue>(
        &mut self,
        name: impl Into<LoaderName>,
        handle: LoaderHandle<K, V>,
    ) -> Result<(), BindError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(BindError::DuplicateName {
                name: name.to_string(),
            });
        }
        tracing::debug!(loader = %name, "registered loader");
        self.entries.insert(name, Arc::new(handle));
        Ok(())
    }

    pub fn all(&self) -> &BTreeMap<LoaderName, Arc<dyn RegisteredLoader>> {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn RegisteredLoader>> {
        self.entries.get(name)
    }

    /// Typed handle for `name`.
    ///
    /// # Errors
    /// [`BindError::UnknownLoader`] or [`BindError::TypeMismatch`].
    pub fn handle<K: LoaderKey, V: LoaderValue>(
        &self,
        name: &str,
    ) -> Result<LoaderHandle<K, V>, BindError> {
        let entry = self.get(name).ok_or_else(|| BindError::UnknownLoader {
            name: name.to_string(),
        })?;
        entry
            .as_any()
            .downcast_ref::<LoaderHandle<K, V>>()
            .cloned()
            .ok_or_else(|| BindError::TypeMismatch {
                name: name.to_string(),
                expected: signature(std::any::type_name::<K>(), std::any::type_name::<V>()),
                actual: signature(entry.key_type().name(), entry.value_type().name()),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &LoaderName> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the loaders already created in the active scope.
    ///
    /// Loaders not yet touched in this scope are left out rather than
    /// created.
    ///
    /// # Errors
    /// [`ScopeError::Inactive`] when called outside a scope.
    pub fn scoped(&self) -> Result<ScopedRegistry, ScopeError> {
        let mut loaders = BTreeMap::new();
        for (name, entry) in &self.entries {
            if !entry.is_active() {
                tracing::error!(loader = %name, "registry used with no scope active");
                return Err(ScopeError::Inactive {
                    loader: name.to_string(),
                });
            }
            if let Some(instance) = entry.active_instance()? {
                loaders.insert(name.clone(), instance);
            }
        }
        Ok(ScopedRegistry { loaders })
    }

    /// Dispatch every loader active in the current scope.
    pub async fn dispatch_all(&self) -> Result<BTreeMap<LoaderName, DispatchReport>, ScopeError> {
        Ok(self.scoped()?.dispatch_all().await)
    }

    /// Keys queued across the active scope's loaders.
    pub fn dispatch_depth(&self) -> Result<usize, ScopeError> {
        Ok(self.scoped()?.dispatch_depth())
    }

    /// Combined counters of the active scope's loaders.
    pub fn statistics(&self) -> Result<Statistics, ScopeError> {
        Ok(self.scoped()?.statistics())
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("names", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Name → loader instance, for one scope.
pub struct ScopedRegistry {
    loaders: BTreeMap<LoaderName, Arc<dyn AnyLoader>>,
}

impl ScopedRegistry {
    pub fn get(&self, name: &str) -> Option<&Arc<dyn AnyLoader>> {
        self.loaders.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &LoaderName> {
        self.loaders.keys()
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    /// Dispatch every loader in the snapshot concurrently.
    ///
    /// Each loader drains its own queue; one loader's batch failure does not
    /// affect the others.
    pub async fn dispatch_all(&self) -> BTreeMap<LoaderName, DispatchReport> {
        let dispatches = self.loaders.iter().map(|(name, loader)| async move {
            (name.clone(), loader.dispatch_erased().await)
        });
        let reports: BTreeMap<_, _> = futures::future::join_all(dispatches)
            .await
            .into_iter()
            .collect();

        let keys: usize = reports.values().map(|r| r.keys).sum();
        tracing::debug!(loaders = reports.len(), keys, "dispatched scope");
        for (name, report) in &reports {
            if report.failed > 0 {
                tracing::warn!(loader = %name, failed = report.failed, keys = report.keys, "dispatch had failures");
            }
        }
        reports
    }

    pub fn dispatch_depth(&self) -> usize {
        self.loaders.values().map(|l| l.queued()).sum()
    }

    pub fn statistics(&self) -> Statistics {
        self.loaders
            .values()
            .map(|l| l.stats_snapshot())
            .fold(Statistics::default(), Statistics::combine)
    }

    /// Per-loader counters.
    pub fn statistics_by_name(&self) -> BTreeMap<LoaderName, Statistics> {
        self.loaders
            .iter()
            .map(|(name, l)| (name.clone(), l.stats_snapshot()))
            .collect()
    }
}

impl std::fmt::Debug for ScopedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedRegistry")
            .field("names", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

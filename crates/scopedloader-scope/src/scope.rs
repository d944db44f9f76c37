//! Unit-of-work scopes.
//!
//! A [`RequestScope`] owns the loader instances created while it is active.
//! Code runs "inside" a scope through [`RequestScope::run`] (async) or
//! [`RequestScope::enter`] (sync); the scope is found again through a tokio
//! task-local. Dropping the last clone of a scope drops every instance it
//! created.
//!
//! Task-locals are not inherited by spawned tasks. To keep using scoped
//! loaders from a spawned task, capture [`RequestScope::current`] and run the
//! task body through [`RequestScope::run`].

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// An instance stored in a scope.
pub type ScopedInstance = Arc<dyn Any + Send + Sync>;

tokio::task_local! {
    static CURRENT_SCOPE: RequestScope;
}

/// Identity of one scoped binding. Allocated once per binding and used as
/// the storage key inside every scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(u64);

impl ScopeKey {
    /// Allocate a key no other binding in this process shares.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-key#{}", self.0)
    }
}

/// The scoping collaborator: answers "is a scope active" and hands out the
/// scope-local instance for a key.
///
/// # Thread Safety
/// `get_or_create` must create at most one instance per key per scope, even
/// when called concurrently.
pub trait ScopeProvider: Send + Sync + 'static {
    /// Returns `true` if a scope is active for the caller.
    fn is_active(&self) -> bool;

    /// Return the instance stored under `key` in the active scope, creating
    /// it with `create` if absent. `None` when no scope is active.
    ///
    /// `create` runs while the slot is locked and must not re-enter the
    /// scope.
    fn get_or_create(
        &self,
        key: ScopeKey,
        create: &dyn Fn() -> ScopedInstance,
    ) -> Option<ScopedInstance>;

    /// Return the instance stored under `key` without creating it.
    fn get(&self, key: ScopeKey) -> Option<ScopedInstance>;
}

struct ScopeInner {
    id: u64,
    instances: DashMap<ScopeKey, ScopedInstance>,
}

/// Storage for one unit of work (e.g. one inbound request).
#[derive(Clone)]
pub struct RequestScope {
    inner: Arc<ScopeInner>,
}

impl RequestScope {
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            inner: Arc::new(ScopeInner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                instances: DashMap::new(),
            }),
        }
    }

    /// Process-unique scope id, for logging.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The scope the current task (or thread, inside `enter`) runs in.
    pub fn current() -> Option<RequestScope> {
        CURRENT_SCOPE.try_with(|scope| scope.clone()).ok()
    }

    /// Run `fut` with this scope active.
    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        CURRENT_SCOPE.scope(self.clone(), fut).await
    }

    /// Run synchronous code with this scope active.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT_SCOPE.sync_scope(self.clone(), f)
    }

    /// Atomic create-if-absent.
    pub fn get_or_create(
        &self,
        key: ScopeKey,
        create: &dyn Fn() -> ScopedInstance,
    ) -> ScopedInstance {
        self.inner
            .instances
            .entry(key)
            .or_insert_with(|| {
                tracing::trace!(scope = self.inner.id, key = %key, "creating scoped instance");
                create()
            })
            .value()
            .clone()
    }

    pub fn get(&self, key: ScopeKey) -> Option<ScopedInstance> {
        self.inner.instances.get(&key).map(|entry| entry.value().clone())
    }

    /// Number of instances created in this scope so far.
    pub fn len(&self) -> usize {
        self.inner.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.instances.is_empty()
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("id", &self.inner.id)
            .field("instances", &self.inner.instances.len())
            .finish()
    }
}

/// Run `fut` inside a fresh scope that is dropped when it completes.
pub async fn in_request_scope<F: Future>(fut: F) -> F::Output {
    RequestScope::new().run(fut).await
}

/// Default provider: the scope is whichever [`RequestScope`] the calling
/// task entered.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskLocalScope;

impl ScopeProvider for TaskLocalScope {
    fn is_active(&self) -> bool {
        RequestScope::current().is_some()
    }

    fn get_or_create(
        &self,
        key: ScopeKey,
        create: &dyn Fn() -> ScopedInstance,
    ) -> Option<ScopedInstance> {
        RequestScope::current().map(|scope| scope.get_or_create(key, create))
    }

    fn get(&self, key: ScopeKey) -> Option<ScopedInstance> {
        RequestScope::current().and_then(|scope| scope.get(key))
    }
}

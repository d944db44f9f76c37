//! Loader names and type descriptors.
//!
//! The key and value types of a binding come from the batch function's
//! associated types. For
//!
//! ```text
//! struct Prefixed<T>(..);
//! impl<T: LoaderKey + Display> BatchLoader for Prefixed<T> {
//!     type Key = T;
//!     type Value = String;
//!     ..
//! }
//! ```
//!
//! `LoaderDescriptor::of_batch_loader::<Prefixed<u64>>()` resolves
//! `Key = u64`, `Value = String` at compile time, nested parameters
//! (`Vec<String>`, `HashMap<u32, Vec<u8>>`) included. An implementation that
//! is still generic cannot be described at all:
//!
//! ```compile_fail
//! use scopedloader_scope::LoaderDescriptor;
//!
//! fn describe<L>() -> LoaderDescriptor {
//!     // `L` has no `BatchLoader` bound, so its key/value types are unknown.
//!     LoaderDescriptor::of_batch_loader::<L>()
//! }
//! ```

use std::any::TypeId;
use std::borrow::Borrow;
use std::sync::Arc;

use scopedloader_core::{BatchLoader, MappedBatchLoader};

use crate::error::BindError;

/// Name of a bound loader, unique within a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderName(Arc<str>);

impl LoaderName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LoaderName {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for LoaderName {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl Borrow<str> for LoaderName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LoaderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A concrete Rust type, identified by `TypeId` and named for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    id: TypeId,
    name: &'static str,
}

impl TypeDescriptor {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl std::fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// How a batch function answers its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Values in key order.
    List,
    /// Values keyed by key.
    Mapped,
}

impl std::fmt::Display for BatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::List => write!(f, "list"),
            Self::Mapped => write!(f, "mapped"),
        }
    }
}

/// Batch function implementation plus its resolved key and value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderDescriptor {
    implementation: TypeDescriptor,
    kind: BatchKind,
    key: TypeDescriptor,
    value: TypeDescriptor,
}

impl LoaderDescriptor {
    pub fn of_batch_loader<L: BatchLoader>() -> Self {
        Self {
            implementation: TypeDescriptor::of::<L>(),
            kind: BatchKind::List,
            key: TypeDescriptor::of::<L::Key>(),
            value: TypeDescriptor::of::<L::Value>(),
        }
    }

    pub fn of_mapped_batch_loader<L: MappedBatchLoader>() -> Self {
        Self {
            implementation: TypeDescriptor::of::<L>(),
            kind: BatchKind::Mapped,
            key: TypeDescriptor::of::<L::Key>(),
            value: TypeDescriptor::of::<L::Value>(),
        }
    }

    pub fn implementation(&self) -> TypeDescriptor {
        self.implementation
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn key(&self) -> TypeDescriptor {
        self.key
    }

    pub fn value(&self) -> TypeDescriptor {
        self.value
    }

    /// Returns `true` if the binding's key and value types are `K` and `V`.
    pub fn matches<K: 'static, V: 'static>(&self) -> bool {
        self.key.is::<K>() && self.value.is::<V>()
    }

    /// Check a handle request against this binding.
    pub fn expect<K: 'static, V: 'static>(&self, name: &LoaderName) -> Result<(), BindError> {
        if self.matches::<K, V>() {
            return Ok(());
        }
        Err(BindError::TypeMismatch {
            name: name.to_string(),
            expected: signature(std::any::type_name::<K>(), std::any::type_name::<V>()),
            actual: self.signature(),
        })
    }

    /// `Loader<K, V>` rendered with the resolved type names.
    pub fn signature(&self) -> String {
        signature(self.key.name, self.value.name)
    }
}

pub(crate) fn signature(key: &str, value: &str) -> String {
    format!("Loader<{key}, {value}>")
}

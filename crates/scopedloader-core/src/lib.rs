//! scopedloader-core: the batching engine behind every scoped loader.
//!
//! # Overview
//!
//! The core crate defines:
//!
//! - [`BatchLoader`] / [`MappedBatchLoader`]: user batch functions, with the
//!   key and value types carried as associated types
//! - [`DataLoader`]: per-unit-of-work loader with its own queue and cache
//! - [`Loader`]: the operation set shared by loaders and scope handles
//! - [`PendingValue`]: future-like result completed by a dispatch
//! - [`LoaderError`] / [`LoadError`] / [`ScopeError`]: structured errors
//! - [`LoaderOptions`]: caching and batch sizing
//! - [`Statistics`]: per-loader counters

pub mod batch;
pub mod error;
pub mod loader;
pub mod options;
pub mod pending;
pub mod stats;

pub use batch::{BatchLoader, LoaderKey, LoaderValue, MappedBatchLoader};
pub use error::{BatchError, LoadError, LoaderError, ScopeError};
pub use loader::{AnyLoader, CacheKeyFn, DataLoader, DispatchReport, Loader};
pub use options::LoaderOptions;
pub use pending::PendingValue;
pub use stats::Statistics;

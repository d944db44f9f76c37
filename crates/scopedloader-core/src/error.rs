//! Loader-level error types.

use thiserror::Error;

/// Why a single pending value failed.
///
/// Cloned into every pending value of a failed batch, so it only carries
/// owned strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The batch function returned an error for the whole batch.
    #[error("batch function for loader '{loader}' failed: {reason}")]
    Batch { loader: String, reason: String },

    /// A list-style batch function returned the wrong number of values.
    #[error("batch function for loader '{loader}' returned {actual} values for {expected} keys")]
    LengthMismatch {
        loader: String,
        expected: usize,
        actual: usize,
    },

    /// A mapping-style batch function omitted a requested key.
    #[error("batch function for loader '{loader}' returned no value for key {key}")]
    MissingKey { loader: String, key: String },

    /// The cache entry was primed with an error.
    #[error("primed error: {reason}")]
    Primed { reason: String },

    /// The dispatch carrying this key was dropped or panicked before the
    /// batch completed, or the loader was dropped with the key still queued.
    #[error("dispatch for loader '{loader}' ended before the key was resolved")]
    Cancelled { loader: String },
}

impl LoadError {
    /// Returns `true` if the whole batch failed (rather than one key).
    pub fn is_batch_failure(&self) -> bool {
        matches!(self, Self::Batch { .. } | Self::LengthMismatch { .. })
    }
}

/// Error returned by a user batch function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BatchError(pub String);

impl BatchError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<String> for BatchError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BatchError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Scope-usage errors. These signal a lifecycle defect in the caller,
/// never a data problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// A scope-bound loader was used with no scope active.
    #[error("attempted scope-bound access to loader '{loader}' with no scope active")]
    Inactive { loader: String },

    /// The scope slot for this loader holds an instance of another type.
    #[error("scope slot for loader '{loader}' holds an instance of an unexpected type")]
    InstanceTypeMismatch { loader: String },
}

/// Errors surfaced through the [`Loader`](crate::loader::Loader) trait.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoaderError {
    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl LoaderError {
    /// Returns `true` if this is a scope-usage (programming) error.
    pub fn is_scope_error(&self) -> bool {
        matches!(self, Self::Scope(_))
    }
}

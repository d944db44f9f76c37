//! Configuration-time error types.

use thiserror::Error;

/// Errors raised while binding loaders or injecting handles.
///
/// Every variant is a configuration defect: callers should abort startup
/// rather than retry.
#[derive(Debug, Error)]
pub enum BindError {
    /// The same loader name was bound twice.
    #[error("loader '{name}' is already bound")]
    DuplicateName { name: String },

    /// No loader is bound under this name.
    #[error("no loader bound under '{name}'")]
    UnknownLoader { name: String },

    /// A handle was requested with types that differ from the binding.
    #[error("loader '{name}' is bound as {actual}, requested as {expected}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// Binder configuration could not be parsed.
    #[error("invalid binder configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl BindError {
    /// Returns `true` if the error names a specific loader binding.
    pub fn is_binding_error(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

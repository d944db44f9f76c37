//! Binder configuration.

use std::collections::HashMap;

use scopedloader_core::LoaderOptions;
use serde::{Deserialize, Serialize};

use crate::error::BindError;

/// Default loader options plus per-name overrides.
///
/// ```json
/// {
///   "defaults": { "max_batch_size": 100 },
///   "loaders": { "random": { "caching_enabled": false } }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinderConfig {
    #[serde(default)]
    pub defaults: LoaderOptions,
    /// Replaces `defaults` entirely for the named loader.
    #[serde(default)]
    pub loaders: HashMap<String, LoaderOptions>,
}

impl BinderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defaults(mut self, options: LoaderOptions) -> Self {
        self.defaults = options;
        self
    }

    pub fn loader(mut self, name: impl Into<String>, options: LoaderOptions) -> Self {
        self.loaders.insert(name.into(), options);
        self
    }

    /// Options a loader bound under `name` starts from.
    pub fn options_for(&self, name: &str) -> LoaderOptions {
        self.loaders
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    pub fn from_json(json: &str) -> Result<Self, BindError> {
        Ok(serde_json::from_str(json)?)
    }
}

//! Per-loader options.

use serde::{Deserialize, Serialize};

/// Options controlling one loader's cache and batch sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderOptions {
    /// Keep completed values cached for the rest of the unit of work.
    /// When `false`, keys are still de-duplicated within one dispatch.
    #[serde(default = "default_caching")]
    pub caching_enabled: bool,
    /// Max keys per batch function call. `None` = one call per dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<usize>,
}

fn default_caching() -> bool {
    true
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            caching_enabled: true,
            max_batch_size: None,
        }
    }
}

impl LoaderOptions {
    pub fn caching(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    /// Cap the number of keys per batch call. Zero is treated as unbounded.
    pub fn max_batch_size(mut self, n: usize) -> Self {
        self.max_batch_size = (n > 0).then_some(n);
        self
    }

    /// Parse options from a JSON object; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = LoaderOptions::default();
        assert!(opts.caching_enabled);
        assert_eq!(opts.max_batch_size, None);
    }

    #[test]
    fn builder_custom() {
        let opts = LoaderOptions::default().caching(false).max_batch_size(50);
        assert!(!opts.caching_enabled);
        assert_eq!(opts.max_batch_size, Some(50));
        assert_eq!(LoaderOptions::default().max_batch_size(0).max_batch_size, None);
    }

    #[test]
    fn from_partial_json() {
        let opts = LoaderOptions::from_json(r#"{ "max_batch_size": 10 }"#).unwrap();
        assert!(opts.caching_enabled);
        assert_eq!(opts.max_batch_size, Some(10));
    }
}

//! Store configuration.

use serde::Deserialize;

use crate::errors::{StoreError, StoreResult};

/// Reserved namespace holding the dataset registry.
pub const DEFAULT_REGISTRY_DATASET: &str = "datasets";

/// Hard ceiling applied to caller-requested traversal depth. Depth exhaustion
/// is the only bound on recursive expansion, so the cap keeps a careless
/// caller from walking the whole graph.
pub const DEFAULT_MAX_DEPTH: i64 = 8;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub registry_dataset: String,
    pub max_depth: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            registry_dataset: DEFAULT_REGISTRY_DATASET.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(raw: &str) -> StoreResult<Self> {
        toml::from_str(raw).map_err(|err| StoreError::Validation {
            message: format!("invalid store config: {err}"),
        })
    }

    pub fn clamp_depth(&self, requested: i64) -> i64 {
        requested.min(self.max_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config = StoreConfig::from_toml_str("max_depth = 3").unwrap();
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.registry_dataset, DEFAULT_REGISTRY_DATASET);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(StoreConfig::from_toml_str("max_depth = [").is_err());
    }

    #[test]
    fn clamps_requested_depth() {
        let config = StoreConfig::default();
        assert_eq!(config.clamp_depth(99), DEFAULT_MAX_DEPTH);
        assert_eq!(config.clamp_depth(2), 2);
    }
}

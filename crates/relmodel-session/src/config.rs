//! Mapper configuration.

use serde::{Deserialize, Serialize};

/// What a two-pass fetch does when a target id from the first pass is gone
/// by the time of the bulk re-fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTargetPolicy {
    /// Fail with [`Error::Integrity`](relmodel_core::Error::Integrity).
    #[default]
    Error,
    /// Log a warning and drop the dangling id.
    Skip,
}

/// Configuration shared by every mapper of an [`Orm`](crate::Orm).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Memoize relationship fetches until the next flush.
    pub fetch_cache: bool,
    /// Behaviour when a two-pass target disappears between passes.
    pub missing_target: MissingTargetPolicy,
    /// Attach a preload batch to entities loaded together, so their
    /// relationships resolve for the whole batch at once.
    pub preload_collections: bool,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            fetch_cache: true,
            missing_target: MissingTargetPolicy::Error,
            preload_collections: true,
        }
    }
}

impl MapperConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the fetch cache.
    #[must_use]
    pub fn fetch_cache(mut self, value: bool) -> Self {
        self.fetch_cache = value;
        self
    }

    /// Set the missing-target policy.
    #[must_use]
    pub fn missing_target(mut self, policy: MissingTargetPolicy) -> Self {
        self.missing_target = policy;
        self
    }

    /// Enable or disable preload batches.
    #[must_use]
    pub fn preload_collections(mut self, value: bool) -> Self {
        self.preload_collections = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MapperConfig::default();
        assert!(config.fetch_cache);
        assert!(config.preload_collections);
        assert_eq!(config.missing_target, MissingTargetPolicy::Error);
    }

    #[test]
    fn test_builder_setters() {
        let config = MapperConfig::new()
            .fetch_cache(false)
            .missing_target(MissingTargetPolicy::Skip)
            .preload_collections(false);
        assert!(!config.fetch_cache);
        assert!(!config.preload_collections);
        assert_eq!(config.missing_target, MissingTargetPolicy::Skip);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MapperConfig = serde_json::from_str(r#"{"missing_target":"skip"}"#).unwrap();
        assert!(config.fetch_cache);
        assert_eq!(config.missing_target, MissingTargetPolicy::Skip);
    }
}

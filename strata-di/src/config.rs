//! Locator configuration

use serde::{Deserialize, Serialize};

#[cfg(feature = "config")]
use crate::error::{DiError, DiResult};

/// What a commit does with a class binding identical to one already present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail the commit with an ambiguous-binding error
    #[default]
    Reject,
    /// Drop the new binding silently
    Ignore,
    /// Keep both bindings
    Allow,
}

/// Locator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Locator name, used in logs and errors
    pub name: String,
    /// Bind registered class models on demand when nothing else matches
    pub greedy_resolution: bool,
    pub duplicate_policy: DuplicatePolicy,
    /// Reject descriptors whose scope has no registered context
    pub validate_scopes: bool,
    /// Destroy cached instances of descriptors removed by a commit
    pub dispose_on_unbind: bool,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            greedy_resolution: false,
            duplicate_policy: DuplicatePolicy::Reject,
            validate_scopes: true,
            dispose_on_unbind: true,
        }
    }
}

impl LocatorConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load configuration from TOML string
    #[cfg(feature = "config")]
    pub fn from_toml(toml_str: &str) -> DiResult<Self> {
        toml::from_str(toml_str)
            .map_err(|e| DiError::InvalidArgument(format!("Failed to parse TOML: {}", e)))
    }

    /// Load configuration from JSON string
    #[cfg(feature = "config")]
    pub fn from_json(json_str: &str) -> DiResult<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| DiError::InvalidArgument(format!("Failed to parse JSON: {}", e)))
    }
}

// Example configuration file format:
// ```toml
// name = "app"
// greedy_resolution = true
// duplicate_policy = "ignore"
// dispose_on_unbind = false
// ```

#[cfg(all(test, feature = "config"))]
mod tests {
    use super::*;

    #[test]
    fn test_toml_partial() {
        let config = LocatorConfig::from_toml(
            r#"
            name = "app"
            duplicate_policy = "allow"
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "app");
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Allow);
        assert!(config.validate_scopes);
        assert!(!config.greedy_resolution);
    }

    #[test]
    fn test_json() {
        let config = LocatorConfig::from_json(r#"{"greedy_resolution": true}"#).unwrap();
        assert!(config.greedy_resolution);
        assert_eq!(config.name, "default");
    }

    #[test]
    fn test_bad_policy() {
        let err = LocatorConfig::from_toml("duplicate_policy = \"sometimes\"").unwrap_err();
        assert!(err.to_string().contains("TOML"));
    }
}

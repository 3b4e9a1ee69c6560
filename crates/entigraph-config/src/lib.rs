//! Entigraph Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.entigraph/config.toml`
//! - Local config: `.entigraph/config.toml` (in workspace)
//! - CLI overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → CLI overrides.

mod error;
mod loader;

pub use error::{ConfigError, ConfigIo};
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Log levels accepted by `logging.level`.
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Root configuration for the engine.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Emit diagnostic traversal output (one event per visited node)
    pub debug: bool,

    /// Identity cache configuration
    pub cache: CacheConfig,

    /// Save-order resolution configuration
    pub save: SaveConfig,

    /// Lazy loader configuration
    pub loader: LoaderConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Identity cache configuration.
///
/// # Example TOML
///
/// ```toml
/// [cache]
/// capacity = 10000
/// sticky_types = ["Site", "User"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of non-sticky entries (None = unbounded)
    pub capacity: Option<usize>,

    /// Entity types whose entries survive a cache clear
    pub sticky_types: Vec<String>,
}

/// Save-order resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SaveConfig {
    /// How bidirectional collection properties are classified as saved
    pub collection_policy: CollectionSavePolicy,

    /// Validate mandatory attributes before a node enters a save template
    pub validate: bool,

    /// Apply declared defaults to the root (and its cascaded dependents) before saving
    pub apply_defaults: bool,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            collection_policy: CollectionSavePolicy::default(),
            validate: true,
            apply_defaults: true,
        }
    }
}

/// Policy deciding whether a collection property with an inverse is saved
/// from its own side.
///
/// Non-domain, cascaded, scalar and inverse-less properties are unaffected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CollectionSavePolicy {
    /// The inverse side persists the association; the collection is unsaved
    #[default]
    InverseOwned,
    /// A dependent collection is saved from its own side even with an inverse
    DependentSelfSaved,
    /// Every collection is saved from its own side
    AlwaysSaved,
}

impl std::fmt::Display for CollectionSavePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InverseOwned => write!(f, "inverse-owned"),
            Self::DependentSelfSaved => write!(f, "dependent-self-saved"),
            Self::AlwaysSaved => write!(f, "always-saved"),
        }
    }
}

impl std::str::FromStr for CollectionSavePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inverse-owned" | "inverse_owned" => Ok(Self::InverseOwned),
            "dependent-self-saved" | "dependent_self_saved" => Ok(Self::DependentSelfSaved),
            "always-saved" | "always_saved" => Ok(Self::AlwaysSaved),
            _ => Err(ConfigError::invalid_value(
                "save.collection_policy",
                format!(
                    "unknown policy '{}'. Valid values: inverse-owned, dependent-self-saved, always-saved",
                    s
                ),
            )),
        }
    }
}

/// Lazy loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoaderConfig {
    /// Attach the lazy loader to fetched entities
    pub enabled: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON structured logging
    Json,
}

/// CLI overrides for configuration values.
///
/// Used to apply command-line arguments over file-based config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Force diagnostic traversal output on
    pub debug: Option<bool>,

    /// Override log level
    pub log_level: Option<String>,

    /// Override cache capacity
    pub cache_capacity: Option<usize>,

    /// Override the collection save policy
    pub collection_policy: Option<CollectionSavePolicy>,
}

impl EngineConfig {
    /// Apply CLI overrides to this configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(debug) = overrides.debug {
            self.debug = debug;
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }

        if let Some(capacity) = overrides.cache_capacity {
            self.cache.capacity = Some(capacity);
        }

        if let Some(policy) = overrides.collection_policy {
            self.save.collection_policy = policy;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity == Some(0) {
            return Err(ConfigError::invalid_value(
                "cache.capacity",
                "must be greater than zero",
            ));
        }

        let mut seen = HashSet::new();
        for ty in &self.cache.sticky_types {
            if !seen.insert(ty.as_str()) {
                return Err(ConfigError::invalid_value(
                    "cache.sticky_types",
                    format!("duplicate type '{}'", ty),
                ));
            }
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::invalid_value(
                "logging.level",
                format!(
                    "unknown level '{}'. Valid values: {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Directory holding the local config for a workspace.
    pub fn local_dir(workspace_root: &std::path::Path) -> PathBuf {
        workspace_root.join(".entigraph")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(!config.debug);
        assert_eq!(config.cache.capacity, None);
        assert!(config.cache.sticky_types.is_empty());
        assert_eq!(
            config.save.collection_policy,
            CollectionSavePolicy::InverseOwned
        );
        assert!(config.save.validate);
        assert!(config.save.apply_defaults);
        assert!(config.loader.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = EngineConfig::default();
        let overrides = ConfigOverrides {
            debug: Some(true),
            log_level: Some("debug".to_string()),
            cache_capacity: Some(64),
            collection_policy: Some(CollectionSavePolicy::AlwaysSaved),
        };

        config.apply_overrides(&overrides);

        assert!(config.debug);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.cache.capacity, Some(64));
        assert_eq!(
            config.save.collection_policy,
            CollectionSavePolicy::AlwaysSaved
        );
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = EngineConfig::default();
        config.cache.capacity = Some(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cache.capacity"));
    }

    #[test]
    fn test_validate_rejects_duplicate_sticky_types() {
        let mut config = EngineConfig::default();
        config.cache.sticky_types = vec!["Site".to_string(), "Site".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate type 'Site'"));
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut config = EngineConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collection_policy_from_str() {
        assert_eq!(
            "inverse-owned".parse::<CollectionSavePolicy>().unwrap(),
            CollectionSavePolicy::InverseOwned
        );
        assert_eq!(
            "Dependent_Self_Saved".parse::<CollectionSavePolicy>().unwrap(),
            CollectionSavePolicy::DependentSelfSaved
        );
        assert!("sometimes".parse::<CollectionSavePolicy>().is_err());
        assert_eq!(CollectionSavePolicy::AlwaysSaved.to_string(), "always-saved");
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = EngineConfig::default();
        config.debug = true;
        config.cache.sticky_types = vec!["Site".to_string()];
        config.save.collection_policy = CollectionSavePolicy::DependentSelfSaved;

        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("collection_policy = \"dependent-self-saved\""));

        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}

//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.entigraph/config.toml`
//! 2. Local config: `.entigraph/config.toml` (in workspace)
//! 3. CLI overrides
//!
//! Later sources override earlier ones. A key missing from a file leaves
//! the value from the earlier sources in place.

use crate::error::{ConfigError, ConfigIo};
use crate::{CollectionSavePolicy, ConfigOverrides, EngineConfig, LogFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Global configuration directory name.
const GLOBAL_CONFIG_DIR: &str = ".entigraph";

/// Configuration loader with inheritance support.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.entigraph`)
    global_config_dir: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    ///
    /// Automatically detects the global config directory (`~/.entigraph`).
    pub fn new() -> Self {
        Self {
            global_config_dir: dirs::home_dir().map(|h| h.join(GLOBAL_CONFIG_DIR)),
        }
    }

    /// Create a loader with a custom global config directory.
    ///
    /// Useful for testing.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
        }
    }

    /// Get the global config file path.
    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Get the local config file path for a workspace.
    pub fn local_config_path(&self, workspace_root: &Path) -> PathBuf {
        EngineConfig::local_dir(workspace_root).join(CONFIG_FILE_NAME)
    }

    /// Load configuration for a workspace with optional CLI overrides.
    ///
    /// Merges config in order: global → local → overrides, then validates
    /// the result.
    pub fn load(
        &self,
        workspace_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<EngineConfig, ConfigError> {
        let mut config = EngineConfig::default();

        if let Some(global) = self.global_layer()? {
            global.apply_to(&mut config);
        }

        if let Some(local) = self.local_layer(workspace_root)? {
            local.apply_to(&mut config);
        }

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Write `config` as the global config file, replacing any existing one.
    pub fn init_global(&self, config: &EngineConfig) -> Result<PathBuf, ConfigError> {
        let config_path = self.global_config_path().ok_or(ConfigError::NoHomeDir)?;
        save_config_file(&config_path, config)?;
        Ok(config_path)
    }

    /// Write `config` as the local config file of a workspace, replacing any
    /// existing one.
    pub fn init_local(
        &self,
        workspace_root: &Path,
        config: &EngineConfig,
    ) -> Result<PathBuf, ConfigError> {
        let config_path = self.local_config_path(workspace_root);
        save_config_file(&config_path, config)?;
        Ok(config_path)
    }

    fn global_layer(&self) -> Result<Option<ConfigLayer>, ConfigError> {
        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory found, skipping global config");
            return Ok(None);
        };
        load_layer(&global_path)
    }

    fn local_layer(&self, workspace_root: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
        load_layer(&self.local_config_path(workspace_root))
    }
}

/// Load one config file, or `None` if it does not exist.
fn load_layer(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        trace!("Config not found at {:?}", path);
        return Ok(None);
    }

    debug!("Loading config from {:?}", path);
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::io(ConfigIo::Read, path, e))?;
    toml::from_str(&content)
        .map(Some)
        .map_err(|e| ConfigError::parse(path, e))
}

/// Save a configuration file to disk.
fn save_config_file(path: &Path, config: &EngineConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::io(ConfigIo::CreateDir, parent, e))?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::io(ConfigIo::Write, path, e))
}

// ============================================================================
// File layers
// ============================================================================

/// One config file as written. Every key is optional so that an absent key
/// can be told apart from one set to its default value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigLayer {
    debug: Option<bool>,
    cache: CacheLayer,
    save: SaveLayer,
    loader: LoaderLayer,
    logging: LoggingLayer,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CacheLayer {
    capacity: Option<usize>,
    sticky_types: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SaveLayer {
    collection_policy: Option<CollectionSavePolicy>,
    validate: Option<bool>,
    apply_defaults: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoaderLayer {
    enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingLayer {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl ConfigLayer {
    /// Overlay the keys present in this layer onto `config`.
    ///
    /// Sticky types accumulate across layers; every other key replaces the
    /// value below it.
    fn apply_to(self, config: &mut EngineConfig) {
        config.debug = self.debug.unwrap_or(config.debug);

        let cache = &mut config.cache;
        cache.capacity = self.cache.capacity.or(cache.capacity);
        for ty in self.cache.sticky_types {
            if !cache.sticky_types.contains(&ty) {
                cache.sticky_types.push(ty);
            }
        }

        let save = &mut config.save;
        save.collection_policy = self.save.collection_policy.unwrap_or(save.collection_policy);
        save.validate = self.save.validate.unwrap_or(save.validate);
        save.apply_defaults = self.save.apply_defaults.unwrap_or(save.apply_defaults);

        config.loader.enabled = self.loader.enabled.unwrap_or(config.loader.enabled);

        let logging = &mut config.logging;
        if let Some(level) = self.logging.level {
            logging.level = level;
        }
        if let Some(format) = self.logging.format {
            logging.format = format;
        }
    }
}

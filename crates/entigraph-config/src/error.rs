//! Configuration error types.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// File-system step that failed while reading or writing a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigIo {
    Read,
    Write,
    CreateDir,
}

impl fmt::Display for ConfigIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read config file"),
            Self::Write => write!(f, "write config file"),
            Self::CreateDir => write!(f, "create config directory"),
        }
    }
}

/// Errors raised while loading, validating or writing engine configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to {step} '{path}': {source}")]
    Io {
        step: ConfigIo,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `init_global` without a home directory
    #[error("could not determine home directory")]
    NoHomeDir,

    /// A merged value failed `EngineConfig::validate` or could not be parsed
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn io(step: ConfigIo, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            step,
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Config key the error refers to, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::InvalidValue { key, .. } => Some(key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_names_key() {
        let err = ConfigError::invalid_value("cache.capacity", "must be greater than zero");
        assert_eq!(err.key(), Some("cache.capacity"));
        assert_eq!(
            err.to_string(),
            "invalid configuration value for 'cache.capacity': must be greater than zero"
        );
        assert_eq!(ConfigError::NoHomeDir.key(), None);
    }

    #[test]
    fn test_io_error_names_step_and_path() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ConfigError::io(ConfigIo::CreateDir, "/srv/.entigraph", io);
        assert_eq!(
            err.to_string(),
            "failed to create config directory '/srv/.entigraph': denied"
        );
    }
}

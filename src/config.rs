use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Client configuration, loadable from TOML. Every field has a default so
/// a partial (or absent) file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection string for the coordination service, recorded for
    /// diagnostics and passed to whatever constructs the capability.
    pub connection: String,
    /// How long to wait for initial session establishment.
    pub connect_timeout_ms: u64,
    /// Keep waiting past the timeout, logging periodically, instead of
    /// failing the connect.
    pub wait: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: "127.0.0.1:2181".to_string(),
            connect_timeout_ms: 9_000,
            wait: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }

    /// Load `path` if it exists, falling back to defaults on absence or a
    /// broken file.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), %err, "using default configuration");
                Self::default()
            }
        }
    }
}

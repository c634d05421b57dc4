//! Loader configuration
//!
//! Optional TOML configuration for the library loader, merged with the
//! `VIADUCT_LIB_PATH` environment override at loader construction.
//!
//! ```toml
//! search_paths = ["/opt/acme/lib", "./natives"]
//! system_fallback = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML syntax in {file}: {error}")]
    TomlParse {
        file: PathBuf,
        error: toml::de::Error,
    },
}

/// Library loader configuration.
///
/// `search_paths` are consulted before the platform defaults;
/// `system_fallback` controls whether an unresolved name is handed to the
/// platform loader as a last resort.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Extra search paths, highest priority first
    pub search_paths: Vec<PathBuf>,
    /// Hand unresolved names to the platform loader (default: true)
    pub system_fallback: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            system_fallback: true,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|error| ConfigError::TomlParse {
            file: path.to_path_buf(),
            error,
        })
    }
}

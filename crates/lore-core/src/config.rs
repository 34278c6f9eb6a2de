//! Configuration types and loading for lore.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::Result;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the activity database.
    pub database: PathBuf,

    /// Directory holding the full-text index.
    pub index_dir: PathBuf,

    /// Idle interval in milliseconds before the index worker commits
    /// pending writes.
    pub index_flush_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lore");

        Self {
            database: data_dir.join("activity.sqlite"),
            index_dir: data_dir.join("fts.index"),
            index_flush_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration from the default config file, falling back to
    /// defaults when it does not exist. `LORE_DATABASE_PATH` and
    /// `LORE_INDEX_PATH` override the file in either case.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lore")
            .join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Expand a path, replacing ~ and environment variables.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.database = Self::expand_path(&self.database.to_string_lossy());
        self.index_dir = Self::expand_path(&self.index_dir.to_string_lossy());
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("LORE_DATABASE_PATH") {
            self.database = Self::expand_path(&path);
        }
        if let Ok(path) = std::env::var("LORE_INDEX_PATH") {
            self.index_dir = Self::expand_path(&path);
        }
    }
}

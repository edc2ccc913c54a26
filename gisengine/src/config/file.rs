//! Configuration file handling for ~/.gisengine/config.ini.
//!
//! Settings structs live in [`super::settings`], constants in [`super::defaults`],
//! parsing in [`super::parser`], and serialization in [`super::writer`].

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::settings::EngineConfig;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl EngineConfig {
    /// Load configuration from the default path (~/.gisengine/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Parse configuration from INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(text)
            .map_err(|e| ConfigFileError::ReadError(ini::Error::Parse(e)))?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to the default path (~/.gisengine/config.ini).
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        std::fs::write(path, self.to_ini_string()).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Render the configuration as commented INI text.
    pub fn to_ini_string(&self) -> String {
        super::writer::to_config_string(self)
    }

    /// Create the default config file if it doesn't exist.
    ///
    /// Returns the path to the config file.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            Self::default().save_to(&path)?;
        }
        Ok(path)
    }
}

/// Get the path to the config directory (~/.gisengine).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gisengine")
}

/// Get the path to the config file (~/.gisengine/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheSettings, RasterSettings};

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.ini");

        let config = EngineConfig::load_from(&config_path).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.ini");

        let config = EngineConfig::default()
            .with_raster(
                RasterSettings::default()
                    .with_tile_size(128)
                    .with_memory_budget(32 * 1024 * 1024)
                    .with_chunk_directory(temp_dir.path().join("chunks")),
            )
            .with_cache(CacheSettings::default().with_capacity(5));
        config.save_to(&config_path).unwrap();

        let loaded = EngineConfig::load_from(&config_path).unwrap();
        assert_eq!(loaded.raster, config.raster);
        assert_eq!(loaded.cache, config.cache);
        assert_eq!(loaded.geometry, config.geometry);
        assert_eq!(loaded.workers, config.workers);
    }

    #[test]
    fn test_from_ini_str() {
        let config = EngineConfig::from_ini_str("[cache]\nenabled = false\n").unwrap();
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_config_file_path() {
        assert!(config_file_path().ends_with(".gisengine/config.ini"));
    }
}

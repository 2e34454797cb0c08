//! Configuration file handling for ~/.cloudraid/config.ini.

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use super::transfer::TransferConfig;

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "cloudraid.log";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Everything loaded from the configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// `[transfer]` section.
    pub transfer: TransferConfig,
    /// `[logging] file`.
    pub log_file: PathBuf,
    /// `[resume] directory`: where resume tokens are kept.
    pub resume_directory: PathBuf,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            transfer: TransferConfig::default(),
            log_file: config_directory().join("logs").join(DEFAULT_LOG_FILE),
            resume_directory: config_directory().join("resume"),
        }
    }
}

impl ConfigFile {
    /// Load configuration from the default path (~/.cloudraid/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Parse configuration from INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigFileError::InvalidValue {
            section: String::new(),
            key: String::new(),
            value: String::new(),
            reason: e.to_string(),
        })?;
        super::parser::parse_ini(&ini)
    }

    /// Path of the resume token for a file identity.
    pub fn resume_token_path(&self, file_identity: &str) -> PathBuf {
        let safe: String = file_identity
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.resume_directory.join(format!("{}.resume", safe))
    }
}

/// Get the path to the config directory (~/.cloudraid).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cloudraid")
}

/// Get the path to the config file (~/.cloudraid/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp_dir.path().join("missing.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");
        std::fs::write(&path, "[transfer]\nmax_connections = 3\n").unwrap();
        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.transfer.max_connections(), 3);
    }

    #[test]
    fn test_resume_token_path_is_sanitized() {
        let config = ConfigFile {
            resume_directory: PathBuf::from("/tmp/resume"),
            ..ConfigFile::default()
        };
        assert_eq!(
            config.resume_token_path("abc/../x y"),
            PathBuf::from("/tmp/resume/abc____x_y.resume")
        );
    }
}

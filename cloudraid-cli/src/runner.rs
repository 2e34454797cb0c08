//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization and the async
//! runtime to reduce duplication across command handlers.

use tokio::runtime::Runtime;
use tracing::info;

use cloudraid::config::ConfigFile;
use cloudraid::logging::{default_log_dir, default_log_file, init_logging, LoggingGuard};

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Create a new CLI runner with optional debug logging.
    ///
    /// Logs go to stdout as well as the log file unless stdout is a TTY,
    /// where the progress bar owns the terminal.
    pub fn with_debug(debug_mode: bool) -> Result<Self, CliError> {
        Self::with_options(debug_mode, !atty::is(atty::Stream::Stdout))
    }

    /// Create a runner that never logs to stdout, for commands that write
    /// data there.
    pub fn quiet(debug_mode: bool) -> Result<Self, CliError> {
        Self::with_options(debug_mode, false)
    }

    fn with_options(debug_mode: bool, stdout_enabled: bool) -> Result<Self, CliError> {
        // Load config file (or use defaults if not present)
        let config = ConfigFile::load()?;

        let log_path = &config.log_file;
        let log_dir = log_path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(default_log_dir);
        let log_file = log_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| default_log_file().to_string());

        let logging_guard = init_logging(&log_dir, &log_file, stdout_enabled, debug_mode)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("CloudRAID v{}", cloudraid::VERSION);
        info!("CloudRAID CLI: {} command", command);
    }

    /// Multi-threaded runtime for the transfer.
    pub fn runtime(&self) -> Result<Runtime, CliError> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| CliError::Config(format!("Failed to start async runtime: {}", e)))
    }
}

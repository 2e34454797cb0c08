//! Configuration: per-transfer tuning and the on-disk config file.
//!
//! [`TransferConfig`] is what sessions consume. [`ConfigFile`] loads it,
//! together with logging and resume paths, from `~/.cloudraid/config.ini`:
//!
//! ```ini
//! [transfer]
//! max_connections = 6
//! max_request_size = 1MB
//! read_ahead = 32MB
//! max_speed = 4MB
//! strategy = auto
//!
//! [logging]
//! file = ~/.cloudraid/logs/cloudraid.log
//!
//! [resume]
//! directory = ~/.cloudraid/resume
//! ```

mod file;
mod parser;
mod size;
mod transfer;

pub use file::{config_directory, config_file_path, ConfigFile, ConfigFileError, DEFAULT_LOG_FILE};
pub use size::{format_size, parse_size, SizeParseError};
pub use transfer::*;

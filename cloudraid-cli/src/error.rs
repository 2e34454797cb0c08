//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;

use cloudraid::config::ConfigFileError;
use cloudraid::{ErrorKind, RaidError, TransferFailure};

/// Exit code for a transfer stopped by the user.
const EXIT_CANCELLED: i32 = 130;

/// Exit code for a transfer that failed but left a resume token.
const EXIT_RESUMABLE: i32 = 2;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Config file could not be read or parsed
    ConfigFile(ConfigFileError),
    /// Ticket arguments or ticket file are unusable
    Ticket(String),
    /// The transfer ended in error
    Transfer(TransferFailure),
    /// The transfer was cancelled; the token was saved at this path
    Cancelled { resume_path: PathBuf, contiguous: u64 },
    /// Engine error outside a transfer (layout, resume store, encoding)
    Raid(RaidError),
    /// Local file error
    File { path: PathBuf, error: std::io::Error },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        let code = match self {
            CliError::Cancelled { .. } => EXIT_CANCELLED,
            CliError::Transfer(failure) => {
                if failure.kind() == ErrorKind::ReconstructionImpossible {
                    eprintln!();
                    eprintln!("More than one source is unavailable. Common causes:");
                    eprintln!("  1. Part URLs have expired: request a fresh ticket");
                    eprintln!("  2. The file is being re-uploaded or was deleted");
                    if !failure.source_errors.is_empty() {
                        eprintln!();
                        eprintln!("Excluded sources:");
                        for error in &failure.source_errors {
                            eprintln!("  {}", error);
                        }
                    }
                }
                if failure.resume_token.is_some() {
                    eprintln!();
                    eprintln!("Run the same command again to resume.");
                    EXIT_RESUMABLE
                } else {
                    1
                }
            }
            _ => 1,
        };

        process::exit(code)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Ticket(msg) => write!(f, "Invalid ticket: {}", msg),
            CliError::Transfer(failure) => write!(f, "{}", failure),
            CliError::Cancelled {
                resume_path,
                contiguous,
            } => write!(
                f,
                "Cancelled after {} bytes; resume token saved to {}",
                contiguous,
                resume_path.display()
            ),
            CliError::Raid(e) => write!(f, "{}", e),
            CliError::File { path, error } => {
                write!(f, "Failed to access '{}': {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Transfer(e) => Some(e),
            CliError::Raid(e) => Some(e),
            CliError::File { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<RaidError> for CliError {
    fn from(e: RaidError) -> Self {
        CliError::Raid(e)
    }
}

impl From<TransferFailure> for CliError {
    fn from(e: TransferFailure) -> Self {
        CliError::Transfer(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_message_names_token_path() {
        let err = CliError::Cancelled {
            resume_path: PathBuf::from("/tmp/file.resume"),
            contiguous: 4096,
        };
        assert_eq!(
            err.to_string(),
            "Cancelled after 4096 bytes; resume token saved to /tmp/file.resume"
        );
    }

    #[test]
    fn test_transfer_failure_keeps_source() {
        let err = CliError::from(TransferFailure {
            error: RaidError::Cancelled,
            contiguous_bytes: 0,
            resume_token: None,
            source_errors: Vec::new(),
        });
        assert!(std::error::Error::source(&err).is_some());
    }
}

//! Error taxonomy for striped transfers.
//!
//! Per-source transient failures (timeouts, throttling) are absorbed by the
//! health manager and retried. Only the variants that terminate a session
//! reach the caller, wrapped in [`crate::session::TransferFailure`].

use std::io;
use thiserror::Error;

/// Errors produced by the striped transfer engine.
#[derive(Debug, Error)]
pub enum RaidError {
    /// A range request against a source exceeded its deadline.
    #[error("source {index} timed out")]
    SourceTimeout { index: usize },

    /// A source answered with a non-success HTTP status.
    #[error("source {index} returned HTTP {status} ({})", retry_label(.retryable))]
    SourceHttp {
        index: usize,
        status: u16,
        retryable: bool,
    },

    /// The connection to a source broke or returned a short body.
    #[error("source {index} transport error: {reason}")]
    SourceTransport { index: usize, reason: String },

    /// Two or more sources are unavailable for the same line.
    #[error("line {line} cannot be reconstructed: {missing} sources unavailable")]
    ReconstructionImpossible { line: u64, missing: usize },

    /// An offset or range lies outside the file or the part.
    #[error("offset {offset} is out of range (limit {limit})")]
    OutOfRange { offset: u64, limit: u64 },

    /// The session was cancelled. Delivered bytes remain valid.
    #[error("transfer cancelled")]
    Cancelled,

    /// Streaming delivery fell below the minimum rate for a whole window.
    #[error("stream stalled at byte {contiguous}: below minimum rate for {window_secs}s")]
    StreamStalled { contiguous: u64, window_secs: u64 },

    /// The output sink failed. Not retried by this layer.
    #[error("local I/O error: {0}")]
    LocalIo(#[from] io::Error),

    /// Layout parameters or buffers are inconsistent.
    #[error("invalid stripe layout: {0}")]
    InvalidLayout(String),

    /// A resume token does not describe this transfer.
    #[error("resume token mismatch: {0}")]
    ResumeMismatch(String),

    /// Resume state could not be persisted or loaded.
    #[error("resume store error: {0}")]
    ResumeStore(String),
}

fn retry_label(retryable: &bool) -> &'static str {
    if *retryable {
        "retryable"
    } else {
        "terminal"
    }
}

/// Result alias used throughout the crate.
pub type RaidResult<T> = Result<T, RaidError>;

/// Copyable classification of a [`RaidError`], suitable for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SourceTimeout,
    SourceHttp,
    SourceTransport,
    ReconstructionImpossible,
    OutOfRange,
    Cancelled,
    StreamStalled,
    LocalIo,
    InvalidLayout,
    ResumeMismatch,
    ResumeStore,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::SourceTimeout => "source timeout",
            ErrorKind::SourceHttp => "source http error",
            ErrorKind::SourceTransport => "source transport error",
            ErrorKind::ReconstructionImpossible => "reconstruction impossible",
            ErrorKind::OutOfRange => "out of range",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::StreamStalled => "stream stalled",
            ErrorKind::LocalIo => "local i/o error",
            ErrorKind::InvalidLayout => "invalid layout",
            ErrorKind::ResumeMismatch => "resume mismatch",
            ErrorKind::ResumeStore => "resume store error",
        };
        f.write_str(name)
    }
}

impl RaidError {
    /// Returns the error's kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RaidError::SourceTimeout { .. } => ErrorKind::SourceTimeout,
            RaidError::SourceHttp { .. } => ErrorKind::SourceHttp,
            RaidError::SourceTransport { .. } => ErrorKind::SourceTransport,
            RaidError::ReconstructionImpossible { .. } => ErrorKind::ReconstructionImpossible,
            RaidError::OutOfRange { .. } => ErrorKind::OutOfRange,
            RaidError::Cancelled => ErrorKind::Cancelled,
            RaidError::StreamStalled { .. } => ErrorKind::StreamStalled,
            RaidError::LocalIo(_) => ErrorKind::LocalIo,
            RaidError::InvalidLayout(_) => ErrorKind::InvalidLayout,
            RaidError::ResumeMismatch(_) => ErrorKind::ResumeMismatch,
            RaidError::ResumeStore(_) => ErrorKind::ResumeStore,
        }
    }

    /// Whether this error terminates a session.
    ///
    /// Source-level errors are recovered locally; cancellation is a clean stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RaidError::SourceTimeout { .. }
                | RaidError::SourceHttp {
                    retryable: true,
                    ..
                }
                | RaidError::SourceTransport { .. }
                | RaidError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(RaidError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            RaidError::ReconstructionImpossible {
                line: 3,
                missing: 2
            }
            .kind(),
            ErrorKind::ReconstructionImpossible
        );
        let io = RaidError::from(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(io.kind(), ErrorKind::LocalIo);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!RaidError::Cancelled.is_fatal());
        assert!(!RaidError::SourceTimeout { index: 1 }.is_fatal());
        assert!(!RaidError::SourceTransport {
            index: 3,
            reason: "connection reset".to_string()
        }
        .is_fatal());
        assert!(!RaidError::SourceHttp {
            index: 2,
            status: 503,
            retryable: true
        }
        .is_fatal());
        assert!(RaidError::SourceHttp {
            index: 2,
            status: 404,
            retryable: false
        }
        .is_fatal());
        assert!(RaidError::OutOfRange {
            offset: 10,
            limit: 5
        }
        .is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = RaidError::SourceHttp {
            index: 4,
            status: 429,
            retryable: true,
        };
        assert_eq!(err.to_string(), "source 4 returned HTTP 429 (retryable)");

        let err = RaidError::StreamStalled {
            contiguous: 4096,
            window_secs: 30,
        };
        assert!(err.to_string().contains("4096"));
    }
}

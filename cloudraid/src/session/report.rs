//! Session outcomes.

use std::time::Duration;

use thiserror::Error;

use crate::error::{ErrorKind, RaidError};
use crate::progress::ResumeToken;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Completed,
    /// Stopped by its cancellation token; delivered bytes stay valid.
    Cancelled,
    Failed(ErrorKind),
}

/// Summary of a session that ended without error.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub state: TransferState,
    /// Absolute file offset delivered up to.
    pub contiguous_bytes: u64,
    /// Unique bytes accepted per source.
    pub per_source_bytes: Vec<u64>,
    pub failed_sources: Vec<usize>,
    pub elapsed: Duration,
    /// Set when the transfer can be resumed (cancelled runs).
    pub resume_token: Option<ResumeToken>,
}

impl TransferReport {
    pub fn is_complete(&self) -> bool {
        self.state == TransferState::Completed
    }

    /// Bytes fetched from all sources, redundancy included.
    pub fn total_received(&self) -> u64 {
        self.per_source_bytes.iter().sum()
    }
}

/// A session that ended in error, with what is needed to resume it.
#[derive(Debug, Error)]
#[error("transfer failed at byte {contiguous_bytes}: {error}")]
pub struct TransferFailure {
    #[source]
    pub error: RaidError,
    pub contiguous_bytes: u64,
    pub resume_token: Option<ResumeToken>,
    /// Why each failed source was excluded, in source order.
    pub source_errors: Vec<RaidError>,
}

impl TransferFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn state(&self) -> TransferState {
        TransferState::Failed(self.error.kind())
    }
}

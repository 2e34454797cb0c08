//! Range-request transport.
//!
//! The session only ever asks for `bytes start..end` of a part URL. The
//! [`NetworkTransport`] trait keeps that seam narrow so the engine can run
//! over HTTP ([`HttpTransport`]) or over in-memory parts with scripted
//! faults ([`ScriptedTransport`]).

mod http;
mod scripted;

pub use http::HttpTransport;
pub use scripted::{Fault, RequestRecord, ScriptedTransport};

use std::future::Future;
use std::ops::Range;

use bytes::Bytes;
use thiserror::Error;

use crate::error::RaidError;
use crate::health::{classify_status, FetchOutcome, StatusClass};

/// A failed range request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("short body: expected {expected} bytes, got {actual}")]
    ShortBody { expected: u64, actual: u64 },
}

impl TransportError {
    /// How the health manager should see this failure.
    pub fn into_outcome(self) -> FetchOutcome {
        match self {
            TransportError::Status(status) => FetchOutcome::HttpError(status),
            TransportError::Timeout => FetchOutcome::Timeout,
            TransportError::Connection(reason) => FetchOutcome::Transport(reason),
            TransportError::ShortBody { expected, actual } => FetchOutcome::Transport(format!(
                "short body: expected {} bytes, got {}",
                expected, actual
            )),
        }
    }

    /// The per-source error this failure amounts to for `index`.
    pub fn into_source_error(self, index: usize) -> RaidError {
        match self {
            TransportError::Status(status) => RaidError::SourceHttp {
                index,
                status,
                retryable: classify_status(status) == StatusClass::Retryable,
            },
            TransportError::Timeout => RaidError::SourceTimeout { index },
            other => RaidError::SourceTransport {
                index,
                reason: other.to_string(),
            },
        }
    }
}

/// Fetches byte ranges of part URLs.
///
/// Implementations return exactly `range.end - range.start` bytes or an
/// error; they do not retry.
pub trait NetworkTransport: Send + Sync + 'static {
    fn fetch_range(
        &self,
        url: &str,
        range: Range<u64>,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send;
}

//! Per-replica state owned by a transfer session.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Health classification of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceHealth {
    /// Answering within the expected latency window.
    Healthy,
    /// Slow, throttled, or retrying; still scheduled.
    Degraded,
    /// Permanently excluded for the rest of the session.
    Failed,
}

impl SourceHealth {
    pub fn is_failed(&self) -> bool {
        matches!(self, SourceHealth::Failed)
    }
}

impl fmt::Display for SourceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceHealth::Healthy => write!(f, "healthy"),
            SourceHealth::Degraded => write!(f, "degraded"),
            SourceHealth::Failed => write!(f, "failed"),
        }
    }
}

/// One replica of a striped file.
#[derive(Debug, Clone)]
pub struct Source {
    /// Position in the stripe (0 is parity).
    pub index: usize,
    /// Range-request URL. Opaque and expirable.
    pub url: String,
    pub health: SourceHealth,
    /// Bytes handed to the transport, including retries.
    pub bytes_requested: u64,
    /// Unique bytes accepted from this source.
    pub bytes_received: u64,
    pub consecutive_failures: u32,
    /// Last byte receipt, or the last dispatch after an idle period.
    pub last_activity: Instant,
    /// Last byte receipt.
    pub last_progress: Option<Instant>,
    /// Requests currently outstanding.
    pub in_flight: usize,
    /// No new requests before this instant.
    pub retry_at: Option<Instant>,
    started_at: Instant,
}

impl Source {
    pub fn new(index: usize, url: impl Into<String>, now: Instant) -> Self {
        Self {
            index,
            url: url.into(),
            health: SourceHealth::Healthy,
            bytes_requested: 0,
            bytes_received: 0,
            consecutive_failures: 0,
            last_activity: now,
            last_progress: None,
            in_flight: 0,
            retry_at: None,
            started_at: now,
        }
    }

    /// Whether the source may still be scheduled at all.
    pub fn is_active(&self) -> bool {
        !self.health.is_failed()
    }

    pub fn is_backing_off(&self, now: Instant) -> bool {
        self.retry_at.is_some_and(|at| now < at)
    }

    /// Received bytes within `window` of `now`.
    pub fn is_progressing(&self, now: Instant, window: Duration) -> bool {
        self.is_active()
            && self
                .last_progress
                .is_some_and(|at| now.saturating_duration_since(at) <= window)
    }

    /// Books a dispatched request of `bytes`.
    pub fn record_request(&mut self, bytes: u64, now: Instant) {
        if self.in_flight == 0 && self.consecutive_failures == 0 {
            self.last_activity = now;
        }
        self.in_flight += 1;
        self.bytes_requested += bytes;
    }

    /// Books the completion (successful or not) of one request.
    pub fn record_completion(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Books `bytes` of newly accepted data.
    pub fn record_received(&mut self, bytes: u64, now: Instant) {
        self.bytes_received += bytes;
        self.last_activity = now;
        self.last_progress = Some(now);
    }

    /// Average accepted bytes per second since the session started.
    pub fn throughput(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0.0;
        }
        self.bytes_received as f64 / elapsed
    }

    /// Bytes requested but not yet accepted.
    pub fn lag(&self) -> u64 {
        self.bytes_requested.saturating_sub(self.bytes_received)
    }
}

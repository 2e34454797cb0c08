//! Retry and classification policy for source failures.
//!
//! - [`RetryPolicy`]: how long a degraded source waits before it is asked again
//! - [`classify_status`]: which HTTP statuses are worth retrying

use std::time::Duration;

// =============================================================================
// Retry Policy Constants
// =============================================================================

/// Default initial delay for exponential backoff (100ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum delay for exponential backoff (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default attempts per source before it is declared failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// How a source recovers from transient failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// First transient failure fails the source.
    None,

    /// Exponential backoff, capped.
    ExponentialBackoff {
        /// Attempts allowed, counting the first.
        max_attempts: u32,
        /// Delay after the first failure.
        initial_delay: Duration,
        /// Upper bound for any single delay.
        max_delay: Duration,
        /// Growth factor between consecutive delays.
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Exponential backoff with the default delays.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Delay before retry number `failures` (1-based), or `None` once the
    /// source has used up its attempts.
    pub fn delay_for_attempt(&self, failures: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if failures == 0 || failures >= *max_attempts {
                    return None;
                }
                let factor = multiplier.powi((failures - 1) as i32);
                let delay_ms = (initial_delay.as_millis() as f64 * factor)
                    .min(max_delay.as_millis() as f64);
                Some(Duration::from_millis(delay_ms as u64).min(*max_delay))
            }
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}

/// How an HTTP status affects a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Throttling or a server hiccup; back off and ask again.
    Retryable,
    /// The source will never serve this file.
    Terminal,
}

/// Classifies a non-success HTTP status.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        408 | 429 => StatusClass::Retryable,
        400..=499 => StatusClass::Terminal,
        500..=599 => StatusClass::Retryable,
        // Anything else reaching us is a protocol violation from this source.
        _ => StatusClass::Terminal,
    }
}

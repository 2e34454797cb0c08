//! Minimum-rate watchdog for streaming delivery.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{RaidError, RaidResult};

/// Fails a session whose delivered prefix advanced by less than
/// `min_rate * window` over the last `window`.
#[derive(Debug)]
pub(crate) struct StallDetector {
    window: Duration,
    min_rate: u64,
    /// (time, contiguous offset), oldest first.
    samples: VecDeque<(Instant, u64)>,
}

impl StallDetector {
    pub(crate) fn new(window: Duration, min_rate: u64, now: Instant, contiguous: u64) -> Self {
        let mut samples = VecDeque::new();
        samples.push_back((now, contiguous));
        Self {
            window,
            min_rate,
            samples,
        }
    }

    pub(crate) fn observe(&mut self, now: Instant, contiguous: u64) -> RaidResult<()> {
        self.samples.push_back((now, contiguous));
        // Keep the newest sample that is at least a window old as baseline.
        while self.samples.len() >= 2
            && now.saturating_duration_since(self.samples[1].0) >= self.window
        {
            self.samples.pop_front();
        }

        let Some(&(since, baseline)) = self.samples.front() else {
            return Ok(());
        };
        if now.saturating_duration_since(since) < self.window {
            return Ok(());
        }
        let required = (self.min_rate as f64 * self.window.as_secs_f64()) as u64;
        if contiguous.saturating_sub(baseline) < required {
            return Err(RaidError::StreamStalled {
                contiguous,
                window_secs: self.window.as_secs(),
            });
        }
        Ok(())
    }
}

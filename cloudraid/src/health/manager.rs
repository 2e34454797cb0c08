//! Source health state machine.
//!
//! ```text
//! Healthy  --[slow success / retryable failure]--> Degraded
//! Degraded --[success within latency window]-----> Healthy
//! any      --[terminal status / retries exhausted / hanging]--> Failed
//! ```
//!
//! Failed is permanent. A second Failed source makes the session fatal,
//! since no line can then be reconstructed.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::policy::{classify_status, RetryPolicy, StatusClass};
use crate::config::TransferConfig;
use crate::source::{Source, SourceHealth};

/// Result of one range request, as seen by the health manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success { bytes: u64, elapsed: Duration },
    Timeout,
    HttpError(u16),
    /// Connection-level failure (reset, DNS, short body).
    Transport(String),
}

/// A source moved between health states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthChange {
    pub index: usize,
    pub from: SourceHealth,
    pub to: SourceHealth,
}

/// What the session should do after an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    /// Nothing special.
    Continue,
    /// Re-request the range once `delay` has passed.
    Retry { delay: Duration },
    /// The source just failed; stop scheduling it.
    Exclude,
    /// Two sources have failed; the session cannot complete.
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthDecision {
    pub action: HealthAction,
    pub change: Option<HealthChange>,
}

impl HealthDecision {
    fn unchanged(action: HealthAction) -> Self {
        Self {
            action,
            change: None,
        }
    }
}

/// Classifies request outcomes into source health transitions.
#[derive(Debug, Clone)]
pub struct SourceHealthManager {
    retry: RetryPolicy,
    latency_window: Duration,
    hang_timeout: Duration,
}

impl SourceHealthManager {
    pub fn new(retry: RetryPolicy, latency_window: Duration, hang_timeout: Duration) -> Self {
        Self {
            retry,
            latency_window,
            hang_timeout,
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(
            config.retry_policy().clone(),
            config.latency_window(),
            config.hang_timeout(),
        )
    }

    pub fn failed_count(sources: &[Source]) -> usize {
        sources.iter().filter(|s| s.health.is_failed()).count()
    }

    /// Applies one request outcome for `index`.
    pub fn on_outcome(
        &self,
        sources: &mut [Source],
        index: usize,
        outcome: &FetchOutcome,
        now: Instant,
    ) -> HealthDecision {
        if sources[index].health.is_failed() {
            return HealthDecision::unchanged(HealthAction::Continue);
        }

        match outcome {
            FetchOutcome::Success { elapsed, .. } => {
                let source = &mut sources[index];
                source.consecutive_failures = 0;
                source.retry_at = None;
                let to = if *elapsed <= self.latency_window {
                    SourceHealth::Healthy
                } else {
                    debug!(
                        source = index,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Slow response"
                    );
                    SourceHealth::Degraded
                };
                HealthDecision {
                    action: HealthAction::Continue,
                    change: transition(source, to),
                }
            }
            FetchOutcome::Timeout => {
                if self.others_progressing(sources, index, now) > 0 {
                    self.retry_or_fail(sources, index, now, "timeout")
                } else {
                    // Nobody is moving: likely our own link, not this source.
                    let delay = self.retry.delay_for_attempt(1).unwrap_or_default();
                    sources[index].retry_at = Some(now + delay);
                    debug!(source = index, "Timeout with no source progressing, not counted");
                    HealthDecision::unchanged(HealthAction::Retry { delay })
                }
            }
            FetchOutcome::HttpError(status) => match classify_status(*status) {
                StatusClass::Retryable => self.retry_or_fail(sources, index, now, "http status"),
                StatusClass::Terminal => {
                    self.fail(sources, index, &format!("terminal HTTP status {}", status))
                }
            },
            FetchOutcome::Transport(reason) => {
                debug!(source = index, reason = %reason, "Transport error");
                self.retry_or_fail(sources, index, now, "transport error")
            }
        }
    }

    /// Fails sources that have an outstanding request but have received
    /// nothing for `hang_timeout` while enough other sources are moving or
    /// idle after delivering.
    ///
    /// Not applied once a source has already failed: the session then needs
    /// every remaining source and relies on request timeouts instead.
    pub fn check_hanging(&self, sources: &mut [Source], now: Instant) -> Option<HealthDecision> {
        if Self::failed_count(sources) > 0 {
            return None;
        }
        let eligible: Vec<usize> = sources
            .iter()
            .filter(|s| s.is_active() && (s.in_flight > 0 || self.is_vouching(s, now)))
            .map(|s| s.index)
            .collect();
        if eligible.len() < 2 {
            return None;
        }
        let data_sources = sources.len() - 1;
        let needed = data_sources.min(eligible.len() - 1).max(1);

        for &index in &eligible {
            let source = &sources[index];
            if source.in_flight == 0
                || now.saturating_duration_since(source.last_activity) < self.hang_timeout
            {
                continue;
            }
            let others = eligible
                .iter()
                .filter(|&&j| j != index && self.is_vouching(&sources[j], now))
                .count();
            if others >= needed {
                return Some(self.fail(sources, index, "hanging"));
            }
        }
        None
    }

    /// Finds an active source that is far slower than the others.
    ///
    /// Only considered while every source is fetching and each of the others
    /// has delivered at least `min_bytes`.
    pub fn slowest_source(
        &self,
        sources: &[Source],
        ratio: f64,
        min_bytes: u64,
        now: Instant,
    ) -> Option<usize> {
        if Self::failed_count(sources) > 0 {
            return None;
        }
        let fetching = sources
            .iter()
            .all(|s| s.in_flight > 0 || s.bytes_received > 0);
        if !fetching {
            return None;
        }

        let (slowest, slowest_rate) = sources
            .iter()
            .map(|s| (s.index, s.throughput(now)))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;

        let mut others: Vec<f64> = Vec::with_capacity(sources.len() - 1);
        for source in sources.iter().filter(|s| s.index != slowest) {
            if source.bytes_received < min_bytes {
                return None;
            }
            others.push(source.throughput(now));
        }
        others.sort_by(|a, b| a.total_cmp(b));
        let median = others[others.len() / 2];

        if slowest_rate * ratio < median {
            info!(
                source = slowest,
                rate = slowest_rate as u64,
                median = median as u64,
                "Source is much slower than its peers"
            );
            Some(slowest)
        } else {
            None
        }
    }

    fn others_progressing(&self, sources: &[Source], index: usize, now: Instant) -> usize {
        sources
            .iter()
            .filter(|s| s.index != index && self.is_vouching(s, now))
            .count()
    }

    /// Whether `source` shows the local link is working: it is receiving
    /// bytes, or it delivered cleanly and is idle waiting for new work.
    fn is_vouching(&self, source: &Source, now: Instant) -> bool {
        source.is_progressing(now, self.hang_timeout)
            || (source.is_active()
                && source.in_flight == 0
                && source.consecutive_failures == 0
                && source.bytes_received > 0)
    }

    fn retry_or_fail(
        &self,
        sources: &mut [Source],
        index: usize,
        now: Instant,
        reason: &str,
    ) -> HealthDecision {
        let source = &mut sources[index];
        source.consecutive_failures += 1;
        match self.retry.delay_for_attempt(source.consecutive_failures) {
            Some(delay) => {
                source.retry_at = Some(now + delay);
                warn!(
                    source = index,
                    failures = source.consecutive_failures,
                    delay_ms = delay.as_millis() as u64,
                    reason,
                    "Retrying source after backoff"
                );
                HealthDecision {
                    action: HealthAction::Retry { delay },
                    change: transition(source, SourceHealth::Degraded),
                }
            }
            None => {
                let attempts = source.consecutive_failures;
                self.fail(
                    sources,
                    index,
                    &format!("{} after {} attempts", reason, attempts),
                )
            }
        }
    }

    fn fail(&self, sources: &mut [Source], index: usize, reason: &str) -> HealthDecision {
        let source = &mut sources[index];
        if source.health.is_failed() {
            return HealthDecision::unchanged(HealthAction::Continue);
        }
        source.retry_at = None;
        let change = transition(source, SourceHealth::Failed);
        warn!(source = index, reason, "Source failed, excluding it");

        let failed = Self::failed_count(sources);
        let action = if failed > 1 {
            error!(failed, "More than one source failed, reconstruction impossible");
            HealthAction::Fatal
        } else {
            HealthAction::Exclude
        };
        HealthDecision { action, change }
    }
}

fn transition(source: &mut Source, to: SourceHealth) -> Option<HealthChange> {
    let from = source.health;
    if from == to {
        return None;
    }
    source.health = to;
    info!(source = source.index, %from, %to, "Source health changed");
    Some(HealthChange {
        index: source.index,
        from,
        to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(now: Instant) -> Vec<Source> {
        (0..6).map(|i| Source::new(i, format!("u{}", i), now)).collect()
    }

    fn manager() -> SourceHealthManager {
        SourceHealthManager::new(
            RetryPolicy::exponential(3),
            Duration::from_secs(10),
            Duration::from_secs(30),
        )
    }

    fn fast() -> FetchOutcome {
        FetchOutcome::Success {
            bytes: 1024,
            elapsed: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_success_keeps_healthy() {
        let now = Instant::now();
        let mut srcs = sources(now);
        let decision = manager().on_outcome(&mut srcs, 1, &fast(), now);
        assert_eq!(decision.action, HealthAction::Continue);
        assert!(decision.change.is_none());
        assert_eq!(srcs[1].health, SourceHealth::Healthy);
    }

    #[test]
    fn test_slow_success_degrades_and_fast_success_recovers() {
        let now = Instant::now();
        let mut srcs = sources(now);
        let mgr = manager();
        let slow = FetchOutcome::Success {
            bytes: 10,
            elapsed: Duration::from_secs(11),
        };
        let decision = mgr.on_outcome(&mut srcs, 2, &slow, now);
        assert_eq!(
            decision.change,
            Some(HealthChange {
                index: 2,
                from: SourceHealth::Healthy,
                to: SourceHealth::Degraded
            })
        );
        let decision = mgr.on_outcome(&mut srcs, 2, &fast(), now);
        assert_eq!(decision.change.map(|c| c.to), Some(SourceHealth::Healthy));
    }

    #[test]
    fn test_throttling_backs_off_then_fails() {
        let now = Instant::now();
        let mut srcs = sources(now);
        let mgr = manager();

        let first = mgr.on_outcome(&mut srcs, 3, &FetchOutcome::HttpError(429), now);
        assert_eq!(
            first.action,
            HealthAction::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(srcs[3].health, SourceHealth::Degraded);
        assert!(srcs[3].is_backing_off(now));

        let second = mgr.on_outcome(&mut srcs, 3, &FetchOutcome::HttpError(503), now);
        assert_eq!(
            second.action,
            HealthAction::Retry {
                delay: Duration::from_millis(200)
            }
        );

        let third = mgr.on_outcome(&mut srcs, 3, &FetchOutcome::HttpError(503), now);
        assert_eq!(third.action, HealthAction::Exclude);
        assert_eq!(srcs[3].health, SourceHealth::Failed);
    }

    #[test]
    fn test_terminal_status_fails_immediately() {
        let now = Instant::now();
        let mut srcs = sources(now);
        let decision = manager().on_outcome(&mut srcs, 4, &FetchOutcome::HttpError(404), now);
        assert_eq!(decision.action, HealthAction::Exclude);
        assert_eq!(
            decision.change,
            Some(HealthChange {
                index: 4,
                from: SourceHealth::Healthy,
                to: SourceHealth::Failed
            })
        );
    }

    #[test]
    fn test_second_failure_is_fatal() {
        let now = Instant::now();
        let mut srcs = sources(now);
        let mgr = manager();
        assert_eq!(
            mgr.on_outcome(&mut srcs, 1, &FetchOutcome::HttpError(403), now)
                .action,
            HealthAction::Exclude
        );
        assert_eq!(
            mgr.on_outcome(&mut srcs, 5, &FetchOutcome::HttpError(404), now)
                .action,
            HealthAction::Fatal
        );
    }

    #[test]
    fn test_failed_source_ignores_late_outcomes() {
        let now = Instant::now();
        let mut srcs = sources(now);
        let mgr = manager();
        mgr.on_outcome(&mut srcs, 1, &FetchOutcome::HttpError(403), now);
        let decision = mgr.on_outcome(&mut srcs, 1, &fast(), now);
        assert_eq!(decision, HealthDecision::unchanged(HealthAction::Continue));
        assert_eq!(srcs[1].health, SourceHealth::Failed);
    }

    #[test]
    fn test_timeout_counts_only_when_others_progress() {
        let now = Instant::now();
        let mut srcs = sources(now);
        let mgr = manager();

        let decision = mgr.on_outcome(&mut srcs, 0, &FetchOutcome::Timeout, now);
        assert!(matches!(decision.action, HealthAction::Retry { .. }));
        assert_eq!(srcs[0].consecutive_failures, 0);
        assert_eq!(srcs[0].health, SourceHealth::Healthy);

        srcs[1].record_received(100, now);
        mgr.on_outcome(&mut srcs, 0, &FetchOutcome::Timeout, now);
        assert_eq!(srcs[0].consecutive_failures, 1);
        assert_eq!(srcs[0].health, SourceHealth::Degraded);
    }

    #[test]
    fn test_hanging_source_fails_when_peers_progress() {
        let start = Instant::now();
        let mut srcs = sources(start);
        let mgr = manager();
        for s in srcs.iter_mut() {
            s.record_request(1024, start);
        }
        let later = start + Duration::from_secs(31);
        for s in srcs.iter_mut().skip(1) {
            s.record_received(1024, later);
        }
        let decision = mgr.check_hanging(&mut srcs, later).unwrap();
        assert_eq!(decision.action, HealthAction::Exclude);
        assert_eq!(srcs[0].health, SourceHealth::Failed);
    }

    #[test]
    fn test_not_hanging_when_peers_idle_too() {
        let start = Instant::now();
        let mut srcs = sources(start);
        let mgr = manager();
        for s in srcs.iter_mut() {
            s.record_request(1024, start);
        }
        let later = start + Duration::from_secs(31);
        srcs[1].record_received(1024, later);
        assert!(mgr.check_hanging(&mut srcs, later).is_none());
    }

    #[test]
    fn test_hanging_source_fails_when_peers_idle_after_delivering() {
        let start = Instant::now();
        let mut srcs = sources(start);
        let mgr = manager();
        for s in srcs.iter_mut().skip(1) {
            s.record_request(1024, start);
            s.record_completion();
            s.record_received(1024, start);
        }
        srcs[0].record_request(1024, start);
        let later = start + Duration::from_secs(60);
        let decision = mgr.check_hanging(&mut srcs, later).unwrap();
        assert_eq!(decision.action, HealthAction::Exclude);
        assert_eq!(srcs[0].health, SourceHealth::Failed);
    }

    #[test]
    fn test_slowest_source_detection() {
        let start = Instant::now();
        let mut srcs = sources(start);
        let later = start + Duration::from_secs(10);
        for s in srcs.iter_mut() {
            s.record_request(1, start);
        }
        for s in srcs.iter_mut() {
            let bytes = if s.index == 4 { 10_000 } else { 1_000_000 };
            s.record_received(bytes, later);
        }
        let mgr = manager();
        assert_eq!(mgr.slowest_source(&srcs, 4.0, 100_000, later), Some(4));
        assert_eq!(mgr.slowest_source(&srcs, 4.0, 2_000_000, later), None);

        srcs[4].record_received(990_000, later);
        assert_eq!(mgr.slowest_source(&srcs, 4.0, 100_000, later), None);
    }
}

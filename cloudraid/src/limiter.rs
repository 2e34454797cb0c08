//! Session-wide limits on concurrent requests and bandwidth.
//!
//! Both limiters are shared by every source of one session only; separate
//! sessions do not coordinate.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::{RaidError, RaidResult};

/// Bounds the number of range requests in flight across all sources.
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max_connections: usize) -> Self {
        let max = max_connections.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Waits for a free connection slot; the slot is held until the permit
    /// is dropped.
    pub async fn acquire(&self) -> RaidResult<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| RaidError::Cancelled)
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Rejects every waiting and future `acquire`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[derive(Debug)]
struct Bucket {
    /// Negative while callers are in debt.
    tokens: f64,
    refilled_at: Instant,
}

/// Token bucket capping received bytes per second.
///
/// Bytes are reserved before a request is sent; a reservation that overdraws
/// the bucket is told how long to wait. Burst capacity is one second.
#[derive(Debug)]
pub struct RateLimiter {
    bytes_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec.max(1) as f64;
        Self {
            bytes_per_sec: rate,
            bucket: Mutex::new(Bucket {
                tokens: rate,
                refilled_at: Instant::now(),
            }),
        }
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec as u64
    }

    /// Reserves `bytes` at `now` and returns how long the caller must wait
    /// before using them.
    pub fn reserve(&self, bytes: u64, now: Instant) -> Duration {
        let mut bucket = self.bucket.lock();
        let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.bytes_per_sec).min(self.bytes_per_sec);
        bucket.refilled_at = now.max(bucket.refilled_at);
        bucket.tokens -= bytes as f64;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.bytes_per_sec)
        }
    }

    /// Reserves `bytes` and sleeps until they may be used.
    pub async fn consume(&self, bytes: u64) {
        let wait = self.reserve(bytes, Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_limiter_bounds_permits() {
        let limiter = ConnectionLimiter::new(2);
        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);

        let waiting = tokio::time::timeout(Duration::from_millis(20), limiter.acquire()).await;
        assert!(waiting.is_err());

        drop(a);
        assert_eq!(limiter.available(), 1);
        assert!(limiter.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_limiter_reports_cancelled() {
        let limiter = ConnectionLimiter::new(1);
        limiter.close();
        assert!(matches!(limiter.acquire().await, Err(RaidError::Cancelled)));
    }

    #[test]
    fn test_zero_connections_rounds_up() {
        assert_eq!(ConnectionLimiter::new(0).max(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_debt() {
        let limiter = RateLimiter::new(1000);
        let now = Instant::now();
        assert_eq!(limiter.reserve(1000, now), Duration::ZERO);
        assert_eq!(limiter.reserve(500, now), Duration::from_millis(500));
        assert_eq!(limiter.reserve(500, now), Duration::from_secs(1));

        // Two seconds later the debt is paid and the bucket is full again.
        let later = now + Duration::from_secs(2);
        assert_eq!(limiter.reserve(0, later), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_paces_throughput() {
        let limiter = RateLimiter::new(10_000);
        let started = Instant::now();
        for _ in 0..5 {
            limiter.consume(10_000).await;
        }
        // First second comes from the initial burst.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);
    }
}

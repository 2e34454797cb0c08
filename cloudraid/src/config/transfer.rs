//! Per-transfer tuning.

use std::str::FromStr;
use std::time::Duration;

use crate::health::RetryPolicy;

/// Default maximum concurrently open connections per session.
pub const DEFAULT_MAX_CONNECTIONS: usize = 6;

/// Default outstanding requests per source.
pub const DEFAULT_MAX_OUTSTANDING_PER_SOURCE: usize = 2;

/// Default size of the first requests of a download (64 KB).
pub const DEFAULT_INITIAL_REQUEST_BYTES: u64 = 64 * 1024;

/// Default size of the first requests of a stream (4 KB).
pub const DEFAULT_STREAMING_INITIAL_REQUEST_BYTES: u64 = 4 * 1024;

/// Default upper bound for a single range request (1 MB).
pub const DEFAULT_MAX_REQUEST_BYTES: u64 = 1024 * 1024;

/// Default part block size for rotating fetch mode (256 KB).
pub const DEFAULT_ROTATION_BLOCK_BYTES: u64 = 256 * 1024;

/// Default read-ahead beyond the delivery cursor for downloads (32 MB of file data).
pub const DEFAULT_READ_AHEAD_BYTES: u64 = 32 * 1024 * 1024;

/// Default read-ahead beyond the delivery cursor for streams (2 MB).
pub const DEFAULT_STREAMING_READ_AHEAD_BYTES: u64 = 2 * 1024 * 1024;

/// Parts at or below this size skip the parity source entirely (640 KB).
pub const DEFAULT_SMALL_FILE_BYTES: u64 = 640 * 1024;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default silence after which a source with outstanding requests is hanging.
pub const DEFAULT_HANG_TIMEOUT_SECS: u64 = 30;

/// Responses slower than this demote a source to Degraded.
pub const DEFAULT_LATENCY_WINDOW_SECS: u64 = 10;

/// Default cadence for persisting the resume token.
pub const DEFAULT_RESUME_SAVE_INTERVAL_SECS: u64 = 5;

/// Default rolling window for stream stall detection.
pub const DEFAULT_STALL_WINDOW_SECS: u64 = 30;

/// Default minimum stream delivery rate (1 KB/s).
pub const DEFAULT_STALL_MIN_RATE: u64 = 1024;

/// A source slower than median / ratio is parked as the spare.
pub const DEFAULT_SLOW_SOURCE_RATIO: f64 = 4.0;

/// Bytes each peer must deliver before slow-source detection kicks in (4 MB).
pub const DEFAULT_SLOW_SOURCE_MIN_BYTES: u64 = 4 * 1024 * 1024;

/// Which sources fetch which lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStrategy {
    /// Rotating for large files, parity-as-spare for small ones.
    #[default]
    Auto,
    /// Every source fetches every line.
    AllSources,
    /// Each block is fetched from all but one source, rotating.
    Rotating,
}

impl FromStr for FetchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(FetchStrategy::Auto),
            "all" | "all_sources" => Ok(FetchStrategy::AllSources),
            "rotating" => Ok(FetchStrategy::Rotating),
            other => Err(format!("unknown fetch strategy '{}'", other)),
        }
    }
}

/// Tuning for one transfer session.
///
/// # Example
///
/// ```
/// use cloudraid::config::TransferConfig;
/// use std::time::Duration;
///
/// let config = TransferConfig::new()
///     .with_max_connections(4)
///     .with_request_timeout(Duration::from_secs(10))
///     .with_max_speed(Some(2 * 1024 * 1024));
/// assert_eq!(config.max_connections(), 4);
/// assert_eq!(config.max_speed(), Some(2 * 1024 * 1024));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    max_connections: usize,
    max_outstanding_per_source: usize,
    initial_request_bytes: u64,
    max_request_bytes: u64,
    rotation_block_bytes: u64,
    read_ahead_bytes: u64,
    small_file_bytes: u64,
    request_timeout: Duration,
    hang_timeout: Duration,
    latency_window: Duration,
    retry_policy: RetryPolicy,
    /// Aggregate bytes per second; `None` is unlimited.
    max_speed: Option<u64>,
    resume_save_interval: Duration,
    /// `None` disables stall detection (downloads).
    stall_window: Option<Duration>,
    stall_min_rate: u64,
    /// `None` disables slow-source parking.
    slow_source_ratio: Option<f64>,
    slow_source_min_bytes: u64,
    fetch_strategy: FetchStrategy,
}

impl TransferConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults tuned for streaming: small opening requests, a short
    /// read-ahead and stall detection.
    pub fn streaming() -> Self {
        Self::default().into_streaming()
    }

    /// Applies the streaming overrides to an existing configuration.
    pub fn into_streaming(self) -> Self {
        Self {
            initial_request_bytes: self
                .initial_request_bytes
                .min(DEFAULT_STREAMING_INITIAL_REQUEST_BYTES),
            read_ahead_bytes: self.read_ahead_bytes.min(DEFAULT_STREAMING_READ_AHEAD_BYTES),
            stall_window: self
                .stall_window
                .or(Some(Duration::from_secs(DEFAULT_STALL_WINDOW_SECS))),
            ..self
        }
    }

    pub fn with_max_connections(mut self, connections: usize) -> Self {
        self.max_connections = connections.max(1);
        self
    }

    pub fn with_max_outstanding_per_source(mut self, outstanding: usize) -> Self {
        self.max_outstanding_per_source = outstanding.max(1);
        self
    }

    pub fn with_initial_request_bytes(mut self, bytes: u64) -> Self {
        self.initial_request_bytes = bytes;
        self
    }

    pub fn with_max_request_bytes(mut self, bytes: u64) -> Self {
        self.max_request_bytes = bytes;
        self
    }

    /// Part block size for rotating mode. Rounded to the sector size at use.
    pub fn with_rotation_block_bytes(mut self, bytes: u64) -> Self {
        self.rotation_block_bytes = bytes;
        self
    }

    /// File bytes scheduled ahead of the delivery cursor.
    pub fn with_read_ahead_bytes(mut self, bytes: u64) -> Self {
        self.read_ahead_bytes = bytes;
        self
    }

    pub fn with_small_file_bytes(mut self, bytes: u64) -> Self {
        self.small_file_bytes = bytes;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_hang_timeout(mut self, timeout: Duration) -> Self {
        self.hang_timeout = timeout;
        self
    }

    pub fn with_latency_window(mut self, window: Duration) -> Self {
        self.latency_window = window;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_max_speed(mut self, bytes_per_sec: Option<u64>) -> Self {
        self.max_speed = bytes_per_sec.filter(|&rate| rate > 0);
        self
    }

    pub fn with_resume_save_interval(mut self, interval: Duration) -> Self {
        self.resume_save_interval = interval;
        self
    }

    pub fn with_stall_window(mut self, window: Option<Duration>) -> Self {
        self.stall_window = window;
        self
    }

    pub fn with_stall_min_rate(mut self, bytes_per_sec: u64) -> Self {
        self.stall_min_rate = bytes_per_sec;
        self
    }

    pub fn with_slow_source_ratio(mut self, ratio: Option<f64>) -> Self {
        self.slow_source_ratio = ratio.filter(|&r| r > 1.0);
        self
    }

    pub fn with_slow_source_min_bytes(mut self, bytes: u64) -> Self {
        self.slow_source_min_bytes = bytes;
        self
    }

    pub fn with_fetch_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.fetch_strategy = strategy;
        self
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn max_outstanding_per_source(&self) -> usize {
        self.max_outstanding_per_source
    }

    pub fn initial_request_bytes(&self) -> u64 {
        self.initial_request_bytes
    }

    pub fn max_request_bytes(&self) -> u64 {
        self.max_request_bytes
    }

    pub fn rotation_block_bytes(&self) -> u64 {
        self.rotation_block_bytes
    }

    pub fn read_ahead_bytes(&self) -> u64 {
        self.read_ahead_bytes
    }

    pub fn small_file_bytes(&self) -> u64 {
        self.small_file_bytes
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn hang_timeout(&self) -> Duration {
        self.hang_timeout
    }

    pub fn latency_window(&self) -> Duration {
        self.latency_window
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn max_speed(&self) -> Option<u64> {
        self.max_speed
    }

    pub fn resume_save_interval(&self) -> Duration {
        self.resume_save_interval
    }

    pub fn stall_window(&self) -> Option<Duration> {
        self.stall_window
    }

    pub fn stall_min_rate(&self) -> u64 {
        self.stall_min_rate
    }

    pub fn slow_source_ratio(&self) -> Option<f64> {
        self.slow_source_ratio
    }

    pub fn slow_source_min_bytes(&self) -> u64 {
        self.slow_source_min_bytes
    }

    pub fn fetch_strategy(&self) -> FetchStrategy {
        self.fetch_strategy
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_outstanding_per_source: DEFAULT_MAX_OUTSTANDING_PER_SOURCE,
            initial_request_bytes: DEFAULT_INITIAL_REQUEST_BYTES,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            rotation_block_bytes: DEFAULT_ROTATION_BLOCK_BYTES,
            read_ahead_bytes: DEFAULT_READ_AHEAD_BYTES,
            small_file_bytes: DEFAULT_SMALL_FILE_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            hang_timeout: Duration::from_secs(DEFAULT_HANG_TIMEOUT_SECS),
            latency_window: Duration::from_secs(DEFAULT_LATENCY_WINDOW_SECS),
            retry_policy: RetryPolicy::default(),
            max_speed: None,
            resume_save_interval: Duration::from_secs(DEFAULT_RESUME_SAVE_INTERVAL_SECS),
            stall_window: None,
            stall_min_rate: DEFAULT_STALL_MIN_RATE,
            slow_source_ratio: Some(DEFAULT_SLOW_SOURCE_RATIO),
            slow_source_min_bytes: DEFAULT_SLOW_SOURCE_MIN_BYTES,
            fetch_strategy: FetchStrategy::Auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransferConfig::default();
        assert_eq!(config.max_connections(), DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.max_request_bytes(), DEFAULT_MAX_REQUEST_BYTES);
        assert_eq!(config.read_ahead_bytes(), DEFAULT_READ_AHEAD_BYTES);
        assert_eq!(config.retry_policy().max_attempts(), 10);
        assert!(config.max_speed().is_none());
        assert!(config.stall_window().is_none());
        assert_eq!(config.fetch_strategy(), FetchStrategy::Auto);
    }

    #[test]
    fn test_new_equals_default() {
        assert_eq!(TransferConfig::new(), TransferConfig::default());
    }

    #[test]
    fn test_streaming_preset() {
        let config = TransferConfig::streaming();
        assert_eq!(
            config.initial_request_bytes(),
            DEFAULT_STREAMING_INITIAL_REQUEST_BYTES
        );
        assert_eq!(config.read_ahead_bytes(), DEFAULT_STREAMING_READ_AHEAD_BYTES);
        assert_eq!(
            config.stall_window(),
            Some(Duration::from_secs(DEFAULT_STALL_WINDOW_SECS))
        );
    }

    #[test]
    fn test_into_streaming_keeps_smaller_values() {
        let config = TransferConfig::new()
            .with_read_ahead_bytes(4096)
            .with_stall_window(Some(Duration::from_secs(5)))
            .into_streaming();
        assert_eq!(config.read_ahead_bytes(), 4096);
        assert_eq!(config.stall_window(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_builder_chain() {
        let config = TransferConfig::new()
            .with_max_connections(0)
            .with_max_outstanding_per_source(4)
            .with_max_speed(Some(0))
            .with_slow_source_ratio(Some(0.5))
            .with_fetch_strategy(FetchStrategy::Rotating);
        assert_eq!(config.max_connections(), 1);
        assert_eq!(config.max_outstanding_per_source(), 4);
        assert_eq!(config.max_speed(), None);
        assert_eq!(config.slow_source_ratio(), None);
        assert_eq!(config.fetch_strategy(), FetchStrategy::Rotating);
    }

    #[test]
    fn test_fetch_strategy_from_str() {
        assert_eq!("AUTO".parse::<FetchStrategy>(), Ok(FetchStrategy::Auto));
        assert_eq!("all".parse::<FetchStrategy>(), Ok(FetchStrategy::AllSources));
        assert_eq!(
            " rotating ".parse::<FetchStrategy>(),
            Ok(FetchStrategy::Rotating)
        );
        assert!("fastest".parse::<FetchStrategy>().is_err());
    }
}

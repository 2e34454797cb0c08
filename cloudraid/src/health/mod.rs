//! Source health tracking.
//!
//! [`SourceHealthManager`] turns request outcomes into Healthy / Degraded /
//! Failed transitions and tells the session whether to retry, exclude the
//! source, or give up. [`RetryPolicy`] controls the backoff between retries.

mod manager;
mod policy;

pub use manager::{FetchOutcome, HealthAction, HealthChange, HealthDecision, SourceHealthManager};
pub use policy::{
    classify_status, RetryPolicy, StatusClass, DEFAULT_BACKOFF_MULTIPLIER,
    DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_SECS,
};

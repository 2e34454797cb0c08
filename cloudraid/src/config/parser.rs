//! INI parsing: `Ini` -> `ConfigFile`.
//!
//! The single place where INI key names are mapped to settings.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::file::{ConfigFile, ConfigFileError};
use super::size::parse_size;
use super::transfer::FetchStrategy;
use crate::health::RetryPolicy;

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "expected a number"))
}

fn size(section: &str, key: &str, value: &str) -> Result<u64, ConfigFileError> {
    parse_size(value)
        .map_err(|_| invalid(section, key, value, "expected format like '4MB', '256KB', or '1024'"))
}

fn seconds(section: &str, key: &str, value: &str) -> Result<Duration, ConfigFileError> {
    let secs: f64 = number(section, key, value)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(invalid(section, key, value, "expected a non-negative number of seconds"));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn expand_tilde(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(value),
    }
}

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    if let Some(section) = ini.section(Some("transfer")) {
        parse_transfer(section, &mut config)?;
    }

    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.log_file = expand_tilde(v);
            }
        }
    }

    if let Some(section) = ini.section(Some("resume")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.resume_directory = expand_tilde(v);
            }
        }
    }

    Ok(config)
}

fn parse_transfer(section: &Properties, config: &mut ConfigFile) -> Result<(), ConfigFileError> {
    const S: &str = "transfer";
    let mut t = config.transfer.clone();

    if let Some(v) = section.get("max_connections") {
        let n: usize = number(S, "max_connections", v)?;
        if n == 0 {
            return Err(invalid(S, "max_connections", v, "must be at least 1"));
        }
        t = t.with_max_connections(n);
    }
    if let Some(v) = section.get("max_outstanding_per_source") {
        let n: usize = number(S, "max_outstanding_per_source", v)?;
        if n == 0 {
            return Err(invalid(S, "max_outstanding_per_source", v, "must be at least 1"));
        }
        t = t.with_max_outstanding_per_source(n);
    }
    if let Some(v) = section.get("initial_request_size") {
        t = t.with_initial_request_bytes(size(S, "initial_request_size", v)?);
    }
    if let Some(v) = section.get("max_request_size") {
        let bytes = size(S, "max_request_size", v)?;
        if bytes == 0 {
            return Err(invalid(S, "max_request_size", v, "must be greater than zero"));
        }
        t = t.with_max_request_bytes(bytes);
    }
    if let Some(v) = section.get("rotation_block_size") {
        t = t.with_rotation_block_bytes(size(S, "rotation_block_size", v)?);
    }
    if let Some(v) = section.get("read_ahead") {
        t = t.with_read_ahead_bytes(size(S, "read_ahead", v)?);
    }
    if let Some(v) = section.get("small_file_threshold") {
        t = t.with_small_file_bytes(size(S, "small_file_threshold", v)?);
    }
    if let Some(v) = section.get("request_timeout") {
        t = t.with_request_timeout(seconds(S, "request_timeout", v)?);
    }
    if let Some(v) = section.get("hang_timeout") {
        t = t.with_hang_timeout(seconds(S, "hang_timeout", v)?);
    }
    if let Some(v) = section.get("latency_window") {
        t = t.with_latency_window(seconds(S, "latency_window", v)?);
    }
    if let Some(v) = section.get("max_retries") {
        let attempts: u32 = number(S, "max_retries", v)?;
        let policy = if attempts == 0 {
            RetryPolicy::None
        } else {
            RetryPolicy::exponential(attempts)
        };
        t = t.with_retry_policy(policy);
    }
    if let Some(v) = section.get("max_speed") {
        let v = v.trim();
        let rate = if v.is_empty() || v.eq_ignore_ascii_case("unlimited") {
            None
        } else {
            Some(size(S, "max_speed", v)?)
        };
        t = t.with_max_speed(rate);
    }
    if let Some(v) = section.get("resume_save_interval") {
        t = t.with_resume_save_interval(seconds(S, "resume_save_interval", v)?);
    }
    if let Some(v) = section.get("stall_window") {
        let window = seconds(S, "stall_window", v)?;
        t = t.with_stall_window(if window.is_zero() { None } else { Some(window) });
    }
    if let Some(v) = section.get("stall_min_rate") {
        t = t.with_stall_min_rate(size(S, "stall_min_rate", v)?);
    }
    if let Some(v) = section.get("slow_source_ratio") {
        let ratio: f64 = number(S, "slow_source_ratio", v)?;
        if ratio != 0.0 && ratio <= 1.0 {
            return Err(invalid(S, "slow_source_ratio", v, "must be 0 (disabled) or greater than 1"));
        }
        t = t.with_slow_source_ratio(if ratio == 0.0 { None } else { Some(ratio) });
    }
    if let Some(v) = section.get("strategy") {
        let strategy: FetchStrategy = v
            .parse()
            .map_err(|_| invalid(S, "strategy", v, "must be one of: auto, all, rotating"))?;
        t = t.with_fetch_strategy(strategy);
    }

    config.transfer = t;
    Ok(())
}

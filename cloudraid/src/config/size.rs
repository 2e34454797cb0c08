//! Human-readable byte sizes ("4MB", "256K", "1.5GB").

use thiserror::Error;

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{input}' - expected format like '4MB', '256KB', or '1024'")]
pub struct SizeParseError {
    input: String,
}

impl SizeParseError {
    fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

const UNITS: [(&str, u64); 7] = [
    ("GB", 1024 * 1024 * 1024),
    ("G", 1024 * 1024 * 1024),
    ("MB", 1024 * 1024),
    ("M", 1024 * 1024),
    ("KB", 1024),
    ("K", 1024),
    ("B", 1),
];

/// Parses a size with an optional binary unit suffix into bytes.
///
/// ```
/// use cloudraid::config::parse_size;
///
/// assert_eq!(parse_size("512").unwrap(), 512);
/// assert_eq!(parse_size("64 KB").unwrap(), 64 * 1024);
/// assert_eq!(parse_size("1.5m").unwrap(), 1536 * 1024);
/// ```
pub fn parse_size(s: &str) -> Result<u64, SizeParseError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(SizeParseError::new(s));
    }
    let upper = trimmed.to_uppercase();

    let (number, multiplier) = UNITS
        .iter()
        .find(|(suffix, _)| upper.ends_with(suffix))
        .map(|(suffix, mult)| (upper[..upper.len() - suffix.len()].trim(), *mult))
        .unwrap_or((upper.as_str(), 1));

    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| SizeParseError::new(s));
    }
    let fractional: f64 = number.parse().map_err(|_| SizeParseError::new(s))?;
    if !fractional.is_finite() || fractional < 0.0 {
        return Err(SizeParseError::new(s));
    }
    let bytes = fractional * multiplier as f64;
    if bytes > u64::MAX as f64 {
        return Err(SizeParseError::new(s));
    }
    Ok(bytes.round() as u64)
}

/// Formats a byte count with a binary unit.
///
/// ```
/// use cloudraid::config::format_size;
///
/// assert_eq!(format_size(512), "512 B");
/// assert_eq!(format_size(1536), "1.5 KB");
/// assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
/// ```
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

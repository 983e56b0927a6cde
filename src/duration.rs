//! Human-readable durations for command-line options.

use std::time::Duration;
use thiserror::Error;

/// Errors returned when parsing a duration string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseDurationError {
    #[error("empty duration string")]
    Empty,
    #[error("invalid duration: '{0}'")]
    Invalid(String),
    #[error("duration must be greater than zero")]
    Zero,
}

/// Parse a non-zero duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use ibeacon_listener::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, ParseDurationError> {
    let src = src.trim();

    if src.is_empty() {
        return Err(ParseDurationError::Empty);
    }

    // `ms` must be tried before `m` and `s`
    let (number, unit_millis) = if let Some(num) = src.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = src.strip_suffix('h') {
        (num, 3_600_000)
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1_000)
    } else {
        (src, 1_000)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| ParseDurationError::Invalid(src.to_string()))?;
    let millis = value
        .checked_mul(unit_millis)
        .ok_or_else(|| ParseDurationError::Invalid(src.to_string()))?;

    if millis == 0 {
        return Err(ParseDurationError::Zero);
    }
    Ok(Duration::from_millis(millis))
}

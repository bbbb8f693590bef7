use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TimestampError {
    #[error("invalid unix seconds in slack timestamp {0:?}")]
    Seconds(String),

    #[error("invalid ordering suffix in slack timestamp {0:?}")]
    Suffix(String),

    #[error("slack timestamp {0:?} is out of range")]
    OutOfRange(String),
}

/// Convert a Slack message timestamp to an instant.
///
/// Slack timestamps look like `1512085950.000216`: unix seconds, a dot, then a
/// suffix that only orders messages sent within the same second. The suffix is
/// validated but does not contribute to the instant.
pub fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>, TimestampError> {
    let (seconds, suffix) = match ts.split_once('.') {
        Some((seconds, suffix)) => (seconds, Some(suffix)),
        None => (ts, None),
    };

    let seconds: i64 = seconds
        .parse()
        .map_err(|_| TimestampError::Seconds(ts.to_string()))?;

    if let Some(suffix) = suffix {
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimestampError::Suffix(ts.to_string()));
        }
    }

    DateTime::from_timestamp(seconds, 0).ok_or_else(|| TimestampError::OutOfRange(ts.to_string()))
}

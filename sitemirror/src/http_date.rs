//! IMF-fixdate formatting and parsing (`Sun, 06 Nov 1994 08:49:37 GMT`).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Format a timestamp as an HTTP date, truncated to whole seconds.
pub fn format(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = truncate_to_secs(time).into();
    datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date. Returns `None` for anything that is not a valid date.
pub fn parse(value: &str) -> Option<SystemTime> {
    let datetime = DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let secs = u64::try_from(datetime.timestamp()).ok()?;
    Some(UNIX_EPOCH + Duration::from_secs(secs))
}

/// Drop sub-second precision, which HTTP dates cannot carry.
pub fn truncate_to_secs(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => UNIX_EPOCH + Duration::from_secs(since.as_secs()),
        Err(_) => UNIX_EPOCH,
    }
}

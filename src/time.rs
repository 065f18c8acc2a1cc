use crate::error::{AppError, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex_lite::Regex;
use std::sync::OnceLock;

/// Offset-aware layouts tried after RFC 3339
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"];

/// Naive layouts, interpreted as UTC
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp and normalize it to UTC
///
/// Accepts:
/// - RFC 3339 (`2025-01-15T14:30:00Z`, `2025-01-15T14:30:00-03:00`)
/// - `2025-01-15 14:30:00+00:00` (pandas `to_csv` layout)
/// - naive `2025-01-15 14:30:00`, `2025-01-15T14:30`, treated as UTC
/// - a bare date `2025-01-15`, treated as midnight UTC
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(AppError::Parse(format!("Unrecognized timestamp '{}'", s)))
}

/// Parse a calendar date (`YYYY-MM-DD`)
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| AppError::Parse(format!("Invalid date '{}': {}", s, e)))
}

/// Compiled once, shared by every request and CLI argument
fn interval_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*(-?\d+)\s*([A-Za-z]*)\s*$").ok())
        .as_ref()
        .ok_or_else(|| AppError::Parse("Interval pattern failed to compile".to_string()))
}

/// Parse an interval such as `15min`, `1H`, `30s`, `2D` or a bare number of seconds
///
/// Zero and negative intervals parse successfully; range validation rejects them later
/// with a more specific error.
pub fn parse_interval(s: &str) -> Result<Duration> {
    let caps = interval_pattern()?
        .captures(s)
        .ok_or_else(|| AppError::Parse(format!("Invalid interval '{}'", s)))?;

    let amount: i64 = caps[1]
        .parse()
        .map_err(|e| AppError::Parse(format!("Invalid interval amount '{}': {}", &caps[1], e)))?;

    let unit_seconds: i64 = match caps[2].to_ascii_lowercase().as_str() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" | "t" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600,
        "d" | "day" | "days" => 86_400,
        other => {
            return Err(AppError::Parse(format!(
                "Unknown interval unit '{}' in '{}'",
                other, s
            )))
        }
    };

    seconds_to_duration(amount, unit_seconds)
        .ok_or_else(|| AppError::Parse(format!("Interval '{}' is out of range", s)))
}

pub(crate) fn seconds_to_duration(amount: i64, unit_seconds: i64) -> Option<Duration> {
    let seconds = amount.checked_mul(unit_seconds)?;
    // chrono caps durations at i64::MAX milliseconds
    if seconds.checked_abs()? > i64::MAX / 1_000 {
        return None;
    }
    Some(Duration::seconds(seconds))
}

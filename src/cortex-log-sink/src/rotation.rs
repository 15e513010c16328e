//! Mapping of event timestamps to daily buckets.
//!
//! A record lands in the file of the UTC calendar day its own `time` falls on,
//! regardless of when it reaches the sink or what timezone the host runs in.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::{Result, SinkError};

/// Date format used in file names.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A UTC calendar day plus the file extension of its log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayBucket {
    date: NaiveDate,
    extension: String,
}

impl DayBucket {
    /// Create a bucket for a calendar date.
    pub fn new(date: NaiveDate, extension: impl Into<String>) -> Self {
        Self {
            date,
            extension: extension.into(),
        }
    }

    /// Parse a bucket from a daily log file name such as `2024-01-11.log`.
    pub fn parse(file_name: &str) -> Result<Self> {
        let (date, ext) = file_name
            .split_once('.')
            .ok_or_else(|| SinkError::InvalidBucket(file_name.to_string()))?;
        if ext.is_empty() || ext.contains('.') {
            return Err(SinkError::InvalidBucket(file_name.to_string()));
        }
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
            .map_err(|_| SinkError::InvalidBucket(file_name.to_string()))?;
        Ok(Self::new(date, ext))
    }

    /// Calendar date of the bucket.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// File extension of the bucket's log.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// File name of the daily log, e.g. `2024-01-11.log`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.date.format(DATE_FORMAT), self.extension)
    }

    /// File name of the daily archive, e.g. `archive.2024-01-11.log.tar.gz`.
    pub fn archive_name(&self) -> String {
        format!(
            "{}{}{}",
            crate::config::ARCHIVE_PREFIX,
            self.file_name(),
            crate::config::ARCHIVE_SUFFIX
        )
    }

    /// Start of the bucket's day in UTC.
    pub fn midnight(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.date.and_time(chrono::NaiveTime::MIN))
    }
}

impl fmt::Display for DayBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Compute the bucket for a textual timestamp.
pub fn bucket_for(timestamp: &str, extension: &str) -> Result<DayBucket> {
    let instant = parse_timestamp(timestamp)?;
    Ok(bucket_for_instant(instant, extension))
}

/// Compute the bucket for an instant.
pub fn bucket_for_instant(instant: DateTime<Utc>, extension: &str) -> DayBucket {
    DayBucket::new(instant.date_naive(), extension)
}

/// Parse a record's `time` value into a UTC instant.
///
/// Strings are parsed with [`parse_timestamp`]; numbers are Unix epoch
/// milliseconds.
pub fn parse_event_time(value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => {
            let millis = n.as_i64().ok_or_else(|| SinkError::InvalidTimestamp {
                value: n.to_string(),
                reason: "epoch milliseconds must be an integer".to_string(),
            })?;
            DateTime::from_timestamp_millis(millis).ok_or_else(|| SinkError::InvalidTimestamp {
                value: n.to_string(),
                reason: "epoch milliseconds out of range".to_string(),
            })
        }
        Value::Null => Err(SinkError::MissingTimestamp),
        other => Err(SinkError::InvalidTimestamp {
            value: other.to_string(),
            reason: "expected a string or a number".to_string(),
        }),
    }
}

/// Parse a textual timestamp into a UTC instant.
///
/// Accepts RFC 3339 (`2024-01-10T23:30:00-02:00`), RFC 2822
/// (`Wed, 10 Jan 2024 23:30:00 -0200`), naive date-times
/// (`2024-01-10T23:30:00`, taken as UTC) and bare dates (`2024-01-10`,
/// UTC midnight).
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    match NaiveDate::parse_from_str(s, DATE_FORMAT) {
        Ok(date) => Ok(Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))),
        Err(e) => Err(SinkError::InvalidTimestamp {
            value: s.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_negative_offset_rolls_into_next_day() {
        let bucket = bucket_for("2024-01-10T23:30:00-02:00", "log").unwrap();
        assert_eq!(bucket.file_name(), "2024-01-11.log");
    }

    #[test]
    fn test_positive_offset_rolls_into_previous_day() {
        let bucket = bucket_for("2024-03-01T01:00:00+05:30", "log").unwrap();
        assert_eq!(bucket.file_name(), "2024-02-29.log");
    }

    #[test]
    fn test_rfc2822_timestamp() {
        let bucket = bucket_for("Wed, 10 Jan 2024 23:30:00 -0200", "log").unwrap();
        assert_eq!(bucket.file_name(), "2024-01-11.log");
    }

    #[test]
    fn test_naive_and_date_only() {
        assert_eq!(
            bucket_for("2024-05-06T10:00:00.250", "log").unwrap().file_name(),
            "2024-05-06.log"
        );
        assert_eq!(
            bucket_for("2024-05-06", "jsonl").unwrap().file_name(),
            "2024-05-06.jsonl"
        );
    }

    #[test]
    fn test_unparseable_timestamp() {
        let err = bucket_for("yesterday-ish", "log").unwrap_err();
        assert!(matches!(err, SinkError::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_event_time_epoch_millis() {
        // 2024-01-11T01:30:00Z
        let instant = parse_event_time(&json!(1_704_936_600_000i64)).unwrap();
        assert_eq!(bucket_for_instant(instant, "log").file_name(), "2024-01-11.log");
    }

    #[test]
    fn test_event_time_rejects_other_types() {
        assert!(matches!(
            parse_event_time(&Value::Null),
            Err(SinkError::MissingTimestamp)
        ));
        assert!(matches!(
            parse_event_time(&json!({"at": 1})),
            Err(SinkError::InvalidTimestamp { .. })
        ));
        assert!(matches!(
            parse_event_time(&json!(1.5)),
            Err(SinkError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_bucket_parse_and_names() {
        let bucket = DayBucket::parse("2024-02-06.log").unwrap();
        assert_eq!(bucket.date(), NaiveDate::from_ymd_opt(2024, 2, 6).unwrap());
        assert_eq!(bucket.extension(), "log");
        assert_eq!(bucket.archive_name(), "archive.2024-02-06.log.tar.gz");
        assert_eq!(bucket.midnight().to_rfc3339(), "2024-02-06T00:00:00+00:00");

        assert!(DayBucket::parse("archive.2024-02-06.log.tar.gz").is_err());
        assert!(DayBucket::parse("readme").is_err());
    }

    #[test]
    fn test_buckets_order_by_date() {
        let a = bucket_for("2024-01-01T00:00:00Z", "log").unwrap();
        let b = bucket_for("2023-12-31T23:59:59Z", "log").unwrap();
        assert!(b < a);
    }
}

//! Log records accepted by the sink.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::rotation::parse_event_time;

/// A pre-parsed log record: an event time plus an arbitrary JSON payload.
///
/// Serialized as a single JSON object with the payload fields next to `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Event time: RFC 3339 string or Unix epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Value>,

    /// Remaining fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl LogRecord {
    /// Create a record stamped with the given event time.
    pub fn new(time: impl Into<String>) -> Self {
        Self {
            time: Some(Value::String(time.into())),
            fields: Map::new(),
        }
    }

    /// Create a record with no event time.
    pub fn untimed() -> Self {
        Self {
            time: None,
            fields: Map::new(),
        }
    }

    /// Add a payload field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Build a record from a JSON object, taking `time` out of it.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Event time of the record, if present and non-null.
    pub fn event_time(&self) -> Option<Result<DateTime<Utc>>> {
        match &self.time {
            None | Some(Value::Null) => None,
            Some(v) => Some(parse_event_time(v)),
        }
    }

    /// Set `time` to the given instant.
    pub(crate) fn stamp(&mut self, at: DateTime<Utc>) {
        self.time = Some(Value::String(
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
        ));
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

//! Journal events.
//!
//! An [`Event`] is one parsed journal record: an ordered map of field name to
//! JSON value that always carries an `event` kind and a `timestamp`. The core
//! never interprets the remaining fields.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Field holding the event kind discriminator.
pub const KIND_FIELD: &str = "event";

/// Field holding the record timestamp.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Reasons a journal line cannot become an [`Event`].
#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    /// The line is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The line is valid JSON but not an object.
    #[error("record is not a JSON object")]
    NotAnObject,
    /// The object has no string `event` field.
    #[error("record has no string `event` field")]
    MissingKind,
    /// The object has a `timestamp` field that is not a string.
    #[error("record `timestamp` is not a string")]
    InvalidTimestamp,
}

/// One immutable journal record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    /// Parse a single journal line.
    ///
    /// Records without a `timestamp` are stamped with the current UTC time
    /// so every delivered event carries one.
    ///
    /// # Errors
    ///
    /// Returns [`EventParseError`] when the line is not a JSON object with a
    /// string `event` field.
    pub fn parse_line(line: &str) -> Result<Self, EventParseError> {
        let value: Value = serde_json::from_str(line)?;
        Self::from_value(value)
    }

    /// Build an event from an already decoded JSON value.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Event::parse_line`], minus JSON syntax.
    pub fn from_value(value: Value) -> Result<Self, EventParseError> {
        let Value::Object(mut fields) = value else {
            return Err(EventParseError::NotAnObject);
        };

        if !matches!(fields.get(KIND_FIELD), Some(Value::String(_))) {
            return Err(EventParseError::MissingKind);
        }

        match fields.get(TIMESTAMP_FIELD) {
            Some(Value::String(_)) => {}
            Some(_) => return Err(EventParseError::InvalidTimestamp),
            None => {
                let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                fields.insert(TIMESTAMP_FIELD.to_owned(), Value::String(now));
            }
        }

        Ok(Self { fields })
    }

    /// The event kind (value of the `event` field).
    pub fn kind(&self) -> &str {
        self.get_str(KIND_FIELD).unwrap_or_default()
    }

    /// The record timestamp as written in the journal.
    pub fn timestamp(&self) -> &str {
        self.get_str(TIMESTAMP_FIELD).unwrap_or_default()
    }

    /// Raw value of a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String value of a field, if present and a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// All fields in record order.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Fields other than the kind and timestamp, in record order.
    pub fn details(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields
            .iter()
            .filter(|(key, _)| key.as_str() != KIND_FIELD && key.as_str() != TIMESTAMP_FIELD)
    }

    /// Consume the event, returning the underlying JSON object.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl TryFrom<Value> for Event {
    type Error = EventParseError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

/// Multi-line console form: `[timestamp] kind` followed by one indented
/// `key: value` line per remaining field.
impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp(), self.kind())?;
        for (key, value) in self.details() {
            match value {
                Value::String(s) => write!(f, "\n  {key}: {s}")?,
                other => write!(f, "\n  {key}: {other}")?,
            }
        }
        Ok(())
    }
}

//! Attribute casts.
//!
//! A cast converts between the value stored in a model's attribute map
//! (whatever the driver returned, or what the caller set) and the typed
//! value handed out by [`Model::get`](crate::Model::get).
//!
//! Casts also define attribute equality for dirty tracking: two raw values
//! are equal when their cast forms are equal. Uncast attributes compare
//! with plain [`Value`] equality, so `Int(1)` and `String("1")` differ.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use quarry_query::{QueryError, QueryResult, Value};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
];

/// Target type of an attribute cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cast {
    /// 64-bit integer.
    Int,
    /// Double precision float.
    Float,
    /// Boolean, from integers and strings following SQL truthiness.
    Bool,
    /// Text.
    String,
    /// JSON document, decoded from text.
    Json,
    /// Calendar date.
    Date,
    /// Date and time.
    DateTime,
    /// Unix timestamp in seconds; stored as a datetime.
    Timestamp,
}

impl Cast {
    /// Parse a cast name (`int`, `integer`, `bool`, `json`, `array`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.trim().to_lowercase().as_str() {
            "int" | "integer" => Self::Int,
            "float" | "double" | "real" => Self::Float,
            "bool" | "boolean" => Self::Bool,
            "string" => Self::String,
            "json" | "array" | "object" => Self::Json,
            "date" => Self::Date,
            "datetime" => Self::DateTime,
            "timestamp" => Self::Timestamp,
            _ => return None,
        })
    }

    /// Convert a raw attribute value to the cast type. `Null` stays `Null`.
    pub fn get(&self, key: &str, value: &Value) -> QueryResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let invalid = || {
            QueryError::invalid_cast(key, format!("cannot cast {:?} to {:?}", value, self))
        };

        match self {
            Self::Int => match value {
                Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
                other => other.as_i64().map(Value::Int).ok_or_else(invalid),
            },
            Self::Float => value.as_f64().map(Value::Float).ok_or_else(invalid),
            Self::Bool => value.as_bool().map(Value::Bool).ok_or_else(invalid),
            Self::String => Ok(match value {
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            }),
            Self::Json => match value {
                Value::Json(j) => Ok(Value::Json(j.clone())),
                Value::String(s) => serde_json::from_str(s).map(Value::Json).map_err(|e| {
                    QueryError::invalid_cast(key, format!("invalid JSON: {}", e))
                }),
                other => Ok(Value::Json(other.to_json())),
            },
            Self::Date => to_datetime(value)
                .map(|dt| Value::Date(dt.date()))
                .ok_or_else(invalid),
            Self::DateTime => to_datetime(value).map(Value::DateTime).ok_or_else(invalid),
            Self::Timestamp => to_datetime(value)
                .map(|dt| Value::Int(dt.and_utc().timestamp()))
                .ok_or_else(invalid),
        }
    }

    /// Convert a value being assigned into the form kept in the attribute map.
    pub fn set(&self, key: &str, value: &Value) -> QueryResult<Value> {
        match self {
            Self::Timestamp => Self::DateTime.get(key, value),
            other => other.get(key, value),
        }
    }

    /// Whether two raw values are equal once cast.
    pub fn equivalent(&self, key: &str, a: &Value, b: &Value) -> bool {
        match (self.get(key, a), self.get(key, b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => a == b,
        }
    }
}

/// Interpret a value as a datetime: dates, datetimes, common text formats
/// and unix timestamps.
pub fn to_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::Date(d) => d.and_hms_opt(0, 0, 0),
        Value::Int(secs) => DateTime::from_timestamp(*secs, 0).map(|dt| dt.naive_utc()),
        Value::String(s) => {
            let s = s.trim();
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        _ => None,
    }
}

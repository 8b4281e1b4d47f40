//! Values bound to queries and returned in rows.
//!
//! ```rust
//! use quarry_query::{row, Value};
//!
//! let row = row! { "name" => "Ada", "age" => 36, "admin" => true };
//! assert_eq!(row["age"], Value::Int(36));
//! assert_eq!(row.keys().collect::<Vec<_>>(), vec!["name", "age", "admin"]);
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// A single database row: ordered column name to value mapping.
pub type Row = IndexMap<String, Value>;

/// A scalar value sent to or read from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// String value.
    String(String),
    /// JSON document.
    Json(serde_json::Value),
    /// Calendar date.
    Date(NaiveDate),
    /// Date and time without a zone (stored as UTC).
    DateTime(NaiveDateTime),
}

/// Hashable projection of a [`Value`], used to match keys across result sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    /// Integral key (booleans and whole floats collapse here).
    Int(i64),
    /// Any other key, compared by its textual form.
    Text(String),
}

impl Value {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view of the value, if it has one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(*b as i64),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Float view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String slice, only for string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness following SQL conventions (`0`, `""`, `"0"`, `"false"` are false).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            Self::Float(f) => Some(*f != 0.0),
            Self::String(s) => Some(!matches!(s.as_str(), "" | "0" | "false" | "FALSE")),
            Self::Json(j) => Some(!j.is_null()),
            Self::Date(_) | Self::DateTime(_) => Some(true),
        }
    }

    /// Whether the value is numeric (int or float).
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Key used to group and match rows by a column value.
    ///
    /// Returns `None` for nulls, which never match anything.
    pub fn as_key(&self) -> Option<KeyValue> {
        match self {
            Self::Null => None,
            Self::Int(i) => Some(KeyValue::Int(*i)),
            Self::Bool(b) => Some(KeyValue::Int(*b as i64)),
            Self::Float(f) if f.fract() == 0.0 => Some(KeyValue::Int(*f as i64)),
            Self::String(s) => match s.parse::<i64>() {
                Ok(i) if i.to_string() == *s => Some(KeyValue::Int(i)),
                _ => Some(KeyValue::Text(s.clone())),
            },
            other => Some(KeyValue::Text(other.to_string())),
        }
    }

    /// Convert into a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Json(j) => j.clone(),
            Self::Date(_) | Self::DateTime(_) => serde_json::Value::String(self.to_string()),
        }
    }

    /// Build a value from a JSON document, keeping scalars as scalars.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            serde_json::Value::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "{}", s),
            Self::Json(j) => write!(f, "{}", j),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<KeyValue> for Value {
    fn from(key: KeyValue) -> Self {
        match key {
            KeyValue::Int(i) => Self::Int(i),
            KeyValue::Text(s) => Self::String(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Value {
    fn from(v: DateTime<Tz>) -> Self {
        Self::DateTime(v.naive_utc())
    }
}

impl From<&Value> for Value {
    fn from(v: &Value) -> Self {
        v.clone()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

/// Build a [`Row`] from `key => value` pairs, preserving order.
#[macro_export]
macro_rules! row {
    () => {
        $crate::Row::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut row = $crate::Row::new();
        $(
            row.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        row
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_key_collapses_numeric_forms() {
        assert_eq!(Value::Int(3).as_key(), Some(KeyValue::Int(3)));
        assert_eq!(Value::Float(3.0).as_key(), Some(KeyValue::Int(3)));
        assert_eq!(Value::from("3").as_key(), Some(KeyValue::Int(3)));
        assert_eq!(Value::from("03").as_key(), Some(KeyValue::Text("03".into())));
        assert_eq!(Value::Null.as_key(), None);
    }

    #[test]
    fn test_truthiness() {
        assert_eq!(Value::Int(0).as_bool(), Some(false));
        assert_eq!(Value::from("0").as_bool(), Some(false));
        assert_eq!(Value::from("yes").as_bool(), Some(true));
        assert_eq!(Value::Null.as_bool(), None);
    }

    #[test]
    fn test_json_conversion() {
        let value = Value::from_json(serde_json::json!(42));
        assert_eq!(value, Value::Int(42));

        let doc = Value::from_json(serde_json::json!({"a": 1}));
        assert!(matches!(doc, Value::Json(_)));
        assert_eq!(doc.to_json(), serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_display_dates() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .map(Value::DateTime);
        assert_eq!(dt.map(|v| v.to_string()), Some("2024-01-02 03:04:05".to_string()));
    }

    #[test]
    fn test_row_macro_preserves_order() {
        let row = row! { "b" => 1, "a" => Value::Null };
        let keys: Vec<&String> = row.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(row["a"], Value::Null);
    }
}

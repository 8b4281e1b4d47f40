//! Type conversion between [`quarry_query::Value`] and SQLite values.

use rusqlite::types::{Value as SqliteValue, ValueRef};

use quarry_query::{Row, Value};

/// Convert a bound value to a SQLite value.
///
/// Booleans become integers; dates, datetimes and JSON documents become
/// text in the formats the grammar and casts expect.
pub fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Int(i) => SqliteValue::Integer(*i),
        Value::Float(f) => SqliteValue::Real(*f),
        Value::String(s) => SqliteValue::Text(s.clone()),
        Value::Json(j) => SqliteValue::Text(j.to_string()),
        Value::Date(_) | Value::DateTime(_) => SqliteValue::Text(value.to_string()),
    }
}

/// Convert a column value read from SQLite.
///
/// Text is returned as-is; interpreting it as JSON or a date is left to
/// model casts.
pub fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Json(serde_json::Value::Array(
                bytes.iter().map(|b| serde_json::Value::from(*b)).collect(),
            )),
        },
    }
}

/// Read every column of `row` into a [`Row`].
pub fn read_row(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Row> {
    let mut out = Row::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        out.insert(column.clone(), from_sqlite(row.get_ref(index)?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_to_sqlite_scalars() {
        assert_eq!(to_sqlite(&Value::Null), SqliteValue::Null);
        assert_eq!(to_sqlite(&Value::Bool(true)), SqliteValue::Integer(1));
        assert_eq!(to_sqlite(&Value::Bool(false)), SqliteValue::Integer(0));
        assert_eq!(to_sqlite(&Value::Float(1.5)), SqliteValue::Real(1.5));
    }

    #[test]
    fn test_to_sqlite_text_forms() {
        let json = Value::Json(serde_json::json!({"a": [1, 2]}));
        assert_eq!(to_sqlite(&json), SqliteValue::Text(r#"{"a":[1,2]}"#.into()));

        let date = NaiveDate::from_ymd_opt(2024, 2, 29).map(Value::Date).unwrap_or_default();
        assert_eq!(to_sqlite(&date), SqliteValue::Text("2024-02-29".into()));
    }

    #[test]
    fn test_from_sqlite() {
        assert_eq!(from_sqlite(ValueRef::Integer(7)), Value::Int(7));
        assert_eq!(from_sqlite(ValueRef::Text(b"{\"a\":1}")), Value::from("{\"a\":1}"));
        assert_eq!(
            from_sqlite(ValueRef::Blob(&[0xff, 0x00])),
            Value::Json(serde_json::json!([255, 0]))
        );
    }
}

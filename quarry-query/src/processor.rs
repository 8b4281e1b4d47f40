//! Post-processing of raw driver results.

use std::fmt;

use crate::ast::Query;
use crate::connection::Connection;
use crate::error::QueryResult;
use crate::value::{Row, Value};

/// Turns raw driver results into builder results.
pub trait Processor: fmt::Debug {
    /// Rows returned by a select.
    fn process_select(&self, _query: &Query, rows: Vec<Row>) -> Vec<Row> {
        rows
    }

    /// Run an insert and return the generated primary key.
    fn process_insert_get_id(
        &self,
        connection: &Connection,
        sql: &str,
        bindings: &[Value],
        _sequence: Option<&str>,
    ) -> QueryResult<Value> {
        let result = connection.insert(sql, bindings)?;
        Ok(result.last_insert_id.map(Value::Int).unwrap_or(Value::Null))
    }

    /// Column names out of a column listing query.
    fn process_column_listing(&self, rows: Vec<Row>) -> Vec<String> {
        rows.into_iter()
            .filter_map(|row| {
                row.get("name")
                    .or_else(|| row.get("column_name"))
                    .and_then(|v| v.as_str().map(str::to_string))
            })
            .collect()
    }
}

/// Processor with the default behaviour for every hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProcessor;

impl Processor for DefaultProcessor {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn test_column_listing_reads_name_column() {
        let rows = vec![
            row! { "cid" => 0, "name" => "id" },
            row! { "cid" => 1, "name" => "email" },
        ];
        assert_eq!(DefaultProcessor.process_column_listing(rows), vec!["id", "email"]);
    }
}

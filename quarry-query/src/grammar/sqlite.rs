//! SQLite dialect.

use super::Grammar;
use crate::ast::{Assignments, Query};
use crate::error::{QueryError, QueryResult};
use crate::value::Value;

const OPERATORS: &[&str] = &[
    "=", "<", ">", "<=", ">=", "<>", "!=", "like", "not like", "glob", "not glob", "ilike",
    "is", "is not", "&", "|", "<<", ">>",
];

/// Grammar for SQLite: double-quoted identifiers, `?` placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteGrammar;

impl SqliteGrammar {
    /// Create the grammar.
    pub fn new() -> Self {
        Self
    }
}

impl Grammar for SqliteGrammar {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn operators(&self) -> &[&'static str] {
        OPERATORS
    }

    fn wrap_value(&self, segment: &str) -> String {
        if segment == "*" {
            return segment.to_string();
        }
        format!("\"{}\"", segment.replace('"', "\"\""))
    }

    // SQLite rejects OFFSET without LIMIT.
    fn compile_limit(&self, query: &Query) -> String {
        match (query.limit, query.offset) {
            (Some(limit), _) => format!("LIMIT {}", limit),
            (None, Some(_)) => "LIMIT -1".to_string(),
            (None, None) => String::new(),
        }
    }

    fn compile_update(&self, query: &Query, values: &Assignments) -> QueryResult<String> {
        if !query.joins.is_empty() {
            return Err(QueryError::unsupported(
                "UPDATE with joins is not supported by the SQLite grammar",
            ));
        }
        self.validate(query)?;
        if values.is_empty() {
            return Err(QueryError::invalid_query("UPDATE requires at least one column"));
        }
        let table = query
            .table_name()
            .ok_or_else(|| QueryError::invalid_query("UPDATE requires a plain table source"))?;

        let sets: Vec<String> = values
            .iter()
            .map(|(column, assignment)| match assignment {
                crate::ast::Assignment::Value(_) => format!("{} = ?", self.wrap(column)),
                crate::ast::Assignment::Raw(expr) => format!("{} = {}", self.wrap(column), expr.sql()),
            })
            .collect();

        let wheres = self.compile_wheres(query);
        let mut sql = format!("UPDATE {} SET {}", self.wrap_table(table), sets.join(", "));
        if !wheres.is_empty() {
            sql.push(' ');
            sql.push_str(&wheres);
        }
        Ok(sql)
    }

    fn compile_truncate(&self, query: &Query) -> QueryResult<Vec<(String, Vec<Value>)>> {
        let table = query
            .table_name()
            .ok_or_else(|| QueryError::invalid_query("TRUNCATE requires a plain table source"))?;
        Ok(vec![
            (
                "DELETE FROM sqlite_sequence WHERE name = ?".to_string(),
                vec![Value::from(table)],
            ),
            (format!("DELETE FROM {}", self.wrap_table(table)), Vec::new()),
        ])
    }
}

//! An in-memory driver that records statements instead of running them.
//!
//! Useful for asserting the SQL a piece of code produces, or how many
//! round trips it makes, without a database.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::{Driver, ExecuteResult};
use crate::error::DriverError;
use crate::grammar::{Grammar, SqliteGrammar};
use crate::schema::{SchemaGrammar, SqliteSchemaGrammar};
use crate::value::{Row, Value};

/// Shared handle on the statements a [`RecordingDriver`] has seen.
#[derive(Debug, Clone, Default)]
pub struct StatementLog {
    entries: Rc<RefCell<Vec<(String, Vec<Value>)>>>,
}

impl StatementLog {
    /// SQL of every recorded statement, in order.
    pub fn statements(&self) -> Vec<String> {
        self.entries.borrow().iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Statements with their bindings.
    pub fn entries(&self) -> Vec<(String, Vec<Value>)> {
        self.entries.borrow().clone()
    }

    /// Number of recorded statements.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Forget recorded statements.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    fn push(&self, sql: &str, bindings: &[Value]) {
        self.entries.borrow_mut().push((sql.to_string(), bindings.to_vec()));
    }
}

/// Driver that records every statement and answers selects from a script.
///
/// Selects pop the next queued result set; once the queue is empty they
/// return the default rows. Writes report one affected row and an
/// incrementing insert id.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    log: StatementLog,
    queued: RefCell<VecDeque<Vec<Row>>>,
    default_rows: Vec<Row>,
    fail_prefix: Option<String>,
    next_id: Cell<i64>,
}

impl RecordingDriver {
    /// A driver returning no rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned by every select once the queue is drained.
    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.default_rows = rows;
        self
    }

    /// Queue a result set for the next unanswered select.
    pub fn queue_rows(self, rows: Vec<Row>) -> Self {
        self.queued.borrow_mut().push_back(rows);
        self
    }

    /// Fail every statement whose SQL starts with `prefix`.
    pub fn fail_on(mut self, prefix: impl Into<String>) -> Self {
        self.fail_prefix = Some(prefix.into());
        self
    }

    /// Handle on the recorded statements.
    pub fn log(&self) -> StatementLog {
        self.log.clone()
    }

    fn check(&self, sql: &str) -> Result<(), DriverError> {
        match &self.fail_prefix {
            Some(prefix) if sql.starts_with(prefix.as_str()) => {
                Err(format!("statement rejected by recording driver: {}", sql).into())
            }
            _ => Ok(()),
        }
    }
}

impl Driver for RecordingDriver {
    fn name(&self) -> &str {
        "recording"
    }

    fn query_grammar(&self) -> Box<dyn Grammar> {
        Box::new(SqliteGrammar::new())
    }

    fn schema_grammar(&self) -> Box<dyn SchemaGrammar> {
        Box::new(SqliteSchemaGrammar::new())
    }

    fn select(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.log.push(sql, bindings);
        self.check(sql)?;
        Ok(self
            .queued
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.default_rows.clone()))
    }

    fn execute(&self, sql: &str, bindings: &[Value]) -> Result<ExecuteResult, DriverError> {
        self.log.push(sql, bindings);
        self.check(sql)?;
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        Ok(ExecuteResult {
            rows_affected: 1,
            last_insert_id: Some(id),
        })
    }

    fn execute_batch(&self, sql: &str) -> Result<(), DriverError> {
        self.log.push(sql, &[]);
        self.check(sql)
    }
}

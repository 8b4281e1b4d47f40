//! Connections: run compiled SQL through a [`Driver`].
//!
//! A [`Connection`] owns one driver together with the grammars and processor
//! that go with it. It adds what every driver needs and none should
//! re-implement: structured logging of every statement, an optional
//! in-memory query log, conversion of driver failures into
//! [`QueryError`]s carrying the failing SQL, and a nested transaction
//! counter where only the outermost level reaches the database.
//!
//! ```rust
//! use quarry_query::connection::{testing::RecordingDriver, Connection};
//! use quarry_query::row;
//!
//! let driver = RecordingDriver::new().with_rows(vec![row! { "id" => 1 }]);
//! let conn = Connection::new("test", driver);
//!
//! let rows = conn.table("users").where_eq("active", true).get().unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

mod manager;
pub mod testing;

pub use manager::{ConnectionResolver, Connector, DatabaseManager};

use std::cell::{Cell, Ref, RefCell};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::builder::QueryBuilder;
use crate::error::{DriverError, QueryError, QueryResult};
use crate::grammar::Grammar;
use crate::processor::{DefaultProcessor, Processor};
use crate::schema::{SchemaBuilder, SchemaGrammar};
use crate::value::{Row, Value};

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecuteResult {
    /// Rows changed by the statement.
    pub rows_affected: u64,
    /// Row id generated by an insert, when the driver reports one.
    pub last_insert_id: Option<i64>,
}

/// A database driver: the boundary to the actual database.
pub trait Driver {
    /// Driver name, e.g. `"sqlite"`.
    fn name(&self) -> &str;

    /// Grammar for queries sent through this driver.
    fn query_grammar(&self) -> Box<dyn Grammar>;

    /// Grammar for DDL sent through this driver.
    fn schema_grammar(&self) -> Box<dyn SchemaGrammar>;

    /// Result processor.
    fn processor(&self) -> Box<dyn Processor> {
        Box::new(DefaultProcessor)
    }

    /// Run a statement returning rows.
    fn select(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>, DriverError>;

    /// Run a statement that does not return rows.
    fn execute(&self, sql: &str, bindings: &[Value]) -> Result<ExecuteResult, DriverError>;

    /// Run one or more unparameterized statements.
    fn execute_batch(&self, sql: &str) -> Result<(), DriverError>;

    /// Start a real transaction.
    fn begin(&self) -> Result<(), DriverError> {
        self.execute_batch("BEGIN")
    }

    /// Commit the real transaction.
    fn commit(&self) -> Result<(), DriverError> {
        self.execute_batch("COMMIT")
    }

    /// Roll back the real transaction.
    fn rollback(&self) -> Result<(), DriverError> {
        self.execute_batch("ROLLBACK")
    }
}

/// A statement recorded in the query log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedQuery {
    /// SQL text.
    pub sql: String,
    /// Bound values.
    pub bindings: Vec<Value>,
    /// Wall time spent in the driver.
    pub elapsed: Duration,
}

/// A named database connection.
pub struct Connection {
    name: String,
    driver: Box<dyn Driver>,
    grammar: Box<dyn Grammar>,
    schema_grammar: Box<dyn SchemaGrammar>,
    processor: Box<dyn Processor>,
    transactions: Cell<u32>,
    logging_queries: Cell<bool>,
    query_log: RefCell<Vec<LoggedQuery>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("driver", &self.driver.name())
            .field("transactions", &self.transactions.get())
            .finish()
    }
}

impl Connection {
    /// Wrap a driver, taking grammars and processor from it.
    pub fn new(name: impl Into<String>, driver: impl Driver + 'static) -> Self {
        let grammar = driver.query_grammar();
        let schema_grammar = driver.schema_grammar();
        let processor = driver.processor();
        Self {
            name: name.into(),
            driver: Box::new(driver),
            grammar,
            schema_grammar,
            processor,
            transactions: Cell::new(0),
            logging_queries: Cell::new(false),
            query_log: RefCell::new(Vec::new()),
        }
    }

    /// Replace the query grammar.
    pub fn with_query_grammar(mut self, grammar: impl Grammar + 'static) -> Self {
        self.grammar = Box::new(grammar);
        self
    }

    /// Connection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the underlying driver.
    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Grammar used to compile queries.
    pub fn query_grammar(&self) -> &dyn Grammar {
        self.grammar.as_ref()
    }

    /// Grammar used to compile DDL.
    pub fn schema_grammar(&self) -> &dyn SchemaGrammar {
        self.schema_grammar.as_ref()
    }

    /// Result processor.
    pub fn processor(&self) -> &dyn Processor {
        self.processor.as_ref()
    }

    /// A fresh query builder without a source table.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// A query builder selecting from `table`.
    pub fn table(&self, table: impl Into<String>) -> QueryBuilder<'_> {
        QueryBuilder::new(self).from(table)
    }

    /// Schema builder bound to this connection.
    pub fn schema_builder(&self) -> SchemaBuilder<'_> {
        SchemaBuilder::new(self)
    }

    // ============== Statements ==============

    /// Run a select and return its rows.
    pub fn select(&self, sql: &str, bindings: &[Value]) -> QueryResult<Vec<Row>> {
        self.run(sql, bindings, |driver| driver.select(sql, bindings))
    }

    /// Run a select and return its first row.
    pub fn select_one(&self, sql: &str, bindings: &[Value]) -> QueryResult<Option<Row>> {
        Ok(self.select(sql, bindings)?.into_iter().next())
    }

    /// Run an insert.
    pub fn insert(&self, sql: &str, bindings: &[Value]) -> QueryResult<ExecuteResult> {
        self.run(sql, bindings, |driver| driver.execute(sql, bindings))
    }

    /// Run an update and return the number of affected rows.
    pub fn update(&self, sql: &str, bindings: &[Value]) -> QueryResult<u64> {
        self.affecting_statement(sql, bindings)
    }

    /// Run a delete and return the number of affected rows.
    pub fn delete(&self, sql: &str, bindings: &[Value]) -> QueryResult<u64> {
        self.affecting_statement(sql, bindings)
    }

    /// Run any statement.
    pub fn statement(&self, sql: &str, bindings: &[Value]) -> QueryResult<bool> {
        self.run(sql, bindings, |driver| driver.execute(sql, bindings))
            .map(|_| true)
    }

    /// Run a statement and return the number of affected rows.
    pub fn affecting_statement(&self, sql: &str, bindings: &[Value]) -> QueryResult<u64> {
        self.run(sql, bindings, |driver| driver.execute(sql, bindings))
            .map(|result| result.rows_affected)
    }

    /// Run raw SQL without bindings; may contain several statements.
    pub fn unprepared(&self, sql: &str) -> QueryResult<bool> {
        self.run(sql, &[], |driver| driver.execute_batch(sql)).map(|_| true)
    }

    fn run<T>(
        &self,
        sql: &str,
        bindings: &[Value],
        f: impl FnOnce(&dyn Driver) -> Result<T, DriverError>,
    ) -> QueryResult<T> {
        let start = Instant::now();
        let result = f(self.driver.as_ref());
        let elapsed = start.elapsed();

        debug!(
            connection = %self.name,
            sql = %sql,
            bindings = bindings.len(),
            elapsed_us = elapsed.as_micros() as u64,
            ok = result.is_ok(),
            "query executed"
        );

        if self.logging_queries.get() {
            self.query_log.borrow_mut().push(LoggedQuery {
                sql: sql.to_string(),
                bindings: bindings.to_vec(),
                elapsed,
            });
        }

        result.map_err(|source| QueryError::execution(sql, bindings, source))
    }

    // ============== Transactions ==============

    /// Current nesting depth; `0` outside any transaction.
    pub fn transaction_level(&self) -> u32 {
        self.transactions.get()
    }

    /// Enter a transaction level; only the outermost begins a real one.
    pub fn begin_transaction(&self) -> QueryResult<()> {
        let level = self.transactions.get();
        if level == 0 {
            self.driver.begin().map_err(|e| {
                QueryError::transaction(format!("failed to begin transaction: {}", e))
            })?;
        }
        self.transactions.set(level + 1);
        debug!(connection = %self.name, level = level + 1, "transaction begin");
        Ok(())
    }

    /// Leave a transaction level; only the outermost commits.
    pub fn commit(&self) -> QueryResult<()> {
        let level = self.transactions.get();
        if level == 0 {
            return Ok(());
        }
        self.transactions.set(level - 1);
        if level == 1 {
            if let Err(e) = self.driver.commit() {
                if let Err(rollback) = self.driver.rollback() {
                    warn!(connection = %self.name, error = %rollback, "rollback after failed commit failed");
                }
                return Err(QueryError::transaction(format!("failed to commit transaction: {}", e)));
            }
        }
        debug!(connection = %self.name, level = level - 1, "transaction commit");
        Ok(())
    }

    /// Leave a transaction level; only the outermost rolls back.
    pub fn rollback(&self) -> QueryResult<()> {
        let level = self.transactions.get();
        if level == 0 {
            return Ok(());
        }
        self.transactions.set(level - 1);
        if level == 1 {
            self.driver.rollback().map_err(|e| {
                QueryError::transaction(format!("failed to roll back transaction: {}", e))
            })?;
        }
        debug!(connection = %self.name, level = level - 1, "transaction rollback");
        Ok(())
    }

    /// Run `f` inside a transaction, rolling back if it fails.
    pub fn transaction<T, F>(&self, f: F) -> QueryResult<T>
    where
        F: FnMut(&Connection) -> QueryResult<T>,
    {
        self.transaction_with_attempts(1, f)
    }

    /// Run `f` inside a transaction, retrying the whole callback up to
    /// `attempts` times when it fails with an execution error.
    ///
    /// Compilation, guard and lookup errors are returned immediately.
    /// Retries only happen at the outermost level; a nested call hands the
    /// error to its enclosing transaction instead.
    pub fn transaction_with_attempts<T, F>(&self, attempts: u32, mut f: F) -> QueryResult<T>
    where
        F: FnMut(&Connection) -> QueryResult<T>,
    {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            self.begin_transaction()?;
            match f(self) {
                Ok(value) => {
                    self.commit()?;
                    return Ok(value);
                }
                Err(err) => {
                    if let Err(rollback) = self.rollback() {
                        warn!(connection = %self.name, error = %rollback, "rollback failed");
                        return Err(err);
                    }
                    let retry = err.is_execution() && attempt < attempts && self.transactions.get() == 0;
                    if !retry {
                        return Err(err);
                    }
                    warn!(connection = %self.name, attempt, error = %err, "retrying transaction");
                    attempt += 1;
                }
            }
        }
    }

    // ============== Query Log ==============

    /// Start recording executed statements.
    pub fn enable_query_log(&self) {
        self.logging_queries.set(true);
    }

    /// Stop recording executed statements.
    pub fn disable_query_log(&self) {
        self.logging_queries.set(false);
    }

    /// Whether statements are being recorded.
    pub fn logging(&self) -> bool {
        self.logging_queries.get()
    }

    /// Recorded statements.
    pub fn query_log(&self) -> Ref<'_, Vec<LoggedQuery>> {
        self.query_log.borrow()
    }

    /// Clear recorded statements.
    pub fn flush_query_log(&self) {
        self.query_log.borrow_mut().clear();
    }
}

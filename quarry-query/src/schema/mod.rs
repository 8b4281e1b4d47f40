//! Schema builder: create, alter and inspect tables.
//!
//! ```rust
//! use quarry_query::connection::{testing::RecordingDriver, Connection};
//!
//! let driver = RecordingDriver::new();
//! let log = driver.log();
//! let conn = Connection::new("test", driver);
//!
//! conn.schema_builder()
//!     .create("users", |table| {
//!         table.id();
//!         table.string("email").unique();
//!         table.timestamps();
//!     })
//!     .unwrap();
//!
//! assert_eq!(log.len(), 1);
//! assert!(log.statements()[0].starts_with(r#"CREATE TABLE "users""#));
//! ```

mod blueprint;
mod grammar;

pub use blueprint::{
    Blueprint, ColumnDefault, ColumnDefinition, ColumnType, Command, ForeignKeyDefinition,
    IndexDefinition,
};
pub use grammar::{SchemaGrammar, SqliteSchemaGrammar};

use std::cell::RefCell;

use tracing::debug;

use crate::connection::Connection;
use crate::error::QueryResult;
use crate::value::Value;

/// Runs blueprints against a connection.
///
/// A pretending builder records the DDL it would run instead of running it;
/// inspection queries such as [`SchemaBuilder::has_table`] still execute.
#[derive(Debug)]
pub struct SchemaBuilder<'c> {
    connection: &'c Connection,
    pretending: bool,
    pretended: RefCell<Vec<String>>,
}

impl<'c> SchemaBuilder<'c> {
    /// A builder on `connection`.
    pub fn new(connection: &'c Connection) -> Self {
        Self {
            connection,
            pretending: false,
            pretended: RefCell::new(Vec::new()),
        }
    }

    /// A builder that records DDL instead of executing it.
    pub fn pretending(connection: &'c Connection) -> Self {
        Self {
            pretending: true,
            ..Self::new(connection)
        }
    }

    /// The connection.
    pub fn connection(&self) -> &'c Connection {
        self.connection
    }

    /// Whether DDL is recorded instead of executed.
    pub fn is_pretending(&self) -> bool {
        self.pretending
    }

    /// Take the statements recorded while pretending.
    pub fn take_pretended(&self) -> Vec<String> {
        std::mem::take(&mut *self.pretended.borrow_mut())
    }

    fn grammar(&self) -> &'c dyn SchemaGrammar {
        self.connection.schema_grammar()
    }

    /// Compile and run a blueprint.
    pub fn build(&self, blueprint: &Blueprint) -> QueryResult<()> {
        let statements = blueprint.to_sql(self.grammar())?;
        debug!(table = %blueprint.table(), statements = statements.len(), "schema build");
        for sql in statements {
            self.run(&sql)?;
        }
        Ok(())
    }

    fn run(&self, sql: &str) -> QueryResult<()> {
        if self.pretending {
            self.pretended.borrow_mut().push(sql.to_string());
            return Ok(());
        }
        self.connection.statement(sql, &[])?;
        Ok(())
    }

    /// Create `table`.
    pub fn create(&self, table: impl Into<String>, f: impl FnOnce(&mut Blueprint)) -> QueryResult<()> {
        let mut blueprint = Blueprint::create(table);
        f(&mut blueprint);
        self.build(&blueprint)
    }

    /// Alter `table`.
    pub fn table(&self, table: impl Into<String>, f: impl FnOnce(&mut Blueprint)) -> QueryResult<()> {
        let mut blueprint = Blueprint::alter(table);
        f(&mut blueprint);
        self.build(&blueprint)
    }

    /// Drop `table`.
    pub fn drop(&self, table: impl Into<String>) -> QueryResult<()> {
        let mut blueprint = Blueprint::alter(table);
        blueprint.drop();
        self.build(&blueprint)
    }

    /// Drop `table` if it exists.
    pub fn drop_if_exists(&self, table: impl Into<String>) -> QueryResult<()> {
        let mut blueprint = Blueprint::alter(table);
        blueprint.drop_if_exists();
        self.build(&blueprint)
    }

    /// Rename `from` to `to`.
    pub fn rename(&self, from: impl Into<String>, to: impl Into<String>) -> QueryResult<()> {
        let mut blueprint = Blueprint::alter(from);
        blueprint.rename(to);
        self.build(&blueprint)
    }

    /// Whether `table` exists.
    pub fn has_table(&self, table: &str) -> QueryResult<bool> {
        let sql = self.grammar().compile_table_exists();
        Ok(!self.connection.select(&sql, &[Value::from(table)])?.is_empty())
    }

    /// Whether `table` has `column` (case-insensitive).
    pub fn has_column(&self, table: &str, column: &str) -> QueryResult<bool> {
        Ok(self
            .get_column_listing(table)?
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column)))
    }

    /// Whether `table` has every column in `columns`.
    pub fn has_columns(&self, table: &str, columns: &[&str]) -> QueryResult<bool> {
        let listing = self.get_column_listing(table)?;
        Ok(columns
            .iter()
            .all(|wanted| listing.iter().any(|c| c.eq_ignore_ascii_case(wanted))))
    }

    /// Column names of `table`, in table order.
    pub fn get_column_listing(&self, table: &str) -> QueryResult<Vec<String>> {
        let sql = self.grammar().compile_column_listing(table);
        let rows = self.connection.select(&sql, &[])?;
        Ok(self.connection.processor().process_column_listing(rows))
    }

    /// Names of all user tables.
    pub fn get_tables(&self) -> QueryResult<Vec<String>> {
        let sql = self.grammar().compile_tables();
        let rows = self.connection.select(&sql, &[])?;
        Ok(self.connection.processor().process_column_listing(rows))
    }

    /// Drop every user table, with foreign key checks off.
    pub fn drop_all_tables(&self) -> QueryResult<()> {
        let tables = self.get_tables()?;
        self.disable_foreign_key_constraints()?;
        for table in &tables {
            self.drop_if_exists(table.as_str())?;
        }
        self.enable_foreign_key_constraints()?;
        debug!(tables = tables.len(), "dropped all tables");
        Ok(())
    }

    /// Turn foreign key enforcement on.
    pub fn enable_foreign_key_constraints(&self) -> QueryResult<()> {
        let sql = self.grammar().compile_enable_foreign_key_constraints();
        self.run(&sql)
    }

    /// Turn foreign key enforcement off.
    pub fn disable_foreign_key_constraints(&self) -> QueryResult<()> {
        let sql = self.grammar().compile_disable_foreign_key_constraints();
        self.run(&sql)
    }

    /// Run `f` with foreign key enforcement off.
    pub fn without_foreign_key_constraints<T>(&self, f: impl FnOnce(&Self) -> QueryResult<T>) -> QueryResult<T> {
        self.disable_foreign_key_constraints()?;
        let result = f(self);
        self.enable_foreign_key_constraints()?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::RecordingDriver;
    use crate::row;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_has_table_binds_name() {
        let driver = RecordingDriver::new().with_rows(vec![row! { "name" => "users" }]);
        let log = driver.log();
        let conn = Connection::new("test", driver);

        assert!(conn.schema_builder().has_table("users").unwrap());
        assert_eq!(
            log.entries(),
            vec![(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?".to_string(),
                vec![Value::from("users")],
            )]
        );
    }

    #[test]
    fn test_column_listing() {
        let driver = RecordingDriver::new().with_rows(vec![
            row! { "cid" => 0, "name" => "id" },
            row! { "cid" => 1, "name" => "Email" },
        ]);
        let conn = Connection::new("test", driver);
        let schema = conn.schema_builder();

        assert_eq!(schema.get_column_listing("users").unwrap(), vec!["id", "Email"]);
        assert!(schema.has_column("users", "email").unwrap());
        assert!(!schema.has_columns("users", &["id", "name"]).unwrap());
    }

    #[test]
    fn test_pretending_records_instead_of_running() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);

        let schema = SchemaBuilder::pretending(&conn);
        schema.create("flags", |t| {
            t.increments("id");
            t.string("name");
        })
        .unwrap();
        schema.drop("legacy").unwrap();

        assert!(log.is_empty());
        assert_eq!(
            schema.take_pretended(),
            vec![
                r#"CREATE TABLE "flags" ("id" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, "name" VARCHAR NOT NULL)"#,
                r#"DROP TABLE "legacy""#,
            ]
        );
    }

    #[test]
    fn test_drop_all_tables_toggles_foreign_keys() {
        let driver = RecordingDriver::new()
            .queue_rows(vec![row! { "name" => "posts" }, row! { "name" => "users" }]);
        let log = driver.log();
        let conn = Connection::new("test", driver);

        conn.schema_builder().drop_all_tables().unwrap();
        let statements = log.statements();
        assert_eq!(
            statements[1..],
            [
                "PRAGMA foreign_keys = OFF",
                r#"DROP TABLE IF EXISTS "posts""#,
                r#"DROP TABLE IF EXISTS "users""#,
                "PRAGMA foreign_keys = ON",
            ]
        );
    }
}

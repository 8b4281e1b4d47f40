//! The rusqlite-backed [`Driver`].

use rusqlite::params_from_iter;
use tracing::{debug, info};

use quarry_query::connection::{Driver, ExecuteResult};
use quarry_query::grammar::{Grammar, SqliteGrammar};
use quarry_query::schema::{SchemaGrammar, SqliteSchemaGrammar};
use quarry_query::{Connection, ConnectionConfig, DriverError, QueryResult, Row, Value};

use crate::config::{DatabasePath, SqliteConfig};
use crate::error::{SqliteError, SqliteResult};
use crate::types::{read_row, to_sqlite};

/// A single SQLite database handle.
///
/// Statements are prepared through rusqlite's statement cache, so running
/// the same compiled SQL repeatedly only parses it once.
#[derive(Debug)]
pub struct SqliteDriver {
    conn: rusqlite::Connection,
    config: SqliteConfig,
}

impl SqliteDriver {
    /// Open the database described by `config` and apply its pragmas.
    pub fn open(config: SqliteConfig) -> SqliteResult<Self> {
        let conn = match &config.path {
            DatabasePath::Memory => rusqlite::Connection::open_in_memory()?,
            DatabasePath::File(path) => rusqlite::Connection::open(path)?,
        };

        conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
        conn.pragma_update(None, "synchronous", config.synchronous.as_pragma())?;
        if let Some(timeout) = config.busy_timeout() {
            conn.busy_timeout(timeout)?;
        }
        if !config.path.is_memory() {
            let mode: String = conn.pragma_update_and_check(
                None,
                "journal_mode",
                config.journal_mode.as_pragma(),
                |row| row.get(0),
            )?;
            debug!(journal_mode = %mode, "journal mode set");
        }

        info!(path = %config.path.display(), foreign_keys = config.foreign_keys, "sqlite database opened");
        Ok(Self { conn, config })
    }

    /// An in-memory database with default settings.
    pub fn memory() -> SqliteResult<Self> {
        Self::open(SqliteConfig::memory())
    }

    /// The configuration the database was opened with.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    fn is_insert(sql: &str) -> bool {
        sql.trim_start()
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("insert"))
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn query_grammar(&self) -> Box<dyn Grammar> {
        Box::new(SqliteGrammar::new())
    }

    fn schema_grammar(&self) -> Box<dyn SchemaGrammar> {
        Box::new(SqliteSchemaGrammar::new())
    }

    fn select(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>, DriverError> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(SqliteError::from)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt
            .query_map(params_from_iter(bindings.iter().map(to_sqlite)), |row| {
                read_row(row, &columns)
            })
            .map_err(SqliteError::from)?;
        let rows: Result<Vec<_>, _> = rows.collect();
        Ok(rows.map_err(SqliteError::from)?)
    }

    fn execute(&self, sql: &str, bindings: &[Value]) -> Result<ExecuteResult, DriverError> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(SqliteError::from)?;
        let rows_affected = stmt
            .execute(params_from_iter(bindings.iter().map(to_sqlite)))
            .map_err(SqliteError::from)?;

        let last_insert_id = Self::is_insert(sql).then(|| self.conn.last_insert_rowid());
        Ok(ExecuteResult {
            rows_affected: rows_affected as u64,
            last_insert_id,
        })
    }

    fn execute_batch(&self, sql: &str) -> Result<(), DriverError> {
        self.conn.execute_batch(sql).map_err(SqliteError::from)?;
        Ok(())
    }
}

/// Open a [`Connection`] named `name` on an in-memory database.
pub fn memory_connection(name: &str) -> QueryResult<Connection> {
    Ok(Connection::new(name, SqliteDriver::memory()?))
}

/// [`Connector`](quarry_query::Connector) for the `sqlite` driver name.
///
/// ```rust
/// use quarry_query::{ConnectionConfig, ConnectionResolver, DatabaseConfig, DatabaseManager};
///
/// let mut config = DatabaseConfig::default();
/// config.default = "main".into();
/// config.connections.insert("main".into(), ConnectionConfig::sqlite_memory());
///
/// let mut manager = DatabaseManager::new(config);
/// manager.extend("sqlite", quarry_sqlite::connect);
///
/// let conn = manager.default_connection().unwrap();
/// assert_eq!(conn.driver_name(), "sqlite");
/// ```
pub fn connect(name: &str, config: &ConnectionConfig) -> QueryResult<Connection> {
    let sqlite = SqliteConfig::from_connection_config(config)?;
    Ok(Connection::new(name, SqliteDriver::open(sqlite)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_query::row;

    fn conn() -> Connection {
        let conn = memory_connection("test").unwrap();
        conn.unprepared(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, score REAL, admin INTEGER)",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_insert_reports_rowid() {
        let conn = conn();
        let id = conn
            .table("users")
            .insert_get_id(row! { "name" => "ada", "score" => 1.5 }, None)
            .unwrap();
        assert_eq!(id, Value::Int(1));

        let affected = conn.table("users").where_eq("id", 1).update([("name", "grace")]).unwrap();
        assert_eq!(affected, 1);
    }

    #[test]
    fn test_select_round_trip() {
        let conn = conn();
        conn.table("users")
            .insert([
                row! { "name" => "ada", "score" => 2.5, "admin" => true },
                row! { "name" => "bob", "score" => Value::Null, "admin" => false },
            ])
            .unwrap();

        let rows = conn.table("users").order_by("id", quarry_query::SortOrder::Asc).get().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], Value::from("ada"));
        assert_eq!(rows[0]["admin"], Value::Int(1));
        assert_eq!(rows[1]["score"], Value::Null);
        assert_eq!(conn.table("users").where_eq("admin", true).count().unwrap(), 1);
    }

    #[test]
    fn test_errors_carry_sql() {
        let conn = conn();
        let err = conn.table("missing").get().unwrap_err();
        assert!(err.is_execution());
        assert_eq!(err.context.sql.as_deref(), Some(r#"SELECT * FROM "missing""#));
    }

    #[test]
    fn test_transaction_rollback() {
        let conn = conn();
        let result: QueryResult<()> = conn.transaction(|c| {
            c.table("users").insert([row! { "name" => "temp" }])?;
            c.table("nope").delete()?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(conn.table("users").count().unwrap(), 0);
        assert_eq!(conn.transaction_level(), 0);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.sqlite");

        {
            let driver = SqliteDriver::open(SqliteConfig::file(&path)).unwrap();
            let conn = Connection::new("file", driver);
            conn.unprepared("CREATE TABLE kv (k TEXT, v TEXT)").unwrap();
            conn.table("kv").insert([row! { "k" => "a", "v" => "1" }]).unwrap();
        }

        let conn = Connection::new("file", SqliteDriver::open(SqliteConfig::file(&path)).unwrap());
        assert_eq!(conn.table("kv").value("v").unwrap(), Some(Value::from("1")));
    }
}

//! The table recording which migrations have run.

use indexmap::IndexMap;
use quarry_query::{
    Connection, ConnectionResolver, QueryBuilder, QueryError, QueryResult, Row, SchemaBuilder,
    SortOrder, Value, row,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default repository table name.
pub const DEFAULT_TABLE: &str = "migrations";

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration name.
    pub migration: String,
    /// Batch the migration was applied in.
    pub batch: i64,
}

impl MigrationRecord {
    fn from_row(row: &Row) -> QueryResult<Self> {
        let migration = row
            .get("migration")
            .and_then(Value::as_str)
            .ok_or_else(|| QueryError::serialization("migration record without a name"))?;
        let batch = row
            .get("batch")
            .and_then(Value::as_i64)
            .ok_or_else(|| QueryError::serialization("migration record without a batch"))?;
        Ok(Self {
            migration: migration.to_string(),
            batch,
        })
    }
}

/// Reads and writes migration records.
///
/// Records live in a plain table (`id`, `migration`, `batch`) on the
/// repository's connection, which need not be the one a migration targets.
pub struct MigrationRepository<'r> {
    resolver: &'r dyn ConnectionResolver,
    table: String,
    connection: Option<String>,
}

impl std::fmt::Debug for MigrationRepository<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRepository")
            .field("table", &self.table)
            .field("connection", &self.connection)
            .finish()
    }
}

impl<'r> MigrationRepository<'r> {
    /// A repository in `table` on the default connection.
    pub fn new(resolver: &'r dyn ConnectionResolver, table: impl Into<String>) -> Self {
        Self {
            resolver,
            table: table.into(),
            connection: None,
        }
    }

    /// Store records on the named connection.
    pub fn set_source(&mut self, name: Option<&str>) {
        self.connection = name.map(str::to_string);
    }

    /// The repository table name.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// The connection records are stored on.
    pub fn connection(&self) -> QueryResult<&'r Connection> {
        self.resolver.connection(self.connection.as_deref())
    }

    fn table(&self) -> QueryResult<QueryBuilder<'r>> {
        Ok(self.connection()?.table(self.table.as_str()))
    }

    fn records(&self, query: QueryBuilder<'_>) -> QueryResult<Vec<MigrationRecord>> {
        query.get()?.iter().map(MigrationRecord::from_row).collect()
    }

    /// Names of applied migrations, by batch then name.
    pub fn get_ran(&self) -> QueryResult<Vec<String>> {
        let records = self.records(
            self.table()?
                .order_by("batch", SortOrder::Asc)
                .order_by("migration", SortOrder::Asc),
        )?;
        Ok(records.into_iter().map(|r| r.migration).collect())
    }

    /// The most recent `steps` records, newest first.
    pub fn get_migrations(&self, steps: usize) -> QueryResult<Vec<MigrationRecord>> {
        self.records(
            self.table()?
                .order_by("batch", SortOrder::Desc)
                .order_by("migration", SortOrder::Desc)
                .limit(steps as u64),
        )
    }

    /// Every record, newest first.
    pub fn get_all_descending(&self) -> QueryResult<Vec<MigrationRecord>> {
        self.records(
            self.table()?
                .order_by("batch", SortOrder::Desc)
                .order_by("migration", SortOrder::Desc),
        )
    }

    /// Records of the latest batch, in reverse name order.
    pub fn get_last(&self) -> QueryResult<Vec<MigrationRecord>> {
        let batch = self.get_last_batch_number()?;
        self.records(
            self.table()?
                .where_eq("batch", batch)
                .order_by("migration", SortOrder::Desc),
        )
    }

    /// Batch number of every applied migration.
    pub fn get_migration_batches(&self) -> QueryResult<IndexMap<String, i64>> {
        let records = self.records(
            self.table()?
                .order_by("batch", SortOrder::Asc)
                .order_by("migration", SortOrder::Asc),
        )?;
        Ok(records.into_iter().map(|r| (r.migration, r.batch)).collect())
    }

    /// Highest batch number; `0` when nothing has run.
    pub fn get_last_batch_number(&self) -> QueryResult<i64> {
        Ok(self.table()?.max("batch")?.as_i64().unwrap_or(0))
    }

    /// Batch number the next run will use.
    pub fn get_next_batch_number(&self) -> QueryResult<i64> {
        Ok(self.get_last_batch_number()? + 1)
    }

    /// Record `migration` as applied in `batch`.
    pub fn log(&self, migration: &str, batch: i64) -> QueryResult<()> {
        debug!(migration, batch, "logging migration");
        self.table()?
            .insert([row! { "migration" => migration, "batch" => batch }])?;
        Ok(())
    }

    /// Remove the record of `migration`.
    pub fn delete(&self, migration: &str) -> QueryResult<()> {
        debug!(migration, "deleting migration record");
        self.table()?.where_eq("migration", migration).delete()?;
        Ok(())
    }

    /// Whether the repository table exists.
    pub fn repository_exists(&self) -> QueryResult<bool> {
        self.schema()?.has_table(&self.table)
    }

    /// Create the repository table.
    pub fn create_repository(&self) -> QueryResult<()> {
        debug!(table = %self.table, "creating migration repository");
        self.schema()?.create(self.table.as_str(), |table| {
            table.increments("id");
            table.string("migration").unique();
            table.integer("batch");
        })
    }

    /// Drop the repository table if it exists.
    pub fn delete_repository(&self) -> QueryResult<()> {
        self.schema()?.drop_if_exists(self.table.as_str())
    }

    fn schema(&self) -> QueryResult<SchemaBuilder<'r>> {
        Ok(self.connection()?.schema_builder())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_query::connection::testing::RecordingDriver;
    use quarry_sqlite::memory_connection;

    #[test]
    fn test_create_repository_sql() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let repository = MigrationRepository::new(&conn, DEFAULT_TABLE);

        repository.create_repository().unwrap();
        assert_eq!(
            log.statements(),
            vec![
                r#"CREATE TABLE "migrations" ("id" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, "migration" VARCHAR NOT NULL, "batch" INTEGER NOT NULL, UNIQUE ("migration"))"#
            ]
        );
    }

    #[test]
    fn test_get_ran_orders_by_batch_then_name() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let repository = MigrationRepository::new(&conn, DEFAULT_TABLE);

        repository.get_ran().unwrap();
        assert_eq!(
            log.statements(),
            vec![r#"SELECT * FROM "migrations" ORDER BY "batch" ASC, "migration" ASC"#]
        );
    }

    #[test]
    fn test_records_round_trip() {
        let conn = memory_connection("test").unwrap();
        let repository = MigrationRepository::new(&conn, DEFAULT_TABLE);

        assert!(!repository.repository_exists().unwrap());
        repository.create_repository().unwrap();
        assert!(repository.repository_exists().unwrap());
        assert_eq!(repository.get_next_batch_number().unwrap(), 1);

        repository.log("b_posts", 1).unwrap();
        repository.log("a_users", 1).unwrap();
        repository.log("c_tags", 2).unwrap();

        assert_eq!(repository.get_ran().unwrap(), vec!["a_users", "b_posts", "c_tags"]);
        assert_eq!(repository.get_last_batch_number().unwrap(), 2);
        assert_eq!(
            repository.get_last().unwrap(),
            vec![MigrationRecord { migration: "c_tags".into(), batch: 2 }]
        );
        assert_eq!(
            repository
                .get_migrations(2)
                .unwrap()
                .into_iter()
                .map(|r| r.migration)
                .collect::<Vec<_>>(),
            vec!["c_tags", "b_posts"]
        );

        repository.delete("c_tags").unwrap();
        assert_eq!(repository.get_last_batch_number().unwrap(), 1);
        assert_eq!(repository.get_migration_batches().unwrap().get("a_users"), Some(&1));

        repository.delete_repository().unwrap();
        assert!(!repository.repository_exists().unwrap());
    }

    #[test]
    fn test_duplicate_name_rejected_by_unique_index() {
        let conn = memory_connection("test").unwrap();
        let repository = MigrationRepository::new(&conn, DEFAULT_TABLE);
        repository.create_repository().unwrap();

        repository.log("a_users", 1).unwrap();
        assert!(repository.log("a_users", 2).unwrap_err().is_execution());
    }
}

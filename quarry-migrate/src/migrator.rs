//! Applying and reverting migrations in batches.

use std::collections::HashSet;
use std::time::Instant;

use quarry_query::{ConnectionResolver, MigrationsConfig, QueryResult, SchemaBuilder};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{Direction, MigrateResult, MigrationError};
use crate::migration::Migration;
use crate::repository::{DEFAULT_TABLE, MigrationRecord, MigrationRepository};

/// Options for [`Migrator::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Collect the DDL each pending migration would run instead of running it.
    pub pretend: bool,
    /// Give every migration its own batch so they can be rolled back one by one.
    pub step: bool,
}

impl RunOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable pretend mode.
    pub fn pretend(mut self, pretend: bool) -> Self {
        self.pretend = pretend;
        self
    }

    /// Enable one batch per migration.
    pub fn step(mut self, step: bool) -> Self {
        self.step = step;
        self
    }
}

/// Options for [`Migrator::rollback`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackOptions {
    /// Collect the DDL instead of running it.
    pub pretend: bool,
    /// Roll back this many migrations instead of the latest batch.
    pub steps: Option<usize>,
}

impl RollbackOptions {
    /// Default options: the latest batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable pretend mode.
    pub fn pretend(mut self, pretend: bool) -> Self {
        self.pretend = pretend;
        self
    }

    /// Roll back the `steps` most recent migrations.
    pub fn steps(mut self, steps: usize) -> Self {
        self.steps = Some(steps);
        self
    }
}

/// DDL a migration would have run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PretendedMigration {
    /// Migration name.
    pub migration: String,
    /// Statements in execution order.
    pub statements: Vec<String>,
}

/// Outcome of a migrator operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Migrations applied or reverted, in execution order.
    pub migrations: Vec<String>,
    /// Batches written (run) or removed (rollback).
    pub batches: Vec<i64>,
    /// Pretend-mode output.
    pub pretended: Vec<PretendedMigration>,
    /// Recorded migrations with no registered definition; left untouched.
    pub missing: Vec<String>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
}

impl RunReport {
    /// Check if anything was applied, reverted or pretended.
    pub fn has_changes(&self) -> bool {
        !self.migrations.is_empty() || !self.pretended.is_empty()
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.migrations.is_empty() {
            parts.push(format!("{} migrated", self.migrations.len()));
        }
        if !self.pretended.is_empty() {
            parts.push(format!("{} pretended", self.pretended.len()));
        }
        if !self.missing.is_empty() {
            parts.push(format!("{} missing", self.missing.len()));
        }
        if parts.is_empty() {
            "Nothing to do".to_string()
        } else {
            format!("{} in {}ms", parts.join(", "), self.duration_ms)
        }
    }

    fn merge(&mut self, other: RunReport) {
        self.migrations.extend(other.migrations);
        self.batches.extend(other.batches);
        self.pretended.extend(other.pretended);
        self.missing.extend(other.missing);
        self.duration_ms += other.duration_ms;
    }
}

/// State of a migration relative to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    /// Applied.
    Ran,
    /// Registered but not applied.
    Pending,
    /// Recorded as applied but not registered.
    Missing,
}

/// One row of [`Migrator::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Migration name.
    pub migration: String,
    /// Batch it was applied in.
    pub batch: Option<i64>,
    /// Ran, pending or missing.
    pub state: MigrationState,
}

/// Runs registered migrations against a connection resolver.
///
/// ```rust
/// use quarry_migrate::{FnMigration, Migrator, RollbackOptions, RunOptions};
///
/// let conn = quarry_sqlite::memory_connection("main")?;
/// let mut migrator = Migrator::new(&conn);
/// migrator.add(
///     FnMigration::new("2024_01_01_000000_create_users")
///         .with_up(|s| s.create("users", |t| { t.id(); t.string("email"); }))
///         .with_down(|s| s.drop("users")),
/// )?;
///
/// let report = migrator.run(RunOptions::new())?;
/// assert_eq!(report.batches, vec![1]);
/// assert!(conn.schema_builder().has_table("users")?);
///
/// migrator.rollback(RollbackOptions::new())?;
/// assert!(!conn.schema_builder().has_table("users")?);
/// # Ok::<(), quarry_migrate::MigrationError>(())
/// ```
pub struct Migrator<'r> {
    resolver: &'r dyn ConnectionResolver,
    repository: MigrationRepository<'r>,
    migrations: Vec<Box<dyn Migration>>,
}

impl std::fmt::Debug for Migrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("repository", &self.repository)
            .field("migrations", &self.names())
            .finish()
    }
}

impl<'r> Migrator<'r> {
    /// A migrator recording into the default `migrations` table.
    pub fn new(resolver: &'r dyn ConnectionResolver) -> Self {
        Self::with_table(resolver, DEFAULT_TABLE)
    }

    /// A migrator recording into `table`.
    pub fn with_table(resolver: &'r dyn ConnectionResolver, table: impl Into<String>) -> Self {
        Self {
            resolver,
            repository: MigrationRepository::new(resolver, table),
            migrations: Vec::new(),
        }
    }

    /// A migrator using the `[migrations]` configuration section.
    pub fn from_config(resolver: &'r dyn ConnectionResolver, config: &MigrationsConfig) -> Self {
        Self::with_table(resolver, config.table.as_str())
    }

    /// The migration repository.
    pub fn repository(&self) -> &MigrationRepository<'r> {
        &self.repository
    }

    /// Mutable access to the repository, e.g. to change its connection.
    pub fn repository_mut(&mut self) -> &mut MigrationRepository<'r> {
        &mut self.repository
    }

    /// Register a migration. Migrations are kept sorted by name.
    pub fn add(&mut self, migration: impl Migration + 'static) -> MigrateResult<&mut Self> {
        self.add_boxed(Box::new(migration))
    }

    /// Register an already boxed migration.
    pub fn add_boxed(&mut self, migration: Box<dyn Migration>) -> MigrateResult<&mut Self> {
        let position = self
            .migrations
            .binary_search_by(|m| m.name().cmp(migration.name()));
        match position {
            Ok(_) => Err(MigrationError::DuplicateName(migration.name().to_string())),
            Err(index) => {
                self.migrations.insert(index, migration);
                Ok(self)
            }
        }
    }

    /// Registered migration names, in run order.
    pub fn names(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.name()).collect()
    }

    fn find(&self, name: &str) -> Option<&dyn Migration> {
        self.migrations
            .binary_search_by(|m| m.name().cmp(name))
            .ok()
            .map(|index| self.migrations[index].as_ref())
    }

    /// The registered migration named `name`.
    pub fn get(&self, name: &str) -> MigrateResult<&dyn Migration> {
        self.find(name)
            .ok_or_else(|| MigrationError::NotFound(name.to_string()))
    }

    /// Create the repository table if it does not exist yet.
    pub fn prepare(&self) -> MigrateResult<()> {
        if !self.repository.repository_exists()? {
            self.repository.create_repository()?;
        }
        Ok(())
    }

    fn require_repository(&self) -> MigrateResult<()> {
        if self.repository.repository_exists()? {
            Ok(())
        } else {
            Err(MigrationError::RepositoryMissing(self.repository.table_name().to_string()))
        }
    }

    /// Registered migrations not yet recorded, in name order.
    pub fn pending(&self) -> MigrateResult<Vec<&str>> {
        let ran: HashSet<String> = if self.repository.repository_exists()? {
            self.repository.get_ran()?.into_iter().collect()
        } else {
            HashSet::new()
        };
        Ok(self
            .migrations
            .iter()
            .map(|m| m.name())
            .filter(|name| !ran.contains(*name))
            .collect())
    }

    /// Apply every pending migration under the next batch number.
    ///
    /// A failing migration stops the run; migrations applied before it in
    /// the same run stay recorded.
    #[instrument(skip(self), fields(table = %self.repository.table_name()))]
    pub fn run(&self, options: RunOptions) -> MigrateResult<RunReport> {
        let started = Instant::now();
        if !options.pretend {
            self.prepare()?;
        }

        let pending = self.pending()?;
        let mut report = RunReport::default();
        if pending.is_empty() {
            info!("nothing to migrate");
            return Ok(report);
        }

        let mut batch = if self.repository.repository_exists()? {
            self.repository.get_next_batch_number()?
        } else {
            1
        };

        for name in pending {
            let migration = self.get(name)?;
            if options.pretend {
                report.pretended.push(self.pretend(migration, Direction::Up)?);
                continue;
            }
            self.run_migration(migration, Direction::Up, &|| self.repository.log(name, batch))?;
            info!(migration = name, batch, "migrated");
            report.migrations.push(name.to_string());
            if !report.batches.contains(&batch) {
                report.batches.push(batch);
            }
            if options.step {
                batch += 1;
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Revert the latest batch, or the `steps` most recent migrations.
    #[instrument(skip(self), fields(table = %self.repository.table_name()))]
    pub fn rollback(&self, options: RollbackOptions) -> MigrateResult<RunReport> {
        self.require_repository()?;
        let records = match options.steps {
            Some(steps) => self.repository.get_migrations(steps)?,
            None => self.repository.get_last()?,
        };
        if records.is_empty() {
            info!("nothing to roll back");
            return Ok(RunReport::default());
        }
        self.rollback_records(records, options.pretend)
    }

    /// Revert every applied migration, newest first.
    #[instrument(skip(self), fields(table = %self.repository.table_name()))]
    pub fn reset(&self, pretend: bool) -> MigrateResult<RunReport> {
        self.require_repository()?;
        let records = self.repository.get_all_descending()?;
        if records.is_empty() {
            info!("nothing to roll back");
            return Ok(RunReport::default());
        }
        self.rollback_records(records, pretend)
    }

    /// Reset, then run every migration again.
    #[instrument(skip(self), fields(table = %self.repository.table_name()))]
    pub fn refresh(&self, options: RunOptions) -> MigrateResult<RunReport> {
        let mut report = if self.repository.repository_exists()? {
            self.reset(false)?
        } else {
            RunReport::default()
        };
        report.merge(self.run(options)?);
        Ok(report)
    }

    /// Drop every table on the default connection, then run every migration.
    ///
    /// `down()` is never called.
    #[instrument(skip(self), fields(table = %self.repository.table_name()))]
    pub fn fresh(&self, options: RunOptions) -> MigrateResult<RunReport> {
        let connection = self.resolver.connection(None)?;
        connection.schema_builder().drop_all_tables()?;
        info!(connection = %connection.name(), "dropped all tables");
        self.run(options)
    }

    /// Every registered and every recorded migration with its state.
    ///
    /// Registered migrations come first in name order, followed by recorded
    /// migrations that are no longer registered.
    pub fn status(&self) -> MigrateResult<Vec<MigrationStatus>> {
        self.require_repository()?;
        let mut batches = self.repository.get_migration_batches()?;
        let mut rows: Vec<MigrationStatus> = self
            .migrations
            .iter()
            .map(|m| {
                let batch = batches.shift_remove(m.name());
                MigrationStatus {
                    migration: m.name().to_string(),
                    batch,
                    state: if batch.is_some() {
                        MigrationState::Ran
                    } else {
                        MigrationState::Pending
                    },
                }
            })
            .collect();
        rows.extend(batches.into_iter().map(|(migration, batch)| MigrationStatus {
            migration,
            batch: Some(batch),
            state: MigrationState::Missing,
        }));
        Ok(rows)
    }

    fn rollback_records(&self, records: Vec<MigrationRecord>, pretend: bool) -> MigrateResult<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::default();

        for record in records {
            let Some(migration) = self.find(&record.migration) else {
                warn!(migration = %record.migration, "migration not found, record kept");
                report.missing.push(record.migration);
                continue;
            };
            if pretend {
                report.pretended.push(self.pretend(migration, Direction::Down)?);
                continue;
            }
            self.run_migration(migration, Direction::Down, &|| self.repository.delete(&record.migration))?;
            info!(migration = %record.migration, batch = record.batch, "rolled back");
            if !report.batches.contains(&record.batch) {
                report.batches.push(record.batch);
            }
            report.migrations.push(record.migration);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Apply `migration` and then `record` it in the repository.
    ///
    /// When the migration is transactional and the repository lives on the
    /// same connection, the record is written inside that transaction so the
    /// schema change and its bookkeeping commit or roll back together.
    fn run_migration(
        &self,
        migration: &dyn Migration,
        direction: Direction,
        record: &dyn Fn() -> QueryResult<()>,
    ) -> MigrateResult<()> {
        let connection = self.resolver.connection(migration.connection())?;
        let schema = SchemaBuilder::new(connection);
        let apply = || match direction {
            Direction::Up => migration.up(&schema),
            Direction::Down => migration.down(&schema),
        };

        if migration.within_transaction() && std::ptr::eq(connection, self.repository.connection()?) {
            return connection
                .transaction(|_| {
                    apply()?;
                    record()
                })
                .map_err(|source| MigrationError::failed(migration.name(), direction, source));
        }

        let result = if migration.within_transaction() {
            connection.transaction(|_| apply())
        } else {
            apply()
        };
        result.map_err(|source| MigrationError::failed(migration.name(), direction, source))?;
        record()?;
        Ok(())
    }

    fn pretend(&self, migration: &dyn Migration, direction: Direction) -> MigrateResult<PretendedMigration> {
        let connection = self.resolver.connection(migration.connection())?;
        let schema = SchemaBuilder::pretending(connection);
        let result = match direction {
            Direction::Up => migration.up(&schema),
            Direction::Down => migration.down(&schema),
        };
        result.map_err(|source| MigrationError::failed(migration.name(), direction, source))?;

        Ok(PretendedMigration {
            migration: migration.name().to_string(),
            statements: schema.take_pretended(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::FnMigration;
    use pretty_assertions::assert_eq;
    use quarry_query::connection::testing::RecordingDriver;
    use quarry_query::{Connection, QueryError};
    use quarry_sqlite::memory_connection;

    fn create(name: &str, table: &'static str) -> FnMigration {
        FnMigration::new(name)
            .with_up(move |s| {
                s.create(table, |t| {
                    t.increments("id");
                    t.string("name");
                })
            })
            .with_down(move |s| s.drop(table))
    }

    fn tables(conn: &Connection) -> Vec<String> {
        conn.schema_builder().get_tables().unwrap()
    }

    #[test]
    fn test_run_assigns_one_batch_and_rollback_reverses() {
        let conn = memory_connection("main").unwrap();
        let mut migrator = Migrator::new(&conn);
        migrator.add(create("2024_01_02_b_posts", "posts")).unwrap();
        migrator.add(create("2024_01_01_a_users", "users")).unwrap();

        let report = migrator.run(RunOptions::new()).unwrap();
        assert_eq!(report.migrations, vec!["2024_01_01_a_users", "2024_01_02_b_posts"]);
        assert_eq!(report.batches, vec![1]);
        assert_eq!(
            migrator.repository().get_migration_batches().unwrap().into_iter().collect::<Vec<_>>(),
            vec![
                ("2024_01_01_a_users".to_string(), 1),
                ("2024_01_02_b_posts".to_string(), 1),
            ]
        );

        let report = migrator.rollback(RollbackOptions::new()).unwrap();
        assert_eq!(report.migrations, vec!["2024_01_02_b_posts", "2024_01_01_a_users"]);
        assert!(migrator.repository().get_ran().unwrap().is_empty());
        assert_eq!(tables(&conn), vec!["migrations"]);
    }

    #[test]
    fn test_second_run_only_applies_new_migrations() {
        let conn = memory_connection("main").unwrap();
        let mut migrator = Migrator::new(&conn);
        migrator.add(create("a_users", "users")).unwrap();
        migrator.run(RunOptions::new()).unwrap();

        assert!(!migrator.run(RunOptions::new()).unwrap().has_changes());

        migrator.add(create("b_posts", "posts")).unwrap();
        let report = migrator.run(RunOptions::new()).unwrap();
        assert_eq!(report.migrations, vec!["b_posts"]);
        assert_eq!(report.batches, vec![2]);

        migrator.rollback(RollbackOptions::new()).unwrap();
        assert_eq!(tables(&conn), vec!["migrations", "users"]);
    }

    #[test]
    fn test_step_gives_each_migration_a_batch() {
        let conn = memory_connection("main").unwrap();
        let mut migrator = Migrator::new(&conn);
        migrator.add(create("a_users", "users")).unwrap();
        migrator.add(create("b_posts", "posts")).unwrap();

        let report = migrator.run(RunOptions::new().step(true)).unwrap();
        assert_eq!(report.batches, vec![1, 2]);

        let report = migrator.rollback(RollbackOptions::new()).unwrap();
        assert_eq!(report.migrations, vec!["b_posts"]);
        assert_eq!(migrator.repository().get_ran().unwrap(), vec!["a_users"]);
    }

    #[test]
    fn test_rollback_steps_crosses_batches() {
        let conn = memory_connection("main").unwrap();
        let mut migrator = Migrator::new(&conn);
        migrator.add(create("a_users", "users")).unwrap();
        migrator.run(RunOptions::new()).unwrap();
        migrator.add(create("b_posts", "posts")).unwrap();
        migrator.add(create("c_tags", "tags")).unwrap();
        migrator.run(RunOptions::new()).unwrap();

        let report = migrator.rollback(RollbackOptions::new().steps(2)).unwrap();
        assert_eq!(report.migrations, vec!["c_tags", "b_posts"]);
        assert_eq!(report.batches, vec![2]);
        assert_eq!(migrator.repository().get_ran().unwrap(), vec!["a_users"]);
    }

    #[test]
    fn test_failure_keeps_earlier_records_and_rolls_back_its_own_ddl() {
        let conn = memory_connection("main").unwrap();
        let mut migrator = Migrator::new(&conn);
        migrator.add(create("a_users", "users")).unwrap();
        migrator
            .add(FnMigration::new("b_broken").with_up(|s| {
                s.create("half", |t| {
                    t.increments("id");
                })?;
                Err(QueryError::invalid_query("boom"))
            }))
            .unwrap();

        let err = migrator.run(RunOptions::new()).unwrap_err();
        assert_eq!(err.migration(), Some("b_broken"));
        assert_eq!(migrator.repository().get_ran().unwrap(), vec!["a_users"]);
        assert_eq!(tables(&conn), vec!["migrations", "users"]);
    }

    #[test]
    fn test_record_is_written_inside_the_migration_transaction() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("main", driver);
        let mut migrator = Migrator::new(&conn);
        migrator.add(create("a_users", "users")).unwrap();
        migrator.run(RunOptions::new()).unwrap();

        let statements = log.statements();
        let position = |prefix: &str| statements.iter().position(|s| s.starts_with(prefix)).unwrap();
        assert!(position("BEGIN") < position(r#"CREATE TABLE "users""#));
        assert!(position(r#"CREATE TABLE "users""#) < position(r#"INSERT INTO "migrations""#));
        assert!(position(r#"INSERT INTO "migrations""#) < position("COMMIT"));
    }

    #[test]
    fn test_failed_record_rolls_back_the_migration() {
        let driver = RecordingDriver::new().fail_on(r#"INSERT INTO "migrations""#);
        let log = driver.log();
        let conn = Connection::new("main", driver);
        let mut migrator = Migrator::new(&conn);
        migrator.add(create("a_users", "users")).unwrap();

        let err = migrator.run(RunOptions::new()).unwrap_err();
        assert_eq!(err.migration(), Some("a_users"));
        let statements = log.statements();
        assert_eq!(statements.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!statements.iter().any(|s| s == "COMMIT"));
    }

    #[test]
    fn test_pretend_records_nothing() {
        let conn = memory_connection("main").unwrap();
        let mut migrator = Migrator::new(&conn);
        migrator.add(create("a_users", "users")).unwrap();

        let report = migrator.run(RunOptions::new().pretend(true)).unwrap();
        assert!(report.migrations.is_empty());
        assert_eq!(
            report.pretended,
            vec![PretendedMigration {
                migration: "a_users".into(),
                statements: vec![
                    r#"CREATE TABLE "users" ("id" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, "name" VARCHAR NOT NULL)"#
                        .into()
                ],
            }]
        );
        assert!(tables(&conn).is_empty());
    }

    #[test]
    fn test_reset_refresh_and_fresh() {
        let conn = memory_connection("main").unwrap();
        let mut migrator = Migrator::new(&conn);
        migrator.add(create("a_users", "users")).unwrap();
        migrator.run(RunOptions::new()).unwrap();
        migrator.add(create("b_posts", "posts")).unwrap();
        migrator.run(RunOptions::new()).unwrap();

        let report = migrator.reset(false).unwrap();
        assert_eq!(report.migrations, vec!["b_posts", "a_users"]);
        assert_eq!(report.batches, vec![2, 1]);
        assert_eq!(tables(&conn), vec!["migrations"]);

        let report = migrator.refresh(RunOptions::new()).unwrap();
        assert_eq!(report.migrations, vec!["a_users", "b_posts"]);
        assert_eq!(migrator.repository().get_last_batch_number().unwrap(), 1);

        conn.table("users").insert([quarry_query::row! { "name" => "ann" }]).unwrap();
        migrator.fresh(RunOptions::new()).unwrap();
        assert_eq!(conn.table("users").count().unwrap(), 0);
        assert_eq!(migrator.repository().get_ran().unwrap(), vec!["a_users", "b_posts"]);
    }

    #[test]
    fn test_status_and_missing_migrations() {
        let conn = memory_connection("main").unwrap();
        let mut migrator = Migrator::new(&conn);
        migrator.add(create("a_users", "users")).unwrap();
        migrator.run(RunOptions::new()).unwrap();
        migrator.repository().log("z_removed", 1).unwrap();
        migrator.add(create("b_posts", "posts")).unwrap();

        let status = migrator.status().unwrap();
        assert_eq!(
            status.iter().map(|s| (s.migration.as_str(), s.state)).collect::<Vec<_>>(),
            vec![
                ("a_users", MigrationState::Ran),
                ("b_posts", MigrationState::Pending),
                ("z_removed", MigrationState::Missing),
            ]
        );

        let report = migrator.rollback(RollbackOptions::new()).unwrap();
        assert_eq!(report.missing, vec!["z_removed"]);
        assert_eq!(report.migrations, vec!["a_users"]);
        assert_eq!(migrator.repository().get_ran().unwrap(), vec!["z_removed"]);
    }

    #[test]
    fn test_duplicate_and_unknown_names() {
        let conn = memory_connection("main").unwrap();
        let mut migrator = Migrator::new(&conn);
        migrator.add(create("a_users", "users")).unwrap();

        assert!(matches!(
            migrator.add(create("a_users", "users")).unwrap_err(),
            MigrationError::DuplicateName(name) if name == "a_users"
        ));
        assert!(matches!(migrator.get("nope"), Err(MigrationError::NotFound(_))));
    }

    #[test]
    fn test_rollback_without_repository() {
        let conn = memory_connection("main").unwrap();
        let migrator = Migrator::new(&conn);
        assert!(matches!(
            migrator.rollback(RollbackOptions::new()).unwrap_err(),
            MigrationError::RepositoryMissing(table) if table == "migrations"
        ));
    }
}

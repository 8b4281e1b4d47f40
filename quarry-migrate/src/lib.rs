//! # quarry-migrate
//!
//! Ordered, reversible schema migrations for Quarry.
//!
//! Migrations implement [`Migration`] and are registered on a [`Migrator`].
//! Each [`Migrator::run`] applies the pending ones under a single new batch
//! number, recorded in the `migrations` table by the
//! [`MigrationRepository`]. [`Migrator::rollback`] reverts the latest batch in
//! reverse name order.
//!
//! ```rust
//! use quarry_migrate::{FnMigration, Migrator, RunOptions};
//!
//! let conn = quarry_sqlite::memory_connection("main")?;
//! let mut migrator = Migrator::new(&conn);
//! migrator
//!     .add(FnMigration::new("2024_01_01_create_users").with_up(|s| {
//!         s.create("users", |t| {
//!             t.id();
//!             t.string("email").unique();
//!         })
//!     }))?
//!     .add(FnMigration::new("2024_01_02_create_posts").with_up(|s| {
//!         s.create("posts", |t| {
//!             t.id();
//!             t.foreign_id("user_id");
//!             t.foreign(["user_id"]).references(["id"]).on("users");
//!         })
//!     }))?;
//!
//! assert_eq!(migrator.pending()?, vec!["2024_01_01_create_users", "2024_01_02_create_posts"]);
//! migrator.run(RunOptions::new())?;
//! assert!(migrator.pending()?.is_empty());
//! # Ok::<(), quarry_migrate::MigrationError>(())
//! ```

pub mod error;
pub mod migration;
pub mod migrator;
pub mod repository;

pub use error::{Direction, MigrateResult, MigrationError};
pub use migration::{FnMigration, Migration};
pub use migrator::{
    MigrationState, MigrationStatus, Migrator, PretendedMigration, RollbackOptions, RunOptions,
    RunReport,
};
pub use repository::{DEFAULT_TABLE, MigrationRecord, MigrationRepository};

//! # Quarry
//!
//! A synchronous relational data-access layer.
//!
//! Quarry provides:
//! - A fluent query builder compiled to parameterized SQL by a pluggable grammar
//! - Active-record models with casts, mass-assignment guards, dirty tracking and timestamps
//! - Has-one, has-many, belongs-to and many-to-many relations with batched eager loading
//! - A schema builder and versioned, reversible migrations
//!
//! ## Quick Start
//!
//! ```rust
//! use quarry::prelude::*;
//!
//! let conn = quarry::sqlite::memory_connection("main")?;
//!
//! let mut migrator = Migrator::new(&conn);
//! migrator.add(FnMigration::new("2024_01_01_create_users").with_up(|s| {
//!     s.create("users", |t| {
//!         t.id();
//!         t.string("name");
//!         t.timestamps();
//!     })
//! }))?;
//! migrator.run(RunOptions::new())?;
//!
//! let registry = Registry::new();
//! registry.register(ModelDef::new("User").fillable(["name"]));
//! let orm = Orm::new(&conn, &registry);
//!
//! let ann = orm.create("User", [("name", "ann")])?;
//! assert!(ann.exists());
//! assert_eq!(orm.query("User")?.where_eq("name", "ann").count()?, 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Query builder, grammar, connections and schema builder.
pub mod query {
    pub use quarry_query::*;
}

/// Models, relations and eager loading.
pub mod orm {
    pub use quarry_orm::*;
}

/// Schema migrations.
pub mod migrate {
    pub use quarry_migrate::*;
}

/// The SQLite driver.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use quarry_sqlite::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use quarry_migrate::{FnMigration, Migration, Migrator, RollbackOptions, RunOptions};
    pub use quarry_orm::prelude::*;
    pub use quarry_query::prelude::*;
}

// Re-export key types at the crate root
pub use quarry_migrate::{MigrateResult, MigrationError};
pub use quarry_orm::{Model, ModelDef, Orm, Registry};
pub use quarry_query::{Connection, DatabaseConfig, DatabaseManager, QueryError, QueryResult, Value};

/// A [`DatabaseManager`] for `config` with the bundled drivers registered.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub fn database_manager(config: DatabaseConfig) -> DatabaseManager {
    let mut manager = DatabaseManager::new(config);
    manager.extend("sqlite", quarry_sqlite::connect);
    manager
}

//! SQLite driver for Quarry.
//!
//! This crate provides SQLite support for Quarry connections, using
//! `rusqlite` with a bundled SQLite.
//!
//! # Features
//!
//! - In-memory and file-based databases
//! - Pragmas (foreign keys, busy timeout, journal and synchronous mode) from configuration
//! - A [`connect`] function to register with a [`DatabaseManager`](quarry_query::DatabaseManager)
//!
//! # Example
//!
//! ```rust
//! use quarry_query::{row, Connection, Value};
//! use quarry_sqlite::SqliteDriver;
//!
//! let conn = Connection::new("main", SqliteDriver::memory().unwrap());
//! conn.schema_builder()
//!     .create("notes", |table| {
//!         table.increments("id");
//!         table.text("body");
//!     })
//!     .unwrap();
//!
//! conn.table("notes").insert([row! { "body" => "hello" }]).unwrap();
//! assert_eq!(conn.table("notes").value("body").unwrap(), Some(Value::from("hello")));
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod types;

pub use config::{DatabasePath, JournalMode, SqliteConfig, SynchronousMode};
pub use driver::{SqliteDriver, connect, memory_connection};
pub use error::{SqliteError, SqliteResult};

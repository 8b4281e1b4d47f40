//! # quarry-query
//!
//! Query builder, SQL grammar, connections and schema builder for Quarry.
//!
//! This crate is the lower half of the data-access layer:
//! - A fluent [`QueryBuilder`] that accumulates a [`Query`] value
//! - A [`Grammar`](grammar::Grammar) that compiles queries to parameterized SQL
//! - [`Connection`]s running SQL through a pluggable [`Driver`]
//! - A [`DatabaseManager`] resolving named connections from configuration
//! - A [`SchemaBuilder`] and [`Blueprint`] for DDL
//!
//! ## Building Queries
//!
//! ```rust
//! use quarry_query::connection::{testing::RecordingDriver, Connection};
//! use quarry_query::SortOrder;
//!
//! let conn = Connection::new("test", RecordingDriver::new());
//!
//! let query = conn
//!     .table("users")
//!     .select(["id", "email"])
//!     .where_eq("active", true)
//!     .where_in("role", ["admin", "editor"])
//!     .order_by("created_at", SortOrder::Desc)
//!     .limit(10);
//!
//! assert_eq!(
//!     query.to_sql().unwrap(),
//!     r#"SELECT "id", "email" FROM "users" WHERE "active" = ? AND "role" IN (?, ?) ORDER BY "created_at" DESC LIMIT 10"#
//! );
//! assert_eq!(query.get_bindings().len(), 3);
//! ```
//!
//! ## Nested Predicates
//!
//! ```rust
//! use quarry_query::connection::{testing::RecordingDriver, Connection};
//!
//! let conn = Connection::new("test", RecordingDriver::new());
//!
//! let sql = conn
//!     .table("posts")
//!     .where_eq("published", true)
//!     .where_nested(|q| q.where_eq("author_id", 1).or_where_eq("editor_id", 1))
//!     .to_sql()
//!     .unwrap();
//!
//! assert_eq!(
//!     sql,
//!     r#"SELECT * FROM "posts" WHERE "published" = ? AND ("author_id" = ? OR "editor_id" = ?)"#
//! );
//! ```
//!
//! ## Schema
//!
//! ```rust
//! use quarry_query::schema::{Blueprint, SqliteSchemaGrammar};
//!
//! let mut table = Blueprint::create("tags");
//! table.increments("id");
//! table.string("name").unique();
//!
//! let statements = table.to_sql(&SqliteSchemaGrammar::new()).unwrap();
//! assert_eq!(statements.len(), 1);
//! ```

pub mod ast;
pub mod builder;
pub mod config;
pub mod connection;
pub mod error;
pub mod expression;
pub mod grammar;
pub mod logging;
pub mod pagination;
pub mod processor;
pub mod schema;
pub mod types;
pub mod value;

pub use ast::{Assignment, Assignments, BindingKind, Bindings, Join, JoinCondition, Query, Where};
pub use builder::QueryBuilder;
pub use config::{ConnectionConfig, DatabaseConfig, MigrationsConfig};
pub use connection::{
    Connection, ConnectionResolver, Connector, DatabaseManager, Driver, ExecuteResult, LoggedQuery,
};
pub use error::{DriverError, ErrorCode, ErrorContext, QueryError, QueryResult};
pub use expression::{Expression, raw};
pub use pagination::{Pagination, Paginator, SimplePaginator};
pub use schema::{Blueprint, SchemaBuilder};
pub use types::{AggregateFunction, Boolean, JoinType, SortOrder};
pub use value::{KeyValue, Row, Value};

// Re-export smallvec for downstream crates.
pub use smallvec;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::builder::QueryBuilder;
    pub use crate::connection::{Connection, ConnectionResolver, DatabaseManager, Driver};
    pub use crate::error::{ErrorCode, QueryError, QueryResult};
    pub use crate::expression::{Expression, raw};
    pub use crate::pagination::{Paginator, SimplePaginator};
    pub use crate::row;
    pub use crate::schema::{Blueprint, SchemaBuilder};
    pub use crate::types::SortOrder;
    pub use crate::value::{Row, Value};
}

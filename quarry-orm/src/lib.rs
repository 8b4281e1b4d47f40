//! # quarry-orm
//!
//! Active-record models on top of `quarry-query`.
//!
//! Model types are described at startup with [`ModelDef`] and registered on
//! a [`Registry`]. An [`Orm`] handle pairs the registry with a connection
//! resolver and is passed to every operation that touches the database.
//!
//! ```rust
//! use quarry_orm::{Cast, ModelDef, Orm, Registry};
//! use quarry_query::connection::{testing::RecordingDriver, Connection};
//! use quarry_query::{row, Value};
//!
//! let driver = RecordingDriver::new()
//!     .queue_rows(vec![row! { "id" => 1, "name" => "ann" }, row! { "id" => 2, "name" => "bob" }])
//!     .queue_rows(vec![row! { "id" => 7, "user_id" => 2, "title" => "hello" }]);
//! let log = driver.log();
//! let conn = Connection::new("main", driver);
//!
//! let registry = Registry::new();
//! registry.register(ModelDef::new("User").fillable(["name"]).has_many("posts", "Post"));
//! registry.register(ModelDef::new("Post").cast("user_id", Cast::Int));
//! let orm = Orm::new(&conn, &registry);
//!
//! let users = orm.query("User")?.with(["posts"]).get()?;
//! assert_eq!(log.len(), 2);
//! assert!(users[0].related_many("posts").is_empty());
//! assert_eq!(users[1].related_many("posts")[0].get("title")?, Value::from("hello"));
//! # Ok::<(), quarry_query::QueryError>(())
//! ```

pub mod cast;
pub mod definition;
pub mod events;
pub mod factory;
pub mod model;
pub mod naming;
pub mod orm;
mod persist;
pub mod query;
pub mod registry;
pub mod relations;
pub mod scope;

pub use cast::Cast;
pub use definition::{ModelDef, Transform, SOFT_DELETES};
pub use events::{Listener, ModelEvent, Observer};
pub use factory::{Factory, Seeder};
pub use model::{Model, Relationship};
pub use orm::Orm;
pub use query::{EagerConstraint, ModelQuery};
pub use registry::Registry;
pub use relations::{
    BelongsTo, BelongsToMany, HasOneOrMany, PivotDef, Relation, RelationDef, SyncResult,
};
pub use scope::{LocalScope, Scope, SoftDeletingScope};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        Cast, Factory, Model, ModelDef, ModelEvent, ModelQuery, Observer, Orm, Registry,
        Relationship, RelationDef, Scope, Seeder,
    };
}

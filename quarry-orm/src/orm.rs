//! The ORM handle.

use std::fmt;
use std::sync::Arc;

use quarry_query::{Connection, ConnectionResolver, QueryResult, Value};

use crate::definition::ModelDef;
use crate::model::{Model, Relationship};
use crate::query::ModelQuery;
use crate::registry::Registry;
use crate::relations::{BelongsTo, BelongsToMany, HasOneOrMany, Relation};

/// Connections plus model registry: everything a model operation needs.
///
/// `Orm` is a pair of references and is `Copy`; pass it by value.
///
/// ```rust
/// use quarry_orm::{ModelDef, Orm, Registry};
/// use quarry_query::connection::{testing::RecordingDriver, Connection};
///
/// let conn = Connection::new("main", RecordingDriver::new());
/// let registry = Registry::new();
/// registry.register(ModelDef::new("User").soft_deletes());
///
/// let orm = Orm::new(&conn, &registry);
/// let sql = orm.query("User")?.where_eq("name", "ann").to_sql()?;
/// assert_eq!(
///     sql,
///     r#"SELECT * FROM "users" WHERE "name" = ? AND "users"."deleted_at" IS NULL"#
/// );
/// # Ok::<(), quarry_query::QueryError>(())
/// ```
#[derive(Clone, Copy)]
pub struct Orm<'o> {
    resolver: &'o dyn ConnectionResolver,
    registry: &'o Registry,
}

impl fmt::Debug for Orm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orm")
            .field("default_connection", &self.resolver.default_connection_name())
            .field("registry", self.registry)
            .finish()
    }
}

impl<'o> Orm<'o> {
    /// Combine a connection resolver (a single [`Connection`] or a
    /// [`DatabaseManager`](quarry_query::DatabaseManager)) with a registry.
    pub fn new(resolver: &'o dyn ConnectionResolver, registry: &'o Registry) -> Self {
        Self { resolver, registry }
    }

    /// The model registry.
    pub fn registry(&self) -> &'o Registry {
        self.registry
    }

    /// The connection resolver.
    pub fn resolver(&self) -> &'o dyn ConnectionResolver {
        self.resolver
    }

    /// The connection `def` is stored on.
    pub fn connection_for(&self, def: &ModelDef) -> QueryResult<&'o Connection> {
        self.resolver.connection(def.connection_name())
    }

    /// Definition of `model`.
    pub fn def(&self, model: &str) -> QueryResult<Arc<ModelDef>> {
        self.registry.get(model)
    }

    /// A query on `model`.
    pub fn query(&self, model: &str) -> QueryResult<ModelQuery<'o>> {
        ModelQuery::new(*self, self.registry.get(model)?)
    }

    /// A query on the model described by `def`.
    pub fn query_def(&self, def: Arc<ModelDef>) -> QueryResult<ModelQuery<'o>> {
        ModelQuery::new(*self, def)
    }

    /// Every model of `model`.
    pub fn all(&self, model: &str) -> QueryResult<Vec<Model>> {
        self.query(model)?.get()
    }

    /// The model of type `model` with key `id`.
    pub fn find(&self, model: &str, id: impl Into<Value>) -> QueryResult<Option<Model>> {
        self.query(model)?.find(id)
    }

    /// A new, unsaved instance of `def`.
    pub fn make(&self, def: Arc<ModelDef>) -> Model {
        Model::new(def)
    }

    /// A new, unsaved instance of the model named `model`.
    pub fn new_model(&self, model: &str) -> QueryResult<Model> {
        Ok(self.make(self.registry.get(model)?))
    }

    /// Fill and save a new `model`.
    pub fn create<I, K, V>(&self, model: &str, attributes: I) -> QueryResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.query(model)?.create(attributes)
    }

    // ============== Relations ==============

    /// Relation `name` of `parent`, constrained to `parent`.
    pub fn relation(&self, parent: &Model, name: &str) -> QueryResult<Relation<'o>> {
        let mut relation = Relation::new(*self, parent.def(), name)?;
        relation.add_constraints(parent);
        Ok(relation)
    }

    /// Has-one or has-many relation `name` of `parent`.
    pub fn has_many(&self, parent: &Model, name: &str) -> QueryResult<HasOneOrMany<'o>> {
        self.relation(parent, name)?.into_has_one_or_many()
    }

    /// Belongs-to relation `name` of `child`.
    pub fn belongs_to(&self, child: &Model, name: &str) -> QueryResult<BelongsTo<'o>> {
        self.relation(child, name)?.into_belongs_to()
    }

    /// Many-to-many relation `name` of `parent`.
    pub fn belongs_to_many(&self, parent: &Model, name: &str) -> QueryResult<BelongsToMany<'o>> {
        self.relation(parent, name)?.into_belongs_to_many()
    }

    /// Relation `name` of `model`, querying it on first access.
    pub fn related<'m>(&self, model: &'m mut Model, name: &str) -> QueryResult<&'m Relationship> {
        if !model.relation_loaded(name) {
            let value = self.relation(model, name)?.get_results()?;
            model.set_relation(name, value);
        }
        model
            .relation(name)
            .ok_or_else(|| quarry_query::QueryError::internal("relation vanished after loading"))
    }

    /// Eager load `relations` onto already retrieved `models`.
    ///
    /// Every model must be of the same type.
    pub fn load<I, S>(&self, models: &mut [Model], relations: I) -> QueryResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Some(first) = models.first() else {
            return Ok(());
        };
        let def = Arc::clone(first.def());
        self.query_def(def)?
            .with(relations)
            .eager_load_relations(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_query::connection::testing::RecordingDriver;
    use quarry_query::{row, ErrorCode};

    #[test]
    fn test_unknown_model() {
        let conn = Connection::new("test", RecordingDriver::new());
        let registry = Registry::new();
        let orm = Orm::new(&conn, &registry);
        assert_eq!(orm.query("Ghost").unwrap_err().code, ErrorCode::UnknownModel);
    }

    #[test]
    fn test_unknown_connection() {
        let conn = Connection::new("test", RecordingDriver::new());
        let registry = Registry::new();
        registry.register(ModelDef::new("Audit").connection("audit"));
        let orm = Orm::new(&conn, &registry);
        assert_eq!(orm.query("Audit").unwrap_err().code, ErrorCode::UnknownConnection);
    }

    #[test]
    fn test_lazy_eager_load() {
        let driver = RecordingDriver::new().queue_rows(vec![row! { "id" => 1, "user_id" => 1 }]);
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = Registry::new();
        let users = registry.register(ModelDef::new("User").has_many("posts", "Post"));
        registry.register(ModelDef::new("Post"));
        let orm = Orm::new(&conn, &registry);

        let mut models = vec![
            Model::hydrate(Arc::clone(&users), row! { "id" => 1 }),
            Model::hydrate(users, row! { "id" => 2 }),
        ];
        orm.load(&mut models, ["posts"]).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(models[0].related_many("posts").len(), 1);
        assert!(models[1].related_many("posts").is_empty());
    }

    #[test]
    fn test_related_loads_once() {
        let driver = RecordingDriver::new().with_rows(vec![row! { "id" => 3, "user_id" => 1 }]);
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = Registry::new();
        let users = registry.register(ModelDef::new("User").has_many("posts", "Post"));
        registry.register(ModelDef::new("Post"));
        let orm = Orm::new(&conn, &registry);

        let mut user = Model::hydrate(users, row! { "id" => 1 });
        assert_eq!(orm.related(&mut user, "posts").unwrap().len(), 1);
        assert_eq!(orm.related(&mut user, "posts").unwrap().len(), 1);
        assert_eq!(log.len(), 1);
    }
}

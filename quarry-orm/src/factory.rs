//! Model factories and database seeders.
//!
//! A [`Factory`] produces attribute rows for a registered model from a
//! definition closure, layers states and sequences over them, and either
//! builds unsaved models ([`make`](Factory::make)) or stores them
//! ([`create`](Factory::create)). Factory attributes bypass the fillable
//! guard.
//!
//! ```rust
//! use quarry_orm::{Factory, ModelDef, Orm, Registry};
//! use quarry_query::connection::{testing::RecordingDriver, Connection};
//! use quarry_query::row;
//!
//! let conn = Connection::new("main", RecordingDriver::new());
//! let registry = Registry::new();
//! registry.register(ModelDef::new("User").timestamps(false));
//! let orm = Orm::new(&conn, &registry);
//!
//! let users = Factory::new("User", |i| row! { "name" => format!("user{i}"), "admin" => false })
//!     .state(|_| row! { "admin" => true })
//!     .count(3)
//!     .make(orm)?;
//! assert_eq!(users.len(), 3);
//! # Ok::<(), quarry_query::QueryError>(())
//! ```

use std::fmt;
use std::sync::Arc;

use quarry_query::{QueryResult, Row};
use tracing::{debug, info};

use crate::model::Model;
use crate::orm::Orm;

/// Builds the base attributes of the `n`-th model of a batch.
pub type Definition = Arc<dyn Fn(usize) -> Row + Send + Sync>;

/// Overrides merged over the definition; sees the attributes so far.
pub type State = Arc<dyn Fn(&Row) -> Row + Send + Sync>;

/// Runs on every model a factory builds.
pub type AfterMaking = Arc<dyn Fn(&mut Model) + Send + Sync>;

/// Runs on every model a factory stores.
pub type AfterCreating = Arc<dyn Fn(&mut Model, Orm<'_>) -> QueryResult<()> + Send + Sync>;

enum Layer {
    State(State),
    Sequence(Vec<Row>),
}

/// Generates models of one registered type.
#[derive(Clone)]
pub struct Factory {
    model: String,
    definition: Definition,
    layers: Vec<Arc<Layer>>,
    count: usize,
    after_making: Vec<AfterMaking>,
    after_creating: Vec<AfterCreating>,
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("model", &self.model)
            .field("layers", &self.layers.len())
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

impl Factory {
    /// A factory for `model` producing one model per call by default.
    pub fn new<F>(model: impl Into<String>, definition: F) -> Self
    where
        F: Fn(usize) -> Row + Send + Sync + 'static,
    {
        Self {
            model: model.into(),
            definition: Arc::new(definition),
            layers: Vec::new(),
            count: 1,
            after_making: Vec::new(),
            after_creating: Vec::new(),
        }
    }

    /// Model name the factory builds.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Number of models each call produces.
    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Alias of [`count`](Self::count).
    pub fn times(self, count: usize) -> Self {
        self.count(count)
    }

    /// Merge the attributes `state` returns over the definition.
    ///
    /// States apply in the order they were added.
    pub fn state<F>(mut self, state: F) -> Self
    where
        F: Fn(&Row) -> Row + Send + Sync + 'static,
    {
        self.layers.push(Arc::new(Layer::State(Arc::new(state))));
        self
    }

    /// Merge fixed attributes over the definition.
    pub fn with(self, attributes: Row) -> Self {
        self.state(move |_| attributes.clone())
    }

    /// Cycle through `rows`: the `n`-th model of a batch gets
    /// `rows[n % rows.len()]`.
    pub fn sequence<I>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = Row>,
    {
        let rows: Vec<Row> = rows.into_iter().collect();
        if !rows.is_empty() {
            self.layers.push(Arc::new(Layer::Sequence(rows)));
        }
        self
    }

    /// Run `callback` on each model after it is built.
    pub fn after_making<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Model) + Send + Sync + 'static,
    {
        self.after_making.push(Arc::new(callback));
        self
    }

    /// Run `callback` on each model after it is stored.
    pub fn after_creating<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Model, Orm<'_>) -> QueryResult<()> + Send + Sync + 'static,
    {
        self.after_creating.push(Arc::new(callback));
        self
    }

    /// Attribute rows for one batch, without touching any model.
    pub fn raw(&self) -> Vec<Row> {
        (0..self.count).map(|index| self.attributes(index)).collect()
    }

    fn attributes(&self, index: usize) -> Row {
        let mut attributes = (self.definition)(index);
        for layer in &self.layers {
            let overrides = match layer.as_ref() {
                Layer::State(state) => state(&attributes),
                Layer::Sequence(rows) => rows[index % rows.len()].clone(),
            };
            attributes.extend(overrides);
        }
        attributes
    }

    /// Build `count` unsaved models.
    pub fn make(&self, orm: Orm<'_>) -> QueryResult<Vec<Model>> {
        let def = orm.def(&self.model)?;
        let mut models = Vec::with_capacity(self.count);
        for index in 0..self.count {
            let mut model = orm.make(Arc::clone(&def));
            model.force_fill(self.attributes(index))?;
            for callback in &self.after_making {
                callback(&mut model);
            }
            models.push(model);
        }
        debug!(model = %self.model, count = models.len(), "factory made models");
        Ok(models)
    }

    /// Build and store `count` models.
    ///
    /// A model whose save a listener halts is returned unsaved and skips
    /// the after-creating callbacks.
    pub fn create(&self, orm: Orm<'_>) -> QueryResult<Vec<Model>> {
        let mut models = self.make(orm)?;
        for model in &mut models {
            if !model.save(orm)? {
                continue;
            }
            for callback in &self.after_creating {
                callback(model, orm)?;
            }
        }
        debug!(model = %self.model, count = models.len(), "factory created models");
        Ok(models)
    }

    /// Build a single unsaved model, ignoring the configured count.
    pub fn make_one(&self, orm: Orm<'_>) -> QueryResult<Model> {
        let mut models = self.clone().count(1).make(orm)?;
        Ok(models.remove(0))
    }

    /// Build and store a single model, ignoring the configured count.
    pub fn create_one(&self, orm: Orm<'_>) -> QueryResult<Model> {
        let mut models = self.clone().count(1).create(orm)?;
        Ok(models.remove(0))
    }
}

/// Fills the database with known data.
pub trait Seeder {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Insert this seeder's data.
    fn run(&self, orm: Orm<'_>) -> QueryResult<()>;

    /// Run other seeders in order, stopping at the first failure.
    fn call(&self, orm: Orm<'_>, seeders: &[&dyn Seeder]) -> QueryResult<()> {
        for seeder in seeders {
            info!(seeder = seeder.name(), "seeding");
            seeder.run(orm)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ModelDef;
    use crate::registry::Registry;
    use pretty_assertions::assert_eq;
    use quarry_query::connection::{Connection, testing::RecordingDriver};
    use quarry_query::{Value, row};
    use parking_lot::Mutex;

    fn registry() -> Registry {
        let registry = Registry::new();
        registry.register(ModelDef::new("User").timestamps(false).fillable(["name"]));
        registry
    }

    fn users() -> Factory {
        Factory::new("User", |i| row! { "name" => format!("user{}", i), "admin" => false })
    }

    #[test]
    fn test_make_applies_states_in_order() {
        let conn = Connection::new("test", RecordingDriver::new());
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let models = users()
            .state(|_| row! { "admin" => true })
            .state(|attrs| row! { "name" => format!("{}!", attrs["name"]) })
            .times(2)
            .make(orm)
            .unwrap();

        assert_eq!(models.len(), 2);
        assert!(!models[0].exists());
        assert_eq!(models[1].get_raw("name"), Some(&Value::from("user1!")));
        assert_eq!(models[1].get_raw("admin"), Some(&Value::from(true)));
    }

    #[test]
    fn test_sequence_cycles_through_rows() {
        let rows = users()
            .sequence([row! { "admin" => true }, row! { "admin" => false }])
            .count(3)
            .raw();
        let admins: Vec<_> = rows.iter().map(|row| row["admin"].clone()).collect();
        assert_eq!(admins, vec![Value::from(true), Value::from(false), Value::from(true)]);
    }

    #[test]
    fn test_create_stores_each_model_and_runs_callbacks() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let made = Arc::new(Mutex::new(0));
        let created = Arc::new(Mutex::new(Vec::new()));
        let made_count = Arc::clone(&made);
        let created_keys = Arc::clone(&created);
        let models = users()
            .count(2)
            .after_making(move |_| *made_count.lock() += 1)
            .after_creating(move |model, _| {
                created_keys.lock().push(model.get_key());
                Ok(())
            })
            .create(orm)
            .unwrap();

        assert!(models.iter().all(Model::exists));
        assert_eq!(*made.lock(), 2);
        assert_eq!(*created.lock(), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(
            log.statements(),
            vec![r#"INSERT INTO "users" ("name", "admin") VALUES (?, ?)"#; 2]
        );
    }

    #[test]
    fn test_factory_ignores_fillable_guard() {
        let conn = Connection::new("test", RecordingDriver::new());
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let user = users().make_one(orm).unwrap();
        assert_eq!(user.get_raw("admin"), Some(&Value::from(false)));
    }

    #[test]
    fn test_unknown_model_fails() {
        let conn = Connection::new("test", RecordingDriver::new());
        let registry = registry();
        let orm = Orm::new(&conn, &registry);
        assert!(Factory::new("Ghost", |_| Row::new()).make(orm).is_err());
    }

    struct UserSeeder;

    impl Seeder for UserSeeder {
        fn run(&self, orm: Orm<'_>) -> QueryResult<()> {
            users().count(2).create(orm).map(|_| ())
        }
    }

    struct DatabaseSeeder;

    impl Seeder for DatabaseSeeder {
        fn name(&self) -> &str {
            "database"
        }

        fn run(&self, orm: Orm<'_>) -> QueryResult<()> {
            self.call(orm, &[&UserSeeder, &UserSeeder])
        }
    }

    #[test]
    fn test_seeder_calls_children_in_order() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        DatabaseSeeder.run(orm).unwrap();
        assert_eq!(log.len(), 4);
        assert!(UserSeeder.name().ends_with("UserSeeder"));
    }
}

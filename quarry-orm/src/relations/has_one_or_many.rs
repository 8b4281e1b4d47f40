//! Has-one and has-many relations.

use std::collections::HashMap;
use std::sync::Arc;

use quarry_query::{KeyValue, QueryError, QueryResult, Value};

use super::collect_keys;
use crate::definition::ModelDef;
use crate::model::{Model, Relationship};
use crate::orm::Orm;
use crate::query::ModelQuery;

/// Related rows carry a foreign key pointing at the parent.
#[derive(Debug, Clone)]
pub struct HasOneOrMany<'o> {
    orm: Orm<'o>,
    query: ModelQuery<'o>,
    parent: Arc<ModelDef>,
    foreign_key: String,
    local_key: String,
    parent_key_value: Option<Value>,
    many: bool,
}

impl<'o> HasOneOrMany<'o> {
    pub(crate) fn new(
        orm: Orm<'o>,
        query: ModelQuery<'o>,
        parent: &Arc<ModelDef>,
        foreign_key: &str,
        local_key: Option<&str>,
        many: bool,
    ) -> Self {
        Self {
            orm,
            query,
            parent: Arc::clone(parent),
            foreign_key: foreign_key.to_string(),
            local_key: local_key.unwrap_or(parent.key_name()).to_string(),
            parent_key_value: None,
            many,
        }
    }

    /// Foreign key column on the related table.
    pub fn foreign_key_name(&self) -> &str {
        &self.foreign_key
    }

    /// `related_table.foreign_key`.
    pub fn qualified_foreign_key_name(&self) -> String {
        self.query.def().qualify(&self.foreign_key)
    }

    /// Parent column the foreign key references.
    pub fn local_key_name(&self) -> &str {
        &self.local_key
    }

    /// Definition of the parent model.
    pub fn parent(&self) -> &Arc<ModelDef> {
        &self.parent
    }

    pub(crate) fn add_constraints(&mut self, parent: &Model) {
        let value = parent.get_raw(&self.local_key).cloned().unwrap_or(Value::Null);
        let column = self.qualified_foreign_key_name();
        self.query = self
            .query
            .clone()
            .where_eq(column.clone(), value.clone())
            .where_not_null(column);
        self.parent_key_value = Some(value);
    }

    pub(crate) fn add_eager_constraints(&mut self, models: &[Model]) -> bool {
        let keys = collect_keys(models, &self.local_key);
        if keys.is_empty() {
            return false;
        }
        let column = self.qualified_foreign_key_name();
        self.query = self.query.clone().where_in(column, keys);
        true
    }

    pub(crate) fn match_models(&self, models: &mut [Model], results: Vec<Model>, name: &str) {
        let mut dictionary: HashMap<KeyValue, Vec<Model>> = HashMap::new();
        for result in results {
            if let Some(key) = result.get_raw(&self.foreign_key).and_then(Value::as_key) {
                dictionary.entry(key).or_default().push(result);
            }
        }

        for model in models {
            let matched = model
                .get_raw(&self.local_key)
                .and_then(Value::as_key)
                .and_then(|key| dictionary.get(&key));
            let value = if self.many {
                Relationship::Many(matched.cloned().unwrap_or_default())
            } else {
                Relationship::One(matched.and_then(|all| all.first()).cloned().map(Box::new))
            };
            model.set_relation(name, value);
        }
    }

    pub(crate) fn query(&self) -> &ModelQuery<'o> {
        &self.query
    }

    pub(crate) fn query_mut(&mut self) -> &mut ModelQuery<'o> {
        &mut self.query
    }

    /// Every related model.
    pub fn get(&self) -> QueryResult<Vec<Model>> {
        self.query.get()
    }

    /// The first related model.
    pub fn first(&self) -> QueryResult<Option<Model>> {
        self.query.first()
    }

    fn parent_value(&self) -> QueryResult<Value> {
        match &self.parent_key_value {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(QueryError::invalid_query(format!(
                "{} relation needs a saved {} parent",
                self.query.def().name(),
                self.parent.name()
            ))),
        }
    }

    /// Point `model` at the parent and save it.
    pub fn save(&self, model: &mut Model) -> QueryResult<bool> {
        model.set_raw(self.foreign_key.clone(), self.parent_value()?);
        model.save(self.orm)
    }

    /// Save each of `models` under the parent.
    pub fn save_many(&self, models: &mut [Model]) -> QueryResult<()> {
        for model in models {
            self.save(model)?;
        }
        Ok(())
    }

    /// Create a related model from `attributes` under the parent.
    pub fn create<I, K, V>(&self, attributes: I) -> QueryResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let parent_value = self.parent_value()?;
        let mut model = self.orm.make(Arc::clone(self.query.def()));
        model.fill(attributes)?;
        model.set_raw(self.foreign_key.clone(), parent_value);
        model.save(self.orm)?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::relations::Relation;
    use pretty_assertions::assert_eq;
    use quarry_query::connection::{testing::RecordingDriver, Connection};
    use quarry_query::row;

    fn registry() -> Registry {
        let registry = Registry::new();
        registry.register(ModelDef::new("User").has_many("posts", "Post").has_one("profile", "Profile"));
        registry.register(ModelDef::new("Post").fillable(["title"]).timestamps(false));
        registry.register(ModelDef::new("Profile"));
        registry
    }

    #[test]
    fn test_eager_has_many_runs_one_query_for_all_parents() {
        let driver = RecordingDriver::new()
            .queue_rows(vec![
                row! { "id" => 1, "name" => "ann" },
                row! { "id" => 2, "name" => "bob" },
                row! { "id" => 3, "name" => "cyd" },
            ])
            .queue_rows(vec![
                row! { "id" => 10, "user_id" => 1 },
                row! { "id" => 11, "user_id" => 1 },
                row! { "id" => 12, "user_id" => 3 },
            ]);
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let users = orm.query("User").unwrap().with(["posts"]).get().unwrap();

        assert_eq!(log.len(), 2);
        let entries = log.entries();
        assert_eq!(entries[1].0, r#"SELECT * FROM "posts" WHERE "posts"."user_id" IN (?, ?, ?)"#);
        assert_eq!(entries[1].1, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

        let counts: Vec<usize> = users.iter().map(|u| u.related_many("posts").len()).collect();
        assert_eq!(counts, vec![2, 0, 1]);
        assert!(users.iter().all(|u| u.relation_loaded("posts")));
    }

    #[test]
    fn test_eager_load_without_parents_runs_no_relation_query() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let users = orm.query("User").unwrap().with(["posts"]).get().unwrap();
        assert!(users.is_empty());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_eager_load_skips_query_when_no_keys() {
        let driver = RecordingDriver::new().queue_rows(vec![row! { "name" => "keyless" }]);
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let users = orm.query("User").unwrap().with(["posts"]).get().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(users[0].relation("posts"), Some(&Relationship::Many(vec![])));
    }

    #[test]
    fn test_has_one_matches_first_result() {
        let driver = RecordingDriver::new()
            .queue_rows(vec![row! { "id" => 1 }, row! { "id" => 2 }])
            .queue_rows(vec![row! { "id" => 7, "user_id" => 2 }]);
        let conn = Connection::new("test", driver);
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let users = orm.query("User").unwrap().with(["profile"]).get().unwrap();
        assert!(users[0].related_one("profile").is_none());
        assert_eq!(users[1].related_one("profile").unwrap().get_key(), Value::Int(7));
    }

    #[test]
    fn test_create_sets_foreign_key() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let user = Model::hydrate(registry.get("User").unwrap(), row! { "id" => 4 });
        let mut relation = Relation::new(orm, user.def(), "posts").unwrap();
        relation.add_constraints(&user);
        let posts = relation.into_has_one_or_many().unwrap();

        let post = posts.create([("title", "hello")]).unwrap();
        assert!(post.exists());
        assert_eq!(post.get_raw("user_id"), Some(&Value::Int(4)));
        assert_eq!(
            log.entries()[0],
            (
                r#"INSERT INTO "posts" ("title", "user_id") VALUES (?, ?)"#.to_string(),
                vec![Value::from("hello"), Value::Int(4)]
            )
        );
    }
}

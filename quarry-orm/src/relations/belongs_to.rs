//! Belongs-to relations.

use std::collections::HashMap;

use quarry_query::{KeyValue, QueryResult, Value};

use super::collect_keys;
use crate::model::{Model, Relationship};
use crate::query::ModelQuery;

/// The child row carries a foreign key pointing at its owner.
#[derive(Debug, Clone)]
pub struct BelongsTo<'o> {
    query: ModelQuery<'o>,
    relation: String,
    foreign_key: String,
    owner_key: String,
    child_key_value: Option<Value>,
}

impl<'o> BelongsTo<'o> {
    pub(crate) fn new(query: ModelQuery<'o>, relation: &str, foreign_key: &str, owner_key: Option<&str>) -> Self {
        let owner_key = owner_key.unwrap_or(query.def().key_name()).to_string();
        Self {
            query,
            relation: relation.to_string(),
            foreign_key: foreign_key.to_string(),
            owner_key,
            child_key_value: None,
        }
    }

    /// Foreign key column on the child table.
    pub fn foreign_key_name(&self) -> &str {
        &self.foreign_key
    }

    /// Column on the owner table the foreign key references.
    pub fn owner_key_name(&self) -> &str {
        &self.owner_key
    }

    pub(crate) fn add_constraints(&mut self, child: &Model) {
        let value = child.get_raw(&self.foreign_key).cloned().unwrap_or(Value::Null);
        let column = self.query.def().qualify(&self.owner_key);
        self.query = self.query.clone().where_eq(column, value.clone());
        self.child_key_value = Some(value);
    }

    pub(crate) fn add_eager_constraints(&mut self, models: &[Model]) -> bool {
        let keys = collect_keys(models, &self.foreign_key);
        if keys.is_empty() {
            return false;
        }
        let column = self.query.def().qualify(&self.owner_key);
        self.query = self.query.clone().where_in(column, keys);
        true
    }

    pub(crate) fn match_models(&self, models: &mut [Model], results: Vec<Model>, name: &str) {
        let mut dictionary: HashMap<KeyValue, Model> = HashMap::new();
        for result in results {
            if let Some(key) = result.get_raw(&self.owner_key).and_then(Value::as_key) {
                dictionary.entry(key).or_insert(result);
            }
        }
        for model in models {
            let owner = model
                .get_raw(&self.foreign_key)
                .and_then(Value::as_key)
                .and_then(|key| dictionary.get(&key))
                .cloned();
            model.set_relation(name, Relationship::One(owner.map(Box::new)));
        }
    }

    pub(crate) fn query(&self) -> &ModelQuery<'o> {
        &self.query
    }

    pub(crate) fn query_mut(&mut self) -> &mut ModelQuery<'o> {
        &mut self.query
    }

    /// The owner, or `None` without running a query when the child's
    /// foreign key is null.
    pub fn first(&self) -> QueryResult<Option<Model>> {
        if matches!(&self.child_key_value, Some(value) if value.is_null()) {
            return Ok(None);
        }
        self.query.first()
    }

    /// Every matching owner (eager loading).
    pub fn get(&self) -> QueryResult<Vec<Model>> {
        self.query.get()
    }

    /// Point `child` at `owner` and cache `owner` as the loaded relation.
    /// The child is not saved.
    pub fn associate(&self, child: &mut Model, owner: &Model) {
        let key = owner.get_raw(&self.owner_key).cloned().unwrap_or(Value::Null);
        child.set_raw(self.foreign_key.clone(), key);
        child.set_relation(self.relation.clone(), Relationship::One(Some(Box::new(owner.clone()))));
    }

    /// Clear the child's foreign key and loaded relation. The child is not
    /// saved.
    pub fn dissociate(&self, child: &mut Model) {
        child.set_raw(self.foreign_key.clone(), Value::Null);
        child.set_relation(self.relation.clone(), Relationship::One(None));
    }
}

//! Model instances.
//!
//! A [`Model`] is a row of one model type: the current `attributes`, the
//! `original` snapshot taken when the model was loaded or last saved, and
//! the `changes` written by the last save. Attribute access goes through
//! the definition's casts and accessor/mutator transforms; the raw map is
//! available through [`Model::get_raw`] and [`Model::attributes`].
//!
//! Saving and deleting are implemented next to the query layer, in
//! `persist.rs`; relation loading lives in [`relations`](crate::relations).

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;
use quarry_query::{QueryError, QueryResult, Row, Value};
use serde::{Serialize, Serializer};

use crate::definition::ModelDef;

/// Loaded value of a relation.
#[derive(Debug, Clone, PartialEq)]
pub enum Relationship {
    /// Result of a has-one or belongs-to relation.
    One(Option<Box<Model>>),
    /// Result of a has-many or belongs-to-many relation.
    Many(Vec<Model>),
}

impl Relationship {
    /// The single related model, if this is a loaded to-one relation.
    pub fn as_one(&self) -> Option<&Model> {
        match self {
            Self::One(model) => model.as_deref(),
            Self::Many(_) => None,
        }
    }

    /// The related models; a to-one relation yields zero or one.
    pub fn as_many(&self) -> &[Model] {
        match self {
            Self::One(Some(model)) => std::slice::from_ref(model.as_ref()),
            Self::One(None) => &[],
            Self::Many(models) => models,
        }
    }

    /// Mutable access to the related models.
    pub fn as_many_mut(&mut self) -> &mut [Model] {
        match self {
            Self::One(Some(model)) => std::slice::from_mut(model.as_mut()),
            Self::One(None) => &mut [],
            Self::Many(models) => models,
        }
    }

    /// Number of related models.
    pub fn len(&self) -> usize {
        self.as_many().len()
    }

    /// Whether nothing is related.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::One(Some(model)) => model.to_json(),
            Self::One(None) => serde_json::Value::Null,
            Self::Many(models) => serde_json::Value::Array(models.iter().map(Model::to_json).collect()),
        }
    }
}

/// One row of a model type.
#[derive(Debug, Clone)]
pub struct Model {
    def: Arc<ModelDef>,
    attributes: Row,
    original: Row,
    changes: Row,
    relations: IndexMap<String, Relationship>,
    pivot: Option<Row>,
    pub(crate) exists: bool,
    pub(crate) was_recently_created: bool,
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.def.name() == other.def.name()
            && self.attributes == other.attributes
            && self.relations == other.relations
            && self.exists == other.exists
    }
}

impl Model {
    /// A new, unsaved instance carrying the definition's default attributes.
    pub fn new(def: Arc<ModelDef>) -> Self {
        let attributes = def.defaults().clone();
        let mut model = Self {
            def,
            attributes,
            original: Row::new(),
            changes: Row::new(),
            relations: IndexMap::new(),
            pivot: None,
            exists: false,
            was_recently_created: false,
        };
        model.sync_original();
        model
    }

    /// An instance of a row loaded from the database; nothing is dirty.
    pub fn hydrate(def: Arc<ModelDef>, row: Row) -> Self {
        Self {
            def,
            original: row.clone(),
            attributes: row,
            changes: Row::new(),
            relations: IndexMap::new(),
            pivot: None,
            exists: true,
            was_recently_created: false,
        }
    }

    /// The model definition.
    pub fn def(&self) -> &Arc<ModelDef> {
        &self.def
    }

    /// Model name.
    pub fn name(&self) -> &str {
        self.def.name()
    }

    /// Whether the model has a row in the database.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Whether the model was inserted during the current lifetime.
    pub fn was_recently_created(&self) -> bool {
        self.was_recently_created
    }

    // ============== Keys ==============

    /// Primary key column.
    pub fn get_key_name(&self) -> &str {
        self.def.key_name()
    }

    /// Primary key value, `Null` when unset.
    pub fn get_key(&self) -> Value {
        self.attributes
            .get(self.def.key_name())
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Key identifying the stored row: the original key if it was changed.
    pub(crate) fn key_for_save(&self) -> Value {
        self.original
            .get(self.def.key_name())
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or_else(|| self.get_key())
    }

    // ============== Attributes ==============

    /// Every raw attribute.
    pub fn attributes(&self) -> &Row {
        &self.attributes
    }

    /// Raw value of `key`, bypassing casts and accessors.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Store `value` under `key`, bypassing casts and mutators.
    pub fn set_raw(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Remove `key` from the attributes.
    pub fn unset(&mut self, key: &str) -> Option<Value> {
        self.attributes.shift_remove(key)
    }

    /// Whether `key` is present in the attributes.
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Value of `key` after its cast and accessor; `Null` when absent.
    pub fn get(&self, key: &str) -> QueryResult<Value> {
        let raw = self.attributes.get(key).cloned().unwrap_or(Value::Null);
        let value = match self.def.cast_for(key) {
            Some(cast) => cast.get(key, &raw)?,
            None => raw,
        };
        Ok(match self.def.accessor_for(key) {
            Some(accessor) => accessor(value),
            None => value,
        })
    }

    /// Assign `value` to `key` through its mutator and cast.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> QueryResult<()> {
        let key = key.into();
        let value = self.transform_for_set(&key, value.into())?;
        self.attributes.insert(key, value);
        Ok(())
    }

    fn transform_for_set(&self, key: &str, value: Value) -> QueryResult<Value> {
        let value = match self.def.mutator_for(key) {
            Some(mutator) => mutator(value),
            None => value,
        };
        match self.def.cast_for(key) {
            Some(cast) => cast.set(key, &value),
            None => Ok(value),
        }
    }

    // ============== Mass Assignment ==============

    /// Whether `key` may be mass assigned.
    pub fn is_fillable(&self, key: &str) -> bool {
        self.def.is_fillable(key)
    }

    /// Whether `key` is on the deny-list.
    pub fn is_guarded(&self, key: &str) -> bool {
        self.def.is_guarded(key)
    }

    /// Whether every attribute is guarded.
    pub fn total_guarded(&self) -> bool {
        self.def.is_totally_guarded()
    }

    /// Mass assign `attributes`.
    ///
    /// A key that is not fillable fails the whole call with a mass
    /// assignment error when the model declares an allow-list or is
    /// totally guarded; otherwise the key is skipped. On error nothing is
    /// assigned.
    pub fn fill<I, K, V>(&mut self, attributes: I) -> QueryResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let strict = self.def.is_totally_guarded() || self.def.has_fillable();
        let mut staged = Vec::new();
        for (key, value) in attributes {
            let key = key.into();
            if !self.def.is_fillable(&key) {
                if strict {
                    return Err(QueryError::mass_assignment(self.def.name(), key));
                }
                continue;
            }
            let value = self.transform_for_set(&key, value.into())?;
            staged.push((key, value));
        }
        self.attributes.extend(staged);
        Ok(self)
    }

    /// Assign `attributes` without the fillable check.
    pub fn force_fill<I, K, V>(&mut self, attributes: I) -> QueryResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in attributes {
            self.set(key, value)?;
        }
        Ok(self)
    }

    // ============== Dirty Tracking ==============

    /// Snapshot the current attributes as the original state.
    pub fn sync_original(&mut self) -> &mut Self {
        self.original = self.attributes.clone();
        self
    }

    /// Snapshot a single attribute.
    pub fn sync_original_attribute(&mut self, key: &str) -> &mut Self {
        match self.attributes.get(key) {
            Some(value) => {
                self.original.insert(key.to_string(), value.clone());
            }
            None => {
                self.original.shift_remove(key);
            }
        }
        self
    }

    /// Record the currently dirty attributes as the last changes.
    pub fn sync_changes(&mut self) -> &mut Self {
        self.changes = self.get_dirty();
        self
    }

    /// The whole original snapshot.
    pub fn original(&self) -> &Row {
        &self.original
    }

    /// Original value of `key`.
    pub fn get_original(&self, key: &str) -> Option<&Value> {
        self.original.get(key)
    }

    /// Attributes that differ from the original snapshot.
    pub fn get_dirty(&self) -> Row {
        self.attributes
            .iter()
            .filter(|(key, _)| !self.original_is_equivalent(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Whether any attribute differs from the original snapshot.
    pub fn is_dirty(&self) -> bool {
        self.attributes.keys().any(|key| !self.original_is_equivalent(key))
    }

    /// Whether `key` differs from the original snapshot.
    pub fn is_attribute_dirty(&self, key: &str) -> bool {
        self.attributes.contains_key(key) && !self.original_is_equivalent(key)
    }

    /// Whether no attribute is dirty.
    pub fn is_clean(&self) -> bool {
        !self.is_dirty()
    }

    /// Attributes written by the last save.
    pub fn get_changes(&self) -> &Row {
        &self.changes
    }

    /// Whether the last save wrote anything.
    pub fn was_changed(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Whether the last save wrote `key`.
    pub fn was_attribute_changed(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }

    /// Attribute equality within the declared cast. Uncast attributes
    /// compare numerically when both sides are numbers and by their
    /// rendered text otherwise.
    fn original_is_equivalent(&self, key: &str) -> bool {
        let (Some(current), Some(original)) = (self.attributes.get(key), self.original.get(key)) else {
            return false;
        };
        if current == original {
            return true;
        }
        if current.is_null() || original.is_null() {
            return false;
        }
        match self.def.cast_for(key) {
            Some(cast) => cast.equivalent(key, current, original),
            None if current.is_numeric() && original.is_numeric() => {
                current.as_f64() == original.as_f64()
            }
            None => current.to_string() == original.to_string(),
        }
    }

    // ============== Timestamps & Soft Deletes ==============

    /// Current time at second precision, as stored in timestamp columns.
    pub fn fresh_timestamp() -> NaiveDateTime {
        let now = Utc::now();
        DateTime::from_timestamp(now.timestamp(), 0)
            .unwrap_or(now)
            .naive_utc()
    }

    /// Stamp `updated_at` (and `created_at` for new models) unless the
    /// caller already set them.
    pub fn update_timestamps(&mut self) {
        if !self.def.uses_timestamps() {
            return;
        }
        let now = Value::DateTime(Self::fresh_timestamp());
        let created_at = self.def.created_at_column().to_string();
        if !self.exists && !self.is_attribute_dirty(&created_at) {
            self.attributes.insert(created_at, now.clone());
        }
        let updated_at = self.def.updated_at_column().to_string();
        if !self.is_attribute_dirty(&updated_at) {
            self.attributes.insert(updated_at, now);
        }
    }

    /// Whether the model is soft deleted.
    pub fn trashed(&self) -> bool {
        self.def
            .deleted_at_column()
            .and_then(|column| self.attributes.get(column))
            .is_some_and(|value| !value.is_null())
    }

    // ============== Relations ==============

    /// A loaded relation.
    pub fn relation(&self, name: &str) -> Option<&Relationship> {
        self.relations.get(name)
    }

    /// Mutable access to a loaded relation.
    pub fn relation_mut(&mut self, name: &str) -> Option<&mut Relationship> {
        self.relations.get_mut(name)
    }

    /// Whether `name` has been loaded.
    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    /// Every loaded relation.
    pub fn relations(&self) -> &IndexMap<String, Relationship> {
        &self.relations
    }

    /// Store a loaded relation.
    pub fn set_relation(&mut self, name: impl Into<String>, value: Relationship) -> &mut Self {
        self.relations.insert(name.into(), value);
        self
    }

    /// Forget a loaded relation.
    pub fn unset_relation(&mut self, name: &str) -> Option<Relationship> {
        self.relations.shift_remove(name)
    }

    /// The related model of a loaded to-one relation.
    pub fn related_one(&self, name: &str) -> Option<&Model> {
        self.relations.get(name).and_then(Relationship::as_one)
    }

    /// The related models of a loaded relation; empty when not loaded.
    pub fn related_many(&self, name: &str) -> &[Model] {
        self.relations.get(name).map(Relationship::as_many).unwrap_or(&[])
    }

    /// Pivot row of a model loaded through a many-to-many relation.
    pub fn pivot(&self) -> Option<&Row> {
        self.pivot.as_ref()
    }

    /// Move the aliased pivot `columns` (`{prefix}{column}`) into the pivot
    /// row. Other attributes are left alone even when they share the prefix.
    pub(crate) fn extract_pivot(&mut self, prefix: &str, columns: &[String]) {
        let mut pivot = Row::new();
        for column in columns {
            let alias = format!("{}{}", prefix, column);
            if let Some(value) = self.attributes.shift_remove(&alias) {
                pivot.insert(column.clone(), value);
            }
            self.original.shift_remove(&alias);
        }
        if !pivot.is_empty() {
            self.pivot = Some(pivot);
        }
    }

    // ============== Copies & Identity ==============

    /// An unsaved copy without the key, timestamps and `except` attributes.
    pub fn replicate(&self, except: &[&str]) -> Model {
        let mut skip: Vec<&str> = vec![self.def.key_name()];
        if self.def.uses_timestamps() {
            skip.push(self.def.created_at_column());
            skip.push(self.def.updated_at_column());
        }
        skip.extend_from_slice(except);

        let mut copy = Model::new(Arc::clone(&self.def));
        for (key, value) in &self.attributes {
            if !skip.contains(&key.as_str()) {
                copy.attributes.insert(key.clone(), value.clone());
            }
        }
        copy.relations = self.relations.clone();
        copy
    }

    /// Whether both instances stand for the same stored row.
    pub fn is_same(&self, other: &Model) -> bool {
        let key = self.get_key();
        !key.is_null()
            && key.as_key() == other.get_key().as_key()
            && self.def.table_name() == other.def.table_name()
            && self.def.connection_name() == other.def.connection_name()
    }

    // ============== Serialization ==============

    /// JSON object of the visible attributes (cast and transformed), loaded
    /// relations and the pivot row.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for key in self.attributes.keys() {
            if !self.def.is_visible(key) {
                continue;
            }
            let value = self
                .get(key)
                .unwrap_or_else(|_| self.attributes[key.as_str()].clone());
            object.insert(key.clone(), value.to_json());
        }
        for (name, relation) in &self.relations {
            if self.def.is_visible(name) {
                object.insert(name.clone(), relation.to_json());
            }
        }
        if let Some(pivot) = &self.pivot {
            let pivot = pivot
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect();
            object.insert("pivot".to_string(), serde_json::Value::Object(pivot));
        }
        serde_json::Value::Object(object)
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

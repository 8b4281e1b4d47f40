//! Model definitions.
//!
//! A [`ModelDef`] describes one model type: its table, keys, mass
//! assignment rules, casts, attribute transforms, relations and scopes.
//! Definitions are built once at startup and registered on a
//! [`Registry`](crate::Registry); instances share them through an `Arc`.
//!
//! ```rust
//! use quarry_orm::{Cast, ModelDef};
//!
//! let user = ModelDef::new("User")
//!     .fillable(["name", "email"])
//!     .hidden(["password"])
//!     .cast("is_admin", Cast::Bool)
//!     .has_many("posts", "Post");
//!
//! assert_eq!(user.table_name(), "users");
//! assert!(user.relation_def("posts").is_some());
//! ```

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use quarry_query::{QueryBuilder, Row, Value};

use crate::cast::Cast;
use crate::naming;
use crate::relations::{PivotDef, RelationDef};
use crate::scope::{LocalScope, Scope, SoftDeletingScope};

/// Per-key value transform used for accessors and mutators.
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Name under which the soft delete scope is registered.
pub const SOFT_DELETES: &str = "soft_deletes";

/// Description of a model type.
#[derive(Clone)]
pub struct ModelDef {
    name: String,
    table: String,
    primary_key: String,
    incrementing: bool,
    timestamps: bool,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
    connection: Option<String>,
    per_page: u64,
    fillable: Vec<String>,
    guarded: Vec<String>,
    hidden: Vec<String>,
    visible: Vec<String>,
    casts: IndexMap<String, Cast>,
    accessors: IndexMap<String, Transform>,
    mutators: IndexMap<String, Transform>,
    defaults: Row,
    relations: IndexMap<String, RelationDef>,
    global_scopes: IndexMap<String, Arc<dyn Scope>>,
    local_scopes: IndexMap<String, LocalScope>,
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .field("global_scopes", &self.global_scopes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ModelDef {
    /// A definition for model `name` with the conventional defaults:
    /// table is the snake-case plural of the name, `id` is an
    /// auto-incrementing key, timestamps are on and every attribute is
    /// guarded.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: naming::table_name(&name),
            name,
            primary_key: "id".to_string(),
            incrementing: true,
            timestamps: true,
            created_at: "created_at".to_string(),
            updated_at: "updated_at".to_string(),
            deleted_at: None,
            connection: None,
            per_page: 15,
            fillable: Vec::new(),
            guarded: vec!["*".to_string()],
            hidden: Vec::new(),
            visible: Vec::new(),
            casts: IndexMap::new(),
            accessors: IndexMap::new(),
            mutators: IndexMap::new(),
            defaults: Row::new(),
            relations: IndexMap::new(),
            global_scopes: IndexMap::new(),
            local_scopes: IndexMap::new(),
        }
    }

    // ============== Builder ==============

    /// Set the table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Set the primary key column.
    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    /// Whether the key is generated by the database.
    pub fn incrementing(mut self, incrementing: bool) -> Self {
        self.incrementing = incrementing;
        self
    }

    /// Turn automatic `created_at`/`updated_at` maintenance on or off.
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Rename the timestamp columns.
    pub fn timestamp_columns(mut self, created_at: impl Into<String>, updated_at: impl Into<String>) -> Self {
        self.created_at = created_at.into();
        self.updated_at = updated_at.into();
        self
    }

    /// Enable soft deletes on `deleted_at`.
    pub fn soft_deletes(self) -> Self {
        self.soft_deletes_on("deleted_at")
    }

    /// Enable soft deletes on a custom column.
    pub fn soft_deletes_on(mut self, column: impl Into<String>) -> Self {
        self.deleted_at = Some(column.into());
        self.global_scopes
            .insert(SOFT_DELETES.to_string(), Arc::new(SoftDeletingScope));
        self
    }

    /// Use a named connection instead of the default one.
    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }

    /// Default page size for pagination.
    pub fn per_page(mut self, per_page: u64) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    /// Attributes open to mass assignment.
    pub fn fillable<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fillable = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Attributes closed to mass assignment; `"*"` closes everything.
    pub fn guarded<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.guarded = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Open every attribute to mass assignment.
    pub fn unguarded(mut self) -> Self {
        self.guarded.clear();
        self
    }

    /// Attributes left out of serialization.
    pub fn hidden<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden = keys.into_iter().map(Into::into).collect();
        self
    }

    /// If non-empty, the only attributes serialized.
    pub fn visible<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.visible = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Cast `key` to `cast` on read and write.
    pub fn cast(mut self, key: impl Into<String>, cast: Cast) -> Self {
        self.casts.insert(key.into(), cast);
        self
    }

    /// Transform applied when `key` is read.
    pub fn accessor(mut self, key: impl Into<String>, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.accessors.insert(key.into(), Arc::new(f));
        self
    }

    /// Transform applied when `key` is assigned.
    pub fn mutator(mut self, key: impl Into<String>, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.mutators.insert(key.into(), Arc::new(f));
        self
    }

    /// Attribute value every new instance starts with.
    pub fn default_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Declare a relation.
    pub fn relation(mut self, name: impl Into<String>, relation: RelationDef) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    /// `name` is one `related` whose `{model}_id` points at this model.
    pub fn has_one(self, name: impl Into<String>, related: impl Into<String>) -> Self {
        let foreign_key = naming::foreign_key(&self.name, "id");
        self.relation(name, RelationDef::HasOne {
            related: related.into(),
            foreign_key,
            local_key: None,
        })
    }

    /// `name` is every `related` whose `{model}_id` points at this model.
    pub fn has_many(self, name: impl Into<String>, related: impl Into<String>) -> Self {
        let foreign_key = naming::foreign_key(&self.name, "id");
        self.relation(name, RelationDef::HasMany {
            related: related.into(),
            foreign_key,
            local_key: None,
        })
    }

    /// `name` is the `related` this model's `{name}_id` points at.
    pub fn belongs_to(self, name: impl Into<String>, related: impl Into<String>) -> Self {
        let name = name.into();
        let foreign_key = naming::foreign_key(&name, "id");
        self.relation(name, RelationDef::BelongsTo {
            related: related.into(),
            foreign_key,
            owner_key: None,
        })
    }

    /// `name` is every `related` linked through the conventional pivot
    /// table (both singular names, alphabetical, joined by `_`).
    pub fn belongs_to_many(self, name: impl Into<String>, related: impl Into<String>) -> Self {
        let related = related.into();
        let pivot = PivotDef::new(
            naming::pivot_table(&self.name, &related),
            naming::foreign_key(&self.name, "id"),
            naming::foreign_key(&related, "id"),
        );
        self.relation(name, RelationDef::BelongsToMany { related, pivot })
    }

    /// Register a global scope applied to every query of this model.
    pub fn global_scope(mut self, name: impl Into<String>, scope: impl Scope + 'static) -> Self {
        self.global_scopes.insert(name.into(), Arc::new(scope));
        self
    }

    /// Register a named local scope, applied with
    /// [`ModelQuery::scope`](crate::ModelQuery::scope).
    pub fn local_scope<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: for<'c> Fn(QueryBuilder<'c>) -> QueryBuilder<'c> + Send + Sync + 'static,
    {
        self.local_scopes.insert(name.into(), Arc::new(f));
        self
    }

    // ============== Accessors ==============

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Primary key column.
    pub fn key_name(&self) -> &str {
        &self.primary_key
    }

    /// `table.key`.
    pub fn qualified_key_name(&self) -> String {
        self.qualify(&self.primary_key)
    }

    /// Prefix `column` with the table name.
    pub fn qualify(&self, column: &str) -> String {
        if column.contains('.') {
            column.to_string()
        } else {
            format!("{}.{}", self.table, column)
        }
    }

    /// Whether the key is generated by the database.
    pub fn is_incrementing(&self) -> bool {
        self.incrementing
    }

    /// Whether timestamps are maintained.
    pub fn uses_timestamps(&self) -> bool {
        self.timestamps
    }

    /// `created_at` column name.
    pub fn created_at_column(&self) -> &str {
        &self.created_at
    }

    /// `updated_at` column name.
    pub fn updated_at_column(&self) -> &str {
        &self.updated_at
    }

    /// Soft delete column, if soft deletes are enabled.
    pub fn deleted_at_column(&self) -> Option<&str> {
        self.deleted_at.as_deref()
    }

    /// Whether soft deletes are enabled.
    pub fn uses_soft_deletes(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Connection name, `None` for the default connection.
    pub fn connection_name(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    /// Default page size.
    pub fn default_per_page(&self) -> u64 {
        self.per_page
    }

    /// Default attribute values.
    pub fn defaults(&self) -> &Row {
        &self.defaults
    }

    /// Cast declared for `key`. Timestamp and soft delete columns are
    /// datetimes unless declared otherwise.
    pub fn cast_for(&self, key: &str) -> Option<Cast> {
        if let Some(cast) = self.casts.get(key) {
            return Some(*cast);
        }
        let is_date_column = (self.timestamps && (key == self.created_at || key == self.updated_at))
            || self.deleted_at.as_deref() == Some(key);
        is_date_column.then_some(Cast::DateTime)
    }

    pub(crate) fn accessor_for(&self, key: &str) -> Option<&Transform> {
        self.accessors.get(key)
    }

    pub(crate) fn mutator_for(&self, key: &str) -> Option<&Transform> {
        self.mutators.get(key)
    }

    /// A declared relation.
    pub fn relation_def(&self, name: &str) -> Option<&RelationDef> {
        self.relations.get(name)
    }

    /// Names of declared relations, in declaration order.
    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// Global scopes in registration order.
    pub fn global_scopes(&self) -> impl Iterator<Item = (&str, &Arc<dyn Scope>)> {
        self.global_scopes.iter().map(|(name, scope)| (name.as_str(), scope))
    }

    pub(crate) fn local_scope_for(&self, name: &str) -> Option<&LocalScope> {
        self.local_scopes.get(name)
    }

    // ============== Mass Assignment ==============

    /// Whether every attribute is guarded: nothing fillable and `guarded = ["*"]`.
    pub fn is_totally_guarded(&self) -> bool {
        self.fillable.is_empty() && self.guarded.len() == 1 && self.guarded[0] == "*"
    }

    /// Whether an allow-list is declared.
    pub fn has_fillable(&self) -> bool {
        !self.fillable.is_empty()
    }

    /// Whether `key` is on the deny-list.
    pub fn is_guarded(&self, key: &str) -> bool {
        self.guarded.iter().any(|g| g == "*" || g == key)
    }

    /// Whether `key` may be mass assigned.
    ///
    /// Keys on the allow-list are fillable. Without an allow-list, any key
    /// that is not guarded is fillable.
    pub fn is_fillable(&self, key: &str) -> bool {
        if self.fillable.iter().any(|f| f == key) {
            return true;
        }
        if self.is_guarded(key) {
            return false;
        }
        self.fillable.is_empty() && !key.starts_with('_')
    }

    /// Whether `key` is serialized.
    pub fn is_visible(&self, key: &str) -> bool {
        if !self.visible.is_empty() && !self.visible.iter().any(|v| v == key) {
            return false;
        }
        !self.hidden.iter().any(|h| h == key)
    }
}

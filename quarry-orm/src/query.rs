//! The model query builder.
//!
//! [`ModelQuery`] wraps a [`QueryBuilder`] for one model type. Reads
//! hydrate rows into [`Model`]s and then eager load the requested
//! relations: one additional query per relation (and per nesting level),
//! however many parents were loaded.
//!
//! Global scopes are applied when the query runs, so they can still be
//! removed with [`ModelQuery::without_global_scope`] after other
//! constraints were added.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use quarry_query::ast::{BindingKind, Query, Where};
use quarry_query::{
    Boolean, Paginator, QueryBuilder, QueryError, QueryResult, Row, SimplePaginator, SortOrder,
    Value,
};
use tracing::{debug, trace};

use crate::definition::{ModelDef, SOFT_DELETES};
use crate::events::ModelEvent;
use crate::model::Model;
use crate::orm::Orm;
use crate::relations::Relation;

/// Constraint applied to the query of an eager-loaded relation.
pub type EagerConstraint<'o> = Rc<dyn Fn(ModelQuery<'o>) -> ModelQuery<'o> + 'o>;

#[derive(Clone)]
pub(crate) struct EagerLoad<'o> {
    name: String,
    constraint: Option<EagerConstraint<'o>>,
}

impl fmt::Debug for EagerLoad<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerLoad")
            .field("name", &self.name)
            .field("constrained", &self.constraint.is_some())
            .finish()
    }
}

/// A query returning models of one type.
#[derive(Clone)]
pub struct ModelQuery<'o> {
    orm: Orm<'o>,
    def: Arc<ModelDef>,
    query: QueryBuilder<'o>,
    eager: Vec<EagerLoad<'o>>,
    removed_scopes: Vec<String>,
    without_scopes: bool,
}

impl fmt::Debug for ModelQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelQuery")
            .field("model", &self.def.name())
            .field("query", self.query.query())
            .field("eager", &self.eager)
            .field("removed_scopes", &self.removed_scopes)
            .finish()
    }
}

impl<'o> ModelQuery<'o> {
    pub(crate) fn new(orm: Orm<'o>, def: Arc<ModelDef>) -> QueryResult<Self> {
        let connection = orm.connection_for(&def)?;
        let query = connection.table(def.table_name());
        Ok(Self {
            orm,
            def,
            query,
            eager: Vec::new(),
            removed_scopes: Vec::new(),
            without_scopes: false,
        })
    }

    /// Definition of the queried model.
    pub fn def(&self) -> &Arc<ModelDef> {
        &self.def
    }

    /// The ORM handle this query runs through.
    pub fn orm(&self) -> Orm<'o> {
        self.orm
    }

    /// The underlying builder, without global scopes.
    pub fn query(&self) -> &QueryBuilder<'o> {
        &self.query
    }

    /// Transform the underlying builder.
    pub fn constrain(mut self, f: impl FnOnce(QueryBuilder<'o>) -> QueryBuilder<'o>) -> Self {
        self.query = f(self.query);
        self
    }

    // ============== Constraints ==============

    /// `column operator value`.
    pub fn r#where(self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constrain(|q| q.r#where(column, operator, value))
    }

    /// `column = value`.
    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constrain(|q| q.where_eq(column, value))
    }

    /// `OR column operator value`.
    pub fn or_where(self, column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constrain(|q| q.or_where(column, operator, value))
    }

    /// One `column = value` per entry.
    pub fn where_all<I, K, V>(self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.constrain(|q| q.where_all(attributes))
    }

    /// `column IN (values)`.
    pub fn where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.constrain(|q| q.where_in(column, values))
    }

    /// `column NOT IN (values)`.
    pub fn where_not_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.constrain(|q| q.where_not_in(column, values))
    }

    /// `column IS NULL`.
    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.constrain(|q| q.where_null(column))
    }

    /// `column IS NOT NULL`.
    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.constrain(|q| q.where_not_null(column))
    }

    /// `column BETWEEN low AND high`.
    pub fn where_between(self, column: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.constrain(|q| q.where_between(column, low, high))
    }

    /// A parenthesized group built on the underlying builder.
    pub fn where_nested(self, f: impl FnOnce(QueryBuilder<'o>) -> QueryBuilder<'o>) -> Self {
        self.constrain(|q| q.where_nested(f))
    }

    /// Primary key equals `id`.
    pub fn where_key(self, id: impl Into<Value>) -> Self {
        let column = self.def.qualified_key_name();
        self.where_eq(column, id)
    }

    /// Primary key in `ids`.
    pub fn where_key_in<I, V>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let column = self.def.qualified_key_name();
        self.where_in(column, ids)
    }

    /// Select only `columns`.
    pub fn select<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constrain(|q| q.select(columns))
    }

    /// `ORDER BY column direction`.
    pub fn order_by(self, column: impl Into<String>, direction: SortOrder) -> Self {
        self.constrain(|q| q.order_by(column, direction))
    }

    /// Newest first by the creation timestamp.
    pub fn latest(self) -> Self {
        let column = self.def.qualify(self.def.created_at_column());
        self.constrain(|q| q.latest(column))
    }

    /// Oldest first by the creation timestamp.
    pub fn oldest(self) -> Self {
        let column = self.def.qualify(self.def.created_at_column());
        self.constrain(|q| q.oldest(column))
    }

    /// `LIMIT limit`.
    pub fn limit(self, limit: u64) -> Self {
        self.constrain(|q| q.limit(limit))
    }

    /// `OFFSET offset`.
    pub fn offset(self, offset: u64) -> Self {
        self.constrain(|q| q.offset(offset))
    }

    /// Apply `f` when `condition` holds.
    pub fn when(self, condition: bool, f: impl FnOnce(Self) -> Self) -> Self {
        if condition { f(self) } else { self }
    }

    // ============== Scopes ==============

    /// Apply the named local scope.
    pub fn scope(self, name: &str) -> QueryResult<Self> {
        let scope = self
            .def
            .local_scope_for(name)
            .cloned()
            .ok_or_else(|| QueryError::scope_not_found(self.def.name(), name))?;
        Ok(self.constrain(|q| scope(q)))
    }

    /// Skip the named global scope.
    pub fn without_global_scope(mut self, name: impl Into<String>) -> Self {
        self.removed_scopes.push(name.into());
        self
    }

    /// Skip every global scope.
    pub fn without_global_scopes(mut self) -> Self {
        self.without_scopes = true;
        self
    }

    /// Include soft-deleted rows.
    pub fn with_trashed(self) -> Self {
        self.without_global_scope(SOFT_DELETES)
    }

    /// Only soft-deleted rows.
    pub fn only_trashed(self) -> Self {
        match self.def.deleted_at_column() {
            Some(column) => {
                let column = self.def.qualify(column);
                self.with_trashed().where_not_null(column)
            }
            None => self,
        }
    }

    fn scope_is_active(&self, name: &str) -> bool {
        !self.without_scopes && !self.removed_scopes.iter().any(|removed| removed == name)
    }

    /// The builder with every active global scope applied.
    ///
    /// When user constraints contain an `OR`, they are grouped first so a
    /// scope cannot be bypassed by operator precedence.
    pub fn to_base(&self) -> QueryBuilder<'o> {
        let scopes: Vec<_> = self
            .def
            .global_scopes()
            .filter(|(name, _)| self.scope_is_active(name))
            .map(|(_, scope)| Arc::clone(scope))
            .collect();
        let mut query = self.query.clone();
        if scopes.is_empty() {
            return query;
        }
        group_or_wheres(query.query_mut());
        for scope in scopes {
            query = scope.apply(query, &self.def);
        }
        query
    }

    /// Compiled SQL of the scoped query.
    pub fn to_sql(&self) -> QueryResult<String> {
        self.to_base().to_sql()
    }

    // ============== Eager Loading ==============

    /// Eager load relations; dotted names (`posts.comments`) load nested
    /// relations level by level.
    pub fn with<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in relations {
            self.add_eager(name.into(), None);
        }
        self
    }

    /// Eager load `relation`, constraining its query with `f`.
    pub fn with_constrained<F>(mut self, relation: impl Into<String>, f: F) -> Self
    where
        F: Fn(ModelQuery<'o>) -> ModelQuery<'o> + 'o,
    {
        self.add_eager(relation.into(), Some(Rc::new(f)));
        self
    }

    fn add_eager(&mut self, name: String, constraint: Option<EagerConstraint<'o>>) {
        let mut prefix = String::new();
        for segment in name.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(segment);
            if prefix != name && !self.eager.iter().any(|load| load.name == prefix) {
                self.eager.push(EagerLoad { name: prefix.clone(), constraint: None });
            }
        }
        match self.eager.iter_mut().find(|load| load.name == name) {
            Some(existing) => {
                if constraint.is_some() {
                    existing.constraint = constraint;
                }
            }
            None => self.eager.push(EagerLoad { name, constraint }),
        }
    }

    pub(crate) fn with_loads(mut self, loads: Vec<EagerLoad<'o>>) -> Self {
        for load in loads {
            self.add_eager(load.name, load.constraint);
        }
        self
    }

    /// Eager load the requested relations onto `models`.
    pub(crate) fn eager_load_relations(&self, models: &mut [Model]) -> QueryResult<()> {
        if models.is_empty() {
            return Ok(());
        }
        for load in self.eager.iter().filter(|load| !load.name.contains('.')) {
            let prefix = format!("{}.", load.name);
            let nested: Vec<EagerLoad<'o>> = self
                .eager
                .iter()
                .filter_map(|other| {
                    other.name.strip_prefix(&prefix).map(|rest| EagerLoad {
                        name: rest.to_string(),
                        constraint: other.constraint.clone(),
                    })
                })
                .collect();
            self.eager_load_relation(models, load, nested)?;
        }
        Ok(())
    }

    fn eager_load_relation(
        &self,
        models: &mut [Model],
        load: &EagerLoad<'o>,
        nested: Vec<EagerLoad<'o>>,
    ) -> QueryResult<()> {
        if self.def.relation_def(&load.name).is_none() {
            trace!(model = %self.def.name(), relation = %load.name, "eager load of undeclared relation skipped");
            return Ok(());
        }

        let mut relation = Relation::new(self.orm, &self.def, &load.name)?;
        relation.init_relation(models, &load.name);
        if !relation.add_eager_constraints(models) {
            return Ok(());
        }

        let relation = relation.constrain(|query| {
            let query = query.with_loads(nested);
            match &load.constraint {
                Some(constraint) => constraint(query),
                None => query,
            }
        });
        let results = relation.get_eager()?;
        debug!(
            model = %self.def.name(),
            relation = %load.name,
            parents = models.len(),
            results = results.len(),
            "eager loaded"
        );
        relation.match_models(models, results, &load.name);
        Ok(())
    }

    // ============== Reads ==============

    pub(crate) fn hydrate(&self, rows: Vec<Row>) -> Vec<Model> {
        rows.into_iter()
            .map(|row| {
                let mut model = Model::hydrate(Arc::clone(&self.def), row);
                self.orm.registry().fire(ModelEvent::Retrieved, &mut model);
                model
            })
            .collect()
    }

    fn hydrate_and_load(&self, rows: Vec<Row>) -> QueryResult<Vec<Model>> {
        let mut models = self.hydrate(rows);
        self.eager_load_relations(&mut models)?;
        Ok(models)
    }

    /// Every matching model, with requested relations loaded.
    pub fn get(&self) -> QueryResult<Vec<Model>> {
        let rows = self.to_base().get()?;
        self.hydrate_and_load(rows)
    }

    /// The first matching model.
    pub fn first(&self) -> QueryResult<Option<Model>> {
        Ok(self.clone().limit(1).get()?.into_iter().next())
    }

    /// The first matching model, or a not-found error.
    pub fn first_or_fail(&self) -> QueryResult<Model> {
        self.first()?
            .ok_or_else(|| QueryError::model_not_found(self.def.name(), Vec::new()))
    }

    /// The model with primary key `id`.
    pub fn find(&self, id: impl Into<Value>) -> QueryResult<Option<Model>> {
        self.clone().where_key(id).first()
    }

    /// The models whose keys are in `ids`.
    pub fn find_many<I, V>(&self, ids: I) -> QueryResult<Vec<Model>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.clone().where_key_in(ids).get()
    }

    /// The model with primary key `id`, or a not-found error carrying it.
    pub fn find_or_fail(&self, id: impl Into<Value>) -> QueryResult<Model> {
        let id = id.into();
        self.find(id.clone())?
            .ok_or_else(|| QueryError::model_not_found(self.def.name(), vec![id]))
    }

    /// Whether any model matches.
    pub fn exists(&self) -> QueryResult<bool> {
        self.to_base().exists()
    }

    /// Number of matching models.
    pub fn count(&self) -> QueryResult<u64> {
        self.to_base().count()
    }

    /// Values of one column.
    pub fn pluck(&self, column: impl Into<String>) -> QueryResult<Vec<Value>> {
        self.to_base().pluck(column)
    }

    /// A page of models with the total count; `per_page` defaults to the
    /// model's page size.
    pub fn paginate(&self, per_page: Option<u64>, page: u64) -> QueryResult<Paginator<Model>> {
        let per_page = per_page.unwrap_or_else(|| self.def.default_per_page());
        let page = self.to_base().paginate(per_page, page)?;
        let mut paginator = page.map(|row| Model::hydrate(Arc::clone(&self.def), row));
        for model in &mut paginator.data {
            self.orm.registry().fire(ModelEvent::Retrieved, model);
        }
        self.eager_load_relations(&mut paginator.data)?;
        Ok(paginator)
    }

    /// A page of models without counting.
    pub fn simple_paginate(&self, per_page: Option<u64>, page: u64) -> QueryResult<SimplePaginator<Model>> {
        let per_page = per_page.unwrap_or_else(|| self.def.default_per_page());
        let page = self.to_base().simple_paginate(per_page, page)?;
        let mut paginator = page.map(|row| Model::hydrate(Arc::clone(&self.def), row));
        for model in &mut paginator.data {
            self.orm.registry().fire(ModelEvent::Retrieved, model);
        }
        self.eager_load_relations(&mut paginator.data)?;
        Ok(paginator)
    }

    /// Feed matching models to `f` one page of `size` at a time.
    pub fn chunk<F>(&self, size: u64, mut f: F) -> QueryResult<bool>
    where
        F: FnMut(Vec<Model>, u64) -> QueryResult<bool>,
    {
        self.to_base()
            .chunk(size, |rows, page| f(self.hydrate_and_load(rows)?, page))
    }

    // ============== Lookup or Create ==============

    /// The first model matching `attributes`, or a new unsaved one filled
    /// with `attributes` and `values`.
    pub fn first_or_new(&self, attributes: Row, values: Row) -> QueryResult<Model> {
        if let Some(model) = self.clone().where_all(attributes.clone()).first()? {
            return Ok(model);
        }
        let mut model = self.orm.make(Arc::clone(&self.def));
        model.fill(attributes.into_iter().chain(values))?;
        Ok(model)
    }

    /// Like [`first_or_new`](Self::first_or_new), saving the new model.
    pub fn first_or_create(&self, attributes: Row, values: Row) -> QueryResult<Model> {
        let mut model = self.first_or_new(attributes, values)?;
        if !model.exists() {
            model.save(self.orm)?;
        }
        Ok(model)
    }

    /// Update the first model matching `attributes` with `values`, or
    /// create it.
    pub fn update_or_create(&self, attributes: Row, values: Row) -> QueryResult<Model> {
        let mut model = self.first_or_new(attributes, Row::new())?;
        model.fill(values)?;
        model.save(self.orm)?;
        Ok(model)
    }

    /// Fill a new model with `attributes` and save it.
    pub fn create<I, K, V>(&self, attributes: I) -> QueryResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut model = self.orm.make(Arc::clone(&self.def));
        model.fill(attributes)?;
        model.save(self.orm)?;
        Ok(model)
    }

    /// Create without the fillable check.
    pub fn force_create<I, K, V>(&self, attributes: I) -> QueryResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut model = self.orm.make(Arc::clone(&self.def));
        model.force_fill(attributes)?;
        model.save(self.orm)?;
        Ok(model)
    }

    // ============== Bulk Writes ==============

    /// Update every matching row, touching `updated_at`. No model events fire.
    pub fn update(&self, values: Row) -> QueryResult<u64> {
        let mut values = values;
        if self.def.uses_timestamps() && !values.contains_key(self.def.updated_at_column()) {
            values.insert(
                self.def.updated_at_column().to_string(),
                Value::DateTime(Model::fresh_timestamp()),
            );
        }
        self.to_base().update(values)
    }

    /// Delete every matching row; soft deletes when the model uses them.
    pub fn delete(&self) -> QueryResult<u64> {
        match self.def.deleted_at_column() {
            Some(column) => {
                let now = Value::DateTime(Model::fresh_timestamp());
                let mut values = Row::new();
                values.insert(column.to_string(), now);
                self.update(values)
            }
            None => self.to_base().delete(),
        }
    }

    /// Delete every matching row permanently.
    pub fn force_delete(&self) -> QueryResult<u64> {
        self.to_base().delete()
    }

    /// Restore soft-deleted matching rows.
    pub fn restore(&self) -> QueryResult<u64> {
        let Some(column) = self.def.deleted_at_column() else {
            return Ok(0);
        };
        let mut values = Row::new();
        values.insert(column.to_string(), Value::Null);
        self.clone().with_trashed().update(values)
    }
}

/// Wrap the predicates of `query` in one parenthesized group when any of
/// them is joined with `OR`.
fn group_or_wheres(query: &mut Query) {
    if !query.wheres.iter().any(|w| w.boolean() == Boolean::Or) {
        return;
    }
    let mut group = Query::default();
    for predicate in std::mem::take(&mut query.wheres) {
        group.push_where(predicate);
    }
    query.bindings.clear(BindingKind::Where);
    query.push_where(Where::Nested {
        query: Box::new(group),
        boolean: Boolean::And,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use pretty_assertions::assert_eq;
    use quarry_query::connection::{testing::RecordingDriver, Connection};
    use quarry_query::{row, ErrorCode};

    fn registry() -> Registry {
        let registry = Registry::new();
        registry.register(
            ModelDef::new("Post")
                .fillable(["title", "user_id"])
                .soft_deletes()
                .local_scope("published", |q| q.where_eq("published", true)),
        );
        registry.register(ModelDef::new("User").has_many("posts", "Post"));
        registry
    }

    #[test]
    fn test_soft_delete_scope_applied_and_removable() {
        let conn = Connection::new("test", RecordingDriver::new());
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let query = orm.query("Post").unwrap().where_eq("title", "a");
        assert_eq!(
            query.to_sql().unwrap(),
            r#"SELECT * FROM "posts" WHERE "title" = ? AND "posts"."deleted_at" IS NULL"#
        );
        assert_eq!(
            query.clone().with_trashed().to_sql().unwrap(),
            r#"SELECT * FROM "posts" WHERE "title" = ?"#
        );
        assert_eq!(
            query.only_trashed().to_sql().unwrap(),
            r#"SELECT * FROM "posts" WHERE "title" = ? AND "posts"."deleted_at" IS NOT NULL"#
        );
    }

    #[test]
    fn test_or_constraints_grouped_before_scopes() {
        let conn = Connection::new("test", RecordingDriver::new());
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let base = orm
            .query("Post")
            .unwrap()
            .where_eq("title", "a")
            .or_where("title", "=", "b")
            .to_base();
        assert_eq!(
            base.to_sql().unwrap(),
            r#"SELECT * FROM "posts" WHERE ("title" = ? OR "title" = ?) AND "posts"."deleted_at" IS NULL"#
        );
        assert_eq!(base.get_bindings(), vec![Value::from("a"), Value::from("b")]);
    }

    #[test]
    fn test_local_scope() {
        let conn = Connection::new("test", RecordingDriver::new());
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let sql = orm
            .query("Post")
            .unwrap()
            .with_trashed()
            .scope("published")
            .unwrap()
            .to_sql()
            .unwrap();
        assert_eq!(sql, r#"SELECT * FROM "posts" WHERE "published" = ?"#);

        let err = orm.query("Post").unwrap().scope("drafts").unwrap_err();
        assert_eq!(err.code, ErrorCode::ScopeNotFound);
    }

    #[test]
    fn test_get_hydrates_clean_models() {
        let driver = RecordingDriver::new()
            .queue_rows(vec![row! { "id" => 1, "title" => "a" }, row! { "id" => 2, "title" => "b" }]);
        let conn = Connection::new("test", driver);
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let posts = orm.query("Post").unwrap().get().unwrap();
        assert_eq!(posts.len(), 2);
        assert!(posts.iter().all(|p| p.exists() && p.is_clean()));
    }

    #[test]
    fn test_find_or_fail_reports_model_and_key() {
        let conn = Connection::new("test", RecordingDriver::new());
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let err = orm.query("Post").unwrap().find_or_fail(42).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.context.model.as_deref(), Some("Post"));
    }

    #[test]
    fn test_with_registers_nested_prefixes() {
        let conn = Connection::new("test", RecordingDriver::new());
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        let query = orm.query("User").unwrap().with(["posts.comments", "posts"]);
        let names: Vec<&str> = query.eager.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["posts", "posts.comments"]);
    }

    #[test]
    fn test_bulk_soft_delete_updates_deleted_at() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = registry();
        let orm = Orm::new(&conn, &registry);

        orm.query("Post").unwrap().where_eq("user_id", 3).delete().unwrap();
        let statements = log.statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with(r#"UPDATE "posts" SET "deleted_at" = ?, "updated_at" = ?"#));
    }
}

//! Many-to-many relations through a pivot table.
//!
//! Related models are selected together with their pivot columns, aliased
//! `pivot_{column}`; after hydration those attributes move into
//! [`Model::pivot`]. Pivot writes ([`attach`](BelongsToMany::attach),
//! [`detach`](BelongsToMany::detach), [`sync`](BelongsToMany::sync),
//! [`toggle`](BelongsToMany::toggle)) go straight to the pivot table and
//! require a relation constrained to one parent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use quarry_query::{KeyValue, QueryBuilder, QueryError, QueryResult, Row, Value};
use serde::Serialize;
use tracing::debug;

use super::{collect_keys, PivotDef};
use crate::definition::ModelDef;
use crate::model::{Model, Relationship};
use crate::orm::Orm;
use crate::query::ModelQuery;

const PIVOT_PREFIX: &str = "pivot_";

/// Outcome of a pivot synchronization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncResult {
    /// Related ids newly attached.
    pub attached: Vec<Value>,
    /// Related ids detached.
    pub detached: Vec<Value>,
    /// Related ids whose pivot row was updated.
    pub updated: Vec<Value>,
}

/// Parent and related rows linked through a pivot table.
#[derive(Debug, Clone)]
pub struct BelongsToMany<'o> {
    orm: Orm<'o>,
    query: ModelQuery<'o>,
    parent: Arc<ModelDef>,
    relation: String,
    pivot: PivotDef,
    parent_key: String,
    related_key: String,
    parent_key_value: Option<Value>,
    pivot_wheres: Vec<(String, Value)>,
}

impl<'o> BelongsToMany<'o> {
    pub(crate) fn new(
        orm: Orm<'o>,
        query: ModelQuery<'o>,
        parent: &Arc<ModelDef>,
        relation: &str,
        pivot: PivotDef,
    ) -> Self {
        let related = Arc::clone(query.def());
        let parent_key = pivot
            .parent_key
            .clone()
            .unwrap_or_else(|| parent.key_name().to_string());
        let related_key = pivot
            .related_key
            .clone()
            .unwrap_or_else(|| related.key_name().to_string());

        let mut columns = vec![format!("{}.*", related.table_name())];
        columns.extend(pivot.selected_columns().iter().map(|c| pivot_alias(&pivot.table, c)));
        let join_first = related.qualify(&related_key);
        let join_second = format!("{}.{}", pivot.table, pivot.related_pivot_key);
        let pivot_table = pivot.table.clone();
        let query = query.constrain(|q| {
            q.select(columns)
                .join(pivot_table, join_first, "=", join_second)
        });

        Self {
            orm,
            query,
            parent: Arc::clone(parent),
            relation: relation.to_string(),
            pivot,
            parent_key,
            related_key,
            parent_key_value: None,
            pivot_wheres: Vec::new(),
        }
    }

    /// Pivot table description.
    pub fn pivot(&self) -> &PivotDef {
        &self.pivot
    }

    /// Relation name on the parent.
    pub fn relation_name(&self) -> &str {
        &self.relation
    }

    fn qualified_foreign_pivot_key(&self) -> String {
        format!("{}.{}", self.pivot.table, self.pivot.foreign_pivot_key)
    }

    pub(crate) fn add_constraints(&mut self, parent: &Model) {
        let value = parent.get_raw(&self.parent_key).cloned().unwrap_or(Value::Null);
        let column = self.qualified_foreign_pivot_key();
        self.query = self.query.clone().where_eq(column, value.clone());
        self.parent_key_value = Some(value);
    }

    pub(crate) fn add_eager_constraints(&mut self, models: &[Model]) -> bool {
        let keys = collect_keys(models, &self.parent_key);
        if keys.is_empty() {
            return false;
        }
        let column = self.qualified_foreign_pivot_key();
        self.query = self.query.clone().where_in(column, keys);
        true
    }

    pub(crate) fn match_models(&self, models: &mut [Model], results: Vec<Model>, name: &str) {
        let mut dictionary: HashMap<KeyValue, Vec<Model>> = HashMap::new();
        for result in results {
            let key = result
                .pivot()
                .and_then(|pivot| pivot.get(&self.pivot.foreign_pivot_key))
                .and_then(Value::as_key);
            if let Some(key) = key {
                dictionary.entry(key).or_default().push(result);
            }
        }
        for model in models {
            let matched = model
                .get_raw(&self.parent_key)
                .and_then(Value::as_key)
                .and_then(|key| dictionary.get(&key))
                .cloned()
                .unwrap_or_default();
            model.set_relation(name, Relationship::Many(matched));
        }
    }

    pub(crate) fn query(&self) -> &ModelQuery<'o> {
        &self.query
    }

    pub(crate) fn query_mut(&mut self) -> &mut ModelQuery<'o> {
        &mut self.query
    }

    /// Every related model, with its pivot row.
    pub fn get(&self) -> QueryResult<Vec<Model>> {
        let mut models = self.query.get()?;
        let columns = self.pivot.selected_columns();
        for model in &mut models {
            model.extract_pivot(PIVOT_PREFIX, &columns);
        }
        Ok(models)
    }

    // ============== Pivot Options ==============

    /// Load extra pivot columns.
    pub fn with_pivot<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let added: Vec<String> = columns
            .into_iter()
            .map(Into::into)
            .filter(|column| !self.pivot.selected_columns().contains(column))
            .collect();
        let selects: Vec<String> = added.iter().map(|c| pivot_alias(&self.pivot.table, c)).collect();
        self.pivot.columns.extend(added);
        self.query = self.query.clone().constrain(|q| q.add_select(selects));
        self
    }

    /// Maintain and load `created_at`/`updated_at` on pivot rows.
    pub fn with_timestamps(mut self) -> Self {
        if self.pivot.timestamps {
            return self;
        }
        let existing = self.pivot.selected_columns();
        self.pivot.timestamps = true;
        let selects: Vec<String> = self
            .pivot
            .selected_columns()
            .into_iter()
            .filter(|c| !existing.contains(c))
            .map(|c| pivot_alias(&self.pivot.table, &c))
            .collect();
        self.query = self.query.clone().constrain(|q| q.add_select(selects));
        self
    }

    /// Only pivot rows where `column = value`; also restricts pivot writes.
    pub fn where_pivot(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        let qualified = format!("{}.{}", self.pivot.table, column);
        self.query = self.query.clone().where_eq(qualified, value.clone());
        self.pivot_wheres.push((column, value));
        self
    }

    // ============== Pivot Writes ==============

    fn parent_value(&self) -> QueryResult<Value> {
        match &self.parent_key_value {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(QueryError::invalid_query(format!(
                "pivot operations on {} need a saved {} parent",
                self.pivot.table,
                self.parent.name()
            ))),
        }
    }

    fn pivot_query(&self) -> QueryResult<QueryBuilder<'o>> {
        let parent = self.parent_value()?;
        let connection = self.orm.connection_for(&self.parent)?;
        let query = connection
            .table(self.pivot.table.clone())
            .where_eq(self.pivot.foreign_pivot_key.clone(), parent);
        Ok(self
            .pivot_wheres
            .iter()
            .fold(query, |q, (column, value)| q.where_eq(column.clone(), value.clone())))
    }

    fn pivot_record(&self, parent: &Value, id: Value, extra: Row) -> Row {
        let mut record = Row::new();
        record.insert(self.pivot.foreign_pivot_key.clone(), parent.clone());
        record.insert(self.pivot.related_pivot_key.clone(), id);
        for (column, value) in &self.pivot_wheres {
            record.insert(column.clone(), value.clone());
        }
        record.extend(extra);
        if self.pivot.timestamps {
            let now = Value::DateTime(Model::fresh_timestamp());
            for column in ["created_at", "updated_at"] {
                if !record.contains_key(column) {
                    record.insert(column.to_string(), now.clone());
                }
            }
        }
        record
    }

    /// Insert one pivot row linking the parent to `id`, with `extra` pivot
    /// columns.
    pub fn attach(&self, id: impl Into<Value>, extra: Row) -> QueryResult<()> {
        self.attach_many([(id.into(), extra)])
    }

    /// Insert one pivot row per `(id, extra)` record.
    pub fn attach_many<I>(&self, records: I) -> QueryResult<()>
    where
        I: IntoIterator<Item = (Value, Row)>,
    {
        let parent = self.parent_value()?;
        let rows: Vec<Row> = records
            .into_iter()
            .map(|(id, extra)| self.pivot_record(&parent, id, extra))
            .collect();
        if rows.is_empty() {
            return Ok(());
        }
        let connection = self.orm.connection_for(&self.parent)?;
        // Rows with different extra columns cannot share one statement.
        let uniform = rows.windows(2).all(|pair| {
            pair[0].len() == pair[1].len() && pair[0].keys().zip(pair[1].keys()).all(|(a, b)| a == b)
        });
        if uniform {
            connection.table(self.pivot.table.clone()).insert(rows)?;
        } else {
            for row in rows {
                connection.table(self.pivot.table.clone()).insert([row])?;
            }
        }
        Ok(())
    }

    /// Delete pivot rows for `ids`, or every pivot row of the parent when
    /// `ids` is `None`. Returns the number of rows removed.
    pub fn detach(&self, ids: Option<Vec<Value>>) -> QueryResult<u64> {
        let query = self.pivot_query()?;
        let query = match ids {
            Some(ids) if ids.is_empty() => return Ok(0),
            Some(ids) => query.where_in(self.pivot.related_pivot_key.clone(), ids),
            None => query,
        };
        query.delete()
    }

    /// Related ids currently attached to the parent.
    pub fn current_ids(&self) -> QueryResult<Vec<Value>> {
        self.pivot_query()?.pluck(self.pivot.related_pivot_key.clone())
    }

    /// Update the pivot row of `id`; returns the number of rows changed.
    pub fn update_existing_pivot(&self, id: impl Into<Value>, attributes: Row) -> QueryResult<u64> {
        let mut attributes = attributes;
        if self.pivot.timestamps && !attributes.contains_key("updated_at") {
            attributes.insert("updated_at".to_string(), Value::DateTime(Model::fresh_timestamp()));
        }
        if attributes.is_empty() {
            return Ok(0);
        }
        self.pivot_query()?
            .where_eq(self.pivot.related_pivot_key.clone(), id.into())
            .update(attributes)
    }

    /// Make `ids` exactly the attached set.
    pub fn sync<I, V>(&self, ids: I) -> QueryResult<SyncResult>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.sync_with(ids.into_iter().map(|id| (id.into(), Row::new())), true)
    }

    /// Attach the missing `ids` and keep everything else.
    pub fn sync_without_detaching<I, V>(&self, ids: I) -> QueryResult<SyncResult>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.sync_with(ids.into_iter().map(|id| (id.into(), Row::new())), false)
    }

    /// Synchronize against `(id, pivot attributes)` records.
    ///
    /// Ids attached but absent from `records` are detached when
    /// `detaching` is set. Missing ids are attached with their attributes;
    /// ids already attached get their pivot row updated when attributes are
    /// given.
    pub fn sync_with<I>(&self, records: I, detaching: bool) -> QueryResult<SyncResult>
    where
        I: IntoIterator<Item = (Value, Row)>,
    {
        let mut result = SyncResult::default();
        let current = self.current_ids()?;
        let current_keys: HashSet<KeyValue> = current.iter().filter_map(Value::as_key).collect();

        let mut seen = HashSet::new();
        let records: Vec<(Value, Row)> = records
            .into_iter()
            .filter(|(id, _)| id.as_key().is_some_and(|key| seen.insert(key)))
            .collect();

        if detaching {
            let detach: Vec<Value> = current
                .iter()
                .filter(|id| id.as_key().is_some_and(|key| !seen.contains(&key)))
                .cloned()
                .collect();
            if !detach.is_empty() {
                self.detach(Some(detach.clone()))?;
                result.detached = detach;
            }
        }

        let mut to_attach = Vec::new();
        for (id, attributes) in records {
            let attached = id.as_key().is_some_and(|key| current_keys.contains(&key));
            if !attached {
                result.attached.push(id.clone());
                to_attach.push((id, attributes));
            } else if !attributes.is_empty() && self.update_existing_pivot(id.clone(), attributes)? > 0 {
                result.updated.push(id);
            }
        }
        self.attach_many(to_attach)?;

        debug!(
            table = %self.pivot.table,
            attached = result.attached.len(),
            detached = result.detached.len(),
            updated = result.updated.len(),
            "pivot synced"
        );
        Ok(result)
    }

    /// Detach the attached ids among `ids` and attach the rest.
    pub fn toggle<I, V>(&self, ids: I) -> QueryResult<SyncResult>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let current: HashSet<KeyValue> = self.current_ids()?.iter().filter_map(Value::as_key).collect();
        let mut result = SyncResult::default();
        let mut seen = HashSet::new();
        for id in ids.into_iter().map(Into::into) {
            let Some(key) = id.as_key() else { continue };
            if !seen.insert(key.clone()) {
                continue;
            }
            if current.contains(&key) {
                result.detached.push(id);
            } else {
                result.attached.push(id);
            }
        }
        if !result.detached.is_empty() {
            self.detach(Some(result.detached.clone()))?;
        }
        self.attach_many(result.attached.iter().map(|id| (id.clone(), Row::new())))?;
        Ok(result)
    }

    // ============== Related Writes ==============

    /// Save `model` and attach it with `extra` pivot columns.
    pub fn save(&self, model: &mut Model, extra: Row) -> QueryResult<bool> {
        self.parent_value()?;
        if !model.save(self.orm)? {
            return Ok(false);
        }
        let id = model.get_raw(&self.related_key).cloned().unwrap_or(Value::Null);
        self.attach(id, extra)?;
        Ok(true)
    }

    /// Create a related model from `attributes` and attach it.
    pub fn create<I, K, V>(&self, attributes: I, extra: Row) -> QueryResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut model = self.orm.make(Arc::clone(self.query.def()));
        model.fill(attributes)?;
        self.save(&mut model, extra)?;
        Ok(model)
    }
}

fn pivot_alias(table: &str, column: &str) -> String {
    format!("{}.{} as {}{}", table, column, PIVOT_PREFIX, column)
}

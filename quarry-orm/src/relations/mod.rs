//! The relation engine.
//!
//! A [`RelationDef`] is the stateless description declared on a
//! [`ModelDef`]. Resolving it produces a [`Relation`]: a query on the
//! related model that is either constrained to one parent
//! ([`Relation::add_constraints`]) or batched across many parents for eager
//! loading ([`Relation::add_eager_constraints`]), followed by
//! [`Relation::match_models`], which hands each parent its share of the
//! results.

mod belongs_to;
mod belongs_to_many;
mod has_one_or_many;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::{BelongsToMany, SyncResult};
pub use has_one_or_many::HasOneOrMany;

use std::collections::HashSet;
use std::sync::Arc;

use quarry_query::{QueryError, QueryResult, Value};

use crate::definition::ModelDef;
use crate::model::{Model, Relationship};
use crate::orm::Orm;
use crate::query::ModelQuery;

/// Pivot table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotDef {
    /// Pivot table name.
    pub table: String,
    /// Pivot column referencing the parent.
    pub foreign_pivot_key: String,
    /// Pivot column referencing the related model.
    pub related_pivot_key: String,
    /// Parent column the pivot references; the parent's primary key by default.
    pub parent_key: Option<String>,
    /// Related column the pivot references; the related primary key by default.
    pub related_key: Option<String>,
    /// Extra pivot columns loaded with the related models.
    pub columns: Vec<String>,
    /// Whether the pivot table carries `created_at`/`updated_at`.
    pub timestamps: bool,
}

impl PivotDef {
    /// A pivot table with its two key columns.
    pub fn new(
        table: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            foreign_pivot_key: foreign_pivot_key.into(),
            related_pivot_key: related_pivot_key.into(),
            parent_key: None,
            related_key: None,
            columns: Vec::new(),
            timestamps: false,
        }
    }

    /// Reference a parent column other than its primary key.
    pub fn parent_key(mut self, key: impl Into<String>) -> Self {
        self.parent_key = Some(key.into());
        self
    }

    /// Reference a related column other than its primary key.
    pub fn related_key(mut self, key: impl Into<String>) -> Self {
        self.related_key = Some(key.into());
        self
    }

    /// Load extra pivot columns.
    pub fn with_pivot<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Maintain `created_at`/`updated_at` on pivot rows.
    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    /// Every pivot column selected alongside the related model.
    pub(crate) fn selected_columns(&self) -> Vec<String> {
        let mut columns = vec![self.foreign_pivot_key.clone(), self.related_pivot_key.clone()];
        for column in &self.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        if self.timestamps {
            for column in ["created_at", "updated_at"] {
                if !columns.iter().any(|c| c == column) {
                    columns.push(column.to_string());
                }
            }
        }
        columns
    }
}

/// Declared relation between two models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationDef {
    /// One related row holds `foreign_key` pointing at the parent's `local_key`.
    HasOne {
        /// Related model name.
        related: String,
        /// Column on the related table.
        foreign_key: String,
        /// Parent column; the parent's primary key by default.
        local_key: Option<String>,
    },
    /// Many related rows hold `foreign_key` pointing at the parent's `local_key`.
    HasMany {
        /// Related model name.
        related: String,
        /// Column on the related table.
        foreign_key: String,
        /// Parent column; the parent's primary key by default.
        local_key: Option<String>,
    },
    /// The parent holds `foreign_key` pointing at the related `owner_key`.
    BelongsTo {
        /// Related model name.
        related: String,
        /// Column on the parent table.
        foreign_key: String,
        /// Related column; the related primary key by default.
        owner_key: Option<String>,
    },
    /// Parent and related rows are linked through a pivot table.
    BelongsToMany {
        /// Related model name.
        related: String,
        /// Pivot table description.
        pivot: PivotDef,
    },
}

impl RelationDef {
    /// Has-one with explicit keys.
    pub fn has_one(related: impl Into<String>, foreign_key: impl Into<String>, local_key: Option<&str>) -> Self {
        Self::HasOne {
            related: related.into(),
            foreign_key: foreign_key.into(),
            local_key: local_key.map(str::to_string),
        }
    }

    /// Has-many with explicit keys.
    pub fn has_many(related: impl Into<String>, foreign_key: impl Into<String>, local_key: Option<&str>) -> Self {
        Self::HasMany {
            related: related.into(),
            foreign_key: foreign_key.into(),
            local_key: local_key.map(str::to_string),
        }
    }

    /// Belongs-to with explicit keys.
    pub fn belongs_to(related: impl Into<String>, foreign_key: impl Into<String>, owner_key: Option<&str>) -> Self {
        Self::BelongsTo {
            related: related.into(),
            foreign_key: foreign_key.into(),
            owner_key: owner_key.map(str::to_string),
        }
    }

    /// Belongs-to-many through an explicit pivot.
    pub fn belongs_to_many(related: impl Into<String>, pivot: PivotDef) -> Self {
        Self::BelongsToMany {
            related: related.into(),
            pivot,
        }
    }

    /// Name of the related model.
    pub fn related(&self) -> &str {
        match self {
            Self::HasOne { related, .. }
            | Self::HasMany { related, .. }
            | Self::BelongsTo { related, .. }
            | Self::BelongsToMany { related, .. } => related,
        }
    }

    /// Whether the relation yields at most one model.
    pub fn is_single(&self) -> bool {
        matches!(self, Self::HasOne { .. } | Self::BelongsTo { .. })
    }
}

/// A resolved relation query.
#[derive(Debug, Clone)]
pub enum Relation<'o> {
    /// Has-one.
    HasOne(HasOneOrMany<'o>),
    /// Has-many.
    HasMany(HasOneOrMany<'o>),
    /// Belongs-to.
    BelongsTo(BelongsTo<'o>),
    /// Belongs-to-many.
    BelongsToMany(BelongsToMany<'o>),
}

macro_rules! dispatch {
    ($self:expr, $rel:ident => $body:expr) => {
        match $self {
            Relation::HasOne($rel) | Relation::HasMany($rel) => $body,
            Relation::BelongsTo($rel) => $body,
            Relation::BelongsToMany($rel) => $body,
        }
    };
}

impl<'o> Relation<'o> {
    /// Resolve relation `name` of `parent`, without any parent constraint.
    pub fn new(orm: Orm<'o>, parent: &Arc<ModelDef>, name: &str) -> QueryResult<Self> {
        let def = parent
            .relation_def(name)
            .ok_or_else(|| QueryError::relation_not_found(parent.name(), name))?;
        let related = orm.registry().get(def.related())?;
        let query = ModelQuery::new(orm, Arc::clone(&related))?;

        Ok(match def {
            RelationDef::HasOne { foreign_key, local_key, .. } => Self::HasOne(HasOneOrMany::new(
                orm,
                query,
                parent,
                foreign_key,
                local_key.as_deref(),
                false,
            )),
            RelationDef::HasMany { foreign_key, local_key, .. } => Self::HasMany(HasOneOrMany::new(
                orm,
                query,
                parent,
                foreign_key,
                local_key.as_deref(),
                true,
            )),
            RelationDef::BelongsTo { foreign_key, owner_key, .. } => Self::BelongsTo(BelongsTo::new(
                query,
                name,
                foreign_key,
                owner_key.as_deref(),
            )),
            RelationDef::BelongsToMany { pivot, .. } => Self::BelongsToMany(BelongsToMany::new(
                orm,
                query,
                parent,
                name,
                pivot.clone(),
            )),
        })
    }

    /// Constrain the relation to the one parent `model`.
    pub fn add_constraints(&mut self, model: &Model) {
        dispatch!(self, rel => rel.add_constraints(model))
    }

    /// Constrain the relation to every parent in `models` at once.
    ///
    /// Returns `false` when no parent has a usable key, in which case no
    /// query needs to run.
    pub fn add_eager_constraints(&mut self, models: &[Model]) -> bool {
        dispatch!(self, rel => rel.add_eager_constraints(models))
    }

    /// Give every parent an empty result for `name`.
    pub fn init_relation(&self, models: &mut [Model], name: &str) {
        let empty = match self {
            Self::HasOne(_) | Self::BelongsTo(_) => Relationship::One(None),
            Self::HasMany(_) | Self::BelongsToMany(_) => Relationship::Many(Vec::new()),
        };
        for model in models {
            model.set_relation(name, empty.clone());
        }
    }

    /// Distribute eagerly loaded `results` over `models` under `name`.
    pub fn match_models(&self, models: &mut [Model], results: Vec<Model>, name: &str) {
        dispatch!(self, rel => rel.match_models(models, results, name))
    }

    /// Run the query of a relation constrained to one parent.
    pub fn get_results(&self) -> QueryResult<Relationship> {
        match self {
            Self::HasOne(rel) => rel.first().map(|m| Relationship::One(m.map(Box::new))),
            Self::HasMany(rel) => rel.get().map(Relationship::Many),
            Self::BelongsTo(rel) => rel.first().map(|m| Relationship::One(m.map(Box::new))),
            Self::BelongsToMany(rel) => rel.get().map(Relationship::Many),
        }
    }

    /// Run the batched query of an eagerly loaded relation.
    pub fn get_eager(&self) -> QueryResult<Vec<Model>> {
        dispatch!(self, rel => rel.get())
    }

    /// The related-model query.
    pub fn query(&self) -> &ModelQuery<'o> {
        dispatch!(self, rel => rel.query())
    }

    /// Mutable access to the related-model query.
    pub fn query_mut(&mut self) -> &mut ModelQuery<'o> {
        dispatch!(self, rel => rel.query_mut())
    }

    /// Transform the related-model query.
    pub fn constrain(mut self, f: impl FnOnce(ModelQuery<'o>) -> ModelQuery<'o>) -> Self {
        let query = self.query_mut();
        let taken = query.clone();
        *query = f(taken);
        self
    }

    /// Compiled SQL of the relation query.
    pub fn to_sql(&self) -> QueryResult<String> {
        self.query().to_sql()
    }

    /// The has-one or has-many side, if this is one.
    pub fn into_has_one_or_many(self) -> QueryResult<HasOneOrMany<'o>> {
        match self {
            Self::HasOne(rel) | Self::HasMany(rel) => Ok(rel),
            other => Err(kind_mismatch(&other, "has-one or has-many")),
        }
    }

    /// The belongs-to side, if this is one.
    pub fn into_belongs_to(self) -> QueryResult<BelongsTo<'o>> {
        match self {
            Self::BelongsTo(rel) => Ok(rel),
            other => Err(kind_mismatch(&other, "belongs-to")),
        }
    }

    /// The many-to-many side, if this is one.
    pub fn into_belongs_to_many(self) -> QueryResult<BelongsToMany<'o>> {
        match self {
            Self::BelongsToMany(rel) => Ok(rel),
            other => Err(kind_mismatch(&other, "belongs-to-many")),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::HasOne(_) => "has-one",
            Self::HasMany(_) => "has-many",
            Self::BelongsTo(_) => "belongs-to",
            Self::BelongsToMany(_) => "belongs-to-many",
        }
    }
}

fn kind_mismatch(relation: &Relation<'_>, expected: &str) -> QueryError {
    QueryError::invalid_query(format!(
        "relation on {} is {}, not {}",
        relation.query().def().name(),
        relation.kind(),
        expected
    ))
}

/// Distinct non-null values of `key` across `models`, in first-seen order.
pub(crate) fn collect_keys(models: &[Model], key: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    models
        .iter()
        .filter_map(|model| model.get_raw(key))
        .filter(|value| value.as_key().is_some_and(|k| seen.insert(k)))
        .cloned()
        .collect()
}

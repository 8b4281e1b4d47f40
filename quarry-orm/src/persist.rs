//! Saving, deleting and reloading models.
//!
//! Every operation fires the model's lifecycle events through the
//! registry. A `false` from a `saving`, `creating`, `updating`, `deleting`
//! or `restoring` listener aborts the operation, which then returns
//! `Ok(false)` without touching the database.

use std::sync::Arc;

use quarry_query::{QueryBuilder, QueryError, QueryResult, Row, Value};
use tracing::{debug, instrument};

use crate::events::ModelEvent;
use crate::model::Model;
use crate::orm::Orm;

impl Model {
    fn table_query<'o>(&self, orm: Orm<'o>) -> QueryResult<QueryBuilder<'o>> {
        Ok(orm.connection_for(self.def())?.table(self.def().table_name()))
    }

    fn key_query<'o>(&self, orm: Orm<'o>) -> QueryResult<QueryBuilder<'o>> {
        let key = self.key_for_save();
        if key.is_null() {
            return Err(QueryError::invalid_query(format!(
                "{} has no primary key value",
                self.name()
            ))
            .with_model(self.name()));
        }
        Ok(self.table_query(orm)?.where_eq(self.get_key_name().to_string(), key))
    }

    /// Insert or update the model.
    ///
    /// New models are inserted with every attribute; existing models write
    /// only their dirty attributes, and nothing at all when clean. The
    /// original snapshot is synced afterwards.
    #[instrument(skip_all, fields(model = %self.name(), exists = self.exists))]
    pub fn save(&mut self, orm: Orm<'_>) -> QueryResult<bool> {
        let registry = orm.registry();
        if !registry.fire(ModelEvent::Saving, self) {
            return Ok(false);
        }

        let saved = if self.exists {
            if self.is_dirty() {
                self.perform_update(orm)?
            } else {
                true
            }
        } else {
            self.perform_insert(orm)?
        };

        if saved {
            registry.fire(ModelEvent::Saved, self);
            self.sync_original();
        }
        Ok(saved)
    }

    fn perform_insert(&mut self, orm: Orm<'_>) -> QueryResult<bool> {
        if !orm.registry().fire(ModelEvent::Creating, self) {
            return Ok(false);
        }
        self.update_timestamps();

        let query = self.table_query(orm)?;
        let attributes = self.attributes().clone();
        if self.def().is_incrementing() && self.get_key().is_null() {
            let key_name = self.get_key_name().to_string();
            let mut row = attributes;
            row.shift_remove(&key_name);
            let id = query.insert_get_id(row, Some(&key_name))?;
            self.set_raw(key_name, id);
        } else {
            query.insert([attributes])?;
        }

        self.sync_changes();
        self.exists = true;
        self.was_recently_created = true;
        debug!(model = %self.name(), key = %self.get_key(), "model inserted");
        orm.registry().fire(ModelEvent::Created, self);
        Ok(true)
    }

    fn perform_update(&mut self, orm: Orm<'_>) -> QueryResult<bool> {
        if !orm.registry().fire(ModelEvent::Updating, self) {
            return Ok(false);
        }
        self.update_timestamps();

        let dirty = self.get_dirty();
        if !dirty.is_empty() {
            self.key_query(orm)?.update(dirty)?;
            self.sync_changes();
            debug!(model = %self.name(), key = %self.get_key(), changed = self.get_changes().len(), "model updated");
            orm.registry().fire(ModelEvent::Updated, self);
        }
        Ok(true)
    }

    /// Fill `attributes` and save; `Ok(false)` for a model that was never
    /// stored.
    pub fn update<I, K, V>(&mut self, orm: Orm<'_>, attributes: I) -> QueryResult<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        if !self.exists {
            return Ok(false);
        }
        self.fill(attributes)?;
        self.save(orm)
    }

    /// Delete the model; soft deletes when the model uses them.
    #[instrument(skip_all, fields(model = %self.name()))]
    pub fn delete(&mut self, orm: Orm<'_>) -> QueryResult<bool> {
        if !self.exists {
            return Ok(false);
        }
        if !orm.registry().fire(ModelEvent::Deleting, self) {
            return Ok(false);
        }

        match self.def().deleted_at_column().map(str::to_string) {
            Some(column) => self.run_soft_delete(orm, column)?,
            None => {
                self.key_query(orm)?.delete()?;
                self.exists = false;
            }
        }

        orm.registry().fire(ModelEvent::Deleted, self);
        Ok(true)
    }

    fn run_soft_delete(&mut self, orm: Orm<'_>, column: String) -> QueryResult<()> {
        let now = Value::DateTime(Model::fresh_timestamp());
        let mut columns = Row::new();
        columns.insert(column.clone(), now.clone());
        self.set_raw(column.clone(), now.clone());

        let updated_at = self.def().updated_at_column().to_string();
        if self.def().uses_timestamps() && !self.is_attribute_dirty(&updated_at) {
            self.set_raw(updated_at.clone(), now.clone());
            columns.insert(updated_at.clone(), now);
        }

        self.key_query(orm)?.update(columns)?;
        self.sync_original_attribute(&column);
        self.sync_original_attribute(&updated_at);
        Ok(())
    }

    /// Delete the row permanently, even for soft-deleting models.
    pub fn force_delete(&mut self, orm: Orm<'_>) -> QueryResult<bool> {
        if !self.exists {
            return Ok(false);
        }
        if !orm.registry().fire(ModelEvent::Deleting, self) {
            return Ok(false);
        }
        self.key_query(orm)?.delete()?;
        self.exists = false;
        orm.registry().fire(ModelEvent::Deleted, self);
        Ok(true)
    }

    /// Undo a soft delete.
    pub fn restore(&mut self, orm: Orm<'_>) -> QueryResult<bool> {
        let Some(column) = self.def().deleted_at_column().map(str::to_string) else {
            return Ok(false);
        };
        if !orm.registry().fire(ModelEvent::Restoring, self) {
            return Ok(false);
        }
        self.set_raw(column, Value::Null);
        let saved = self.save(orm)?;
        if saved {
            orm.registry().fire(ModelEvent::Restored, self);
        }
        Ok(saved)
    }

    /// Bump `updated_at` and save.
    pub fn touch(&mut self, orm: Orm<'_>) -> QueryResult<bool> {
        if !self.def().uses_timestamps() {
            return Ok(false);
        }
        let column = self.def().updated_at_column().to_string();
        self.set_raw(column, Value::DateTime(Model::fresh_timestamp()));
        if !self.exists {
            return Ok(true);
        }
        self.save(orm)
    }

    /// A newly loaded copy of the stored row, ignoring global scopes.
    pub fn fresh(&self, orm: Orm<'_>) -> QueryResult<Option<Model>> {
        if !self.exists {
            return Ok(None);
        }
        orm.query_def(Arc::clone(self.def()))?
            .without_global_scopes()
            .find(self.key_for_save())
    }

    /// Reload attributes and already loaded relations from the database.
    pub fn refresh(&mut self, orm: Orm<'_>) -> QueryResult<()> {
        let fresh = self.fresh(orm)?.ok_or_else(|| {
            QueryError::model_not_found(self.name(), vec![self.key_for_save()])
        })?;
        let loaded: Vec<String> = self.relations().keys().cloned().collect();

        *self = fresh;
        if !loaded.is_empty() {
            orm.load(std::slice::from_mut(self), loaded)?;
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
    use quarry_query::connection::{testing::RecordingDriver, Connection};
    use quarry_query::row;

    fn setup() -> Registry {
        let registry = Registry::new();
        registry.register(ModelDef::new("User").fillable(["name", "email"]));
        registry.register(ModelDef::new("Post").fillable(["title"]).soft_deletes());
        registry
    }

    #[test]
    fn test_insert_stamps_and_sets_key() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = setup();
        let orm = Orm::new(&conn, &registry);

        let mut user = orm.new_model("User").unwrap();
        user.fill([("name", "ann")]).unwrap();
        assert!(user.save(orm).unwrap());

        assert!(user.exists());
        assert!(user.was_recently_created());
        assert_eq!(user.get_key(), Value::Int(1));
        assert!(user.is_clean());
        assert!(user.was_changed());
        assert!(user.was_attribute_changed("name"));
        assert!(user.was_attribute_changed("id"));
        assert!(matches!(user.get_raw("created_at"), Some(Value::DateTime(_))));
        assert_eq!(user.get_raw("created_at"), user.get_raw("updated_at"));
        assert_eq!(
            log.statements(),
            vec![r#"INSERT INTO "users" ("name", "created_at", "updated_at") VALUES (?, ?, ?)"#]
        );
    }

    #[test]
    fn test_update_writes_only_dirty_columns() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = setup();
        let orm = Orm::new(&conn, &registry);

        let mut user = Model::hydrate(
            registry.get("User").unwrap(),
            row! { "id" => 3, "name" => "ann", "email" => "a@x.io" },
        );
        user.set("name", "bob").unwrap();
        assert!(user.save(orm).unwrap());

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, r#"UPDATE "users" SET "name" = ?, "updated_at" = ? WHERE "id" = ?"#);
        assert_eq!(entries[0].1[0], Value::from("bob"));
        assert_eq!(entries[0].1[2], Value::Int(3));
        assert!(user.was_attribute_changed("name"));
        assert!(user.is_clean());
    }

    #[test]
    fn test_explicit_updated_at_is_kept() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = setup();
        let orm = Orm::new(&conn, &registry);

        let mut user = Model::hydrate(registry.get("User").unwrap(), row! { "id" => 3, "name" => "ann" });
        user.set("updated_at", "2020-01-01 00:00:00").unwrap();
        user.save(orm).unwrap();
        let bindings = &log.entries()[0].1;
        assert_eq!(bindings[0].to_string(), "2020-01-01 00:00:00");
    }

    #[test]
    fn test_clean_save_runs_no_statement() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = setup();
        let orm = Orm::new(&conn, &registry);

        let mut user = Model::hydrate(registry.get("User").unwrap(), row! { "id" => 3, "name" => "ann" });
        assert!(user.save(orm).unwrap());
        assert!(log.is_empty());
    }

    #[test]
    fn test_halting_listener_aborts_save() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = setup();
        registry.listen("User", ModelEvent::Creating, |model| model.get_raw("name").is_some());
        let orm = Orm::new(&conn, &registry);

        let mut user = orm.new_model("User").unwrap();
        assert!(!user.save(orm).unwrap());
        assert!(!user.exists());
        assert!(log.is_empty());
    }

    #[test]
    fn test_soft_delete_and_restore() {
        let driver = RecordingDriver::new();
        let log = driver.log();
        let conn = Connection::new("test", driver);
        let registry = setup();
        let orm = Orm::new(&conn, &registry);

        let mut post = Model::hydrate(
            registry.get("Post").unwrap(),
            row! { "id" => 9, "title" => "t", "deleted_at" => Value::Null },
        );
        assert!(post.delete(orm).unwrap());
        assert!(post.exists());
        assert!(post.trashed());
        assert!(post.is_clean());
        assert!(log.statements()[0].starts_with(r#"UPDATE "posts" SET "deleted_at" = ?, "updated_at" = ?"#));

        assert!(post.restore(orm).unwrap());
        assert!(!post.trashed());
        assert_eq!(log.len(), 2);

        assert!(post.force_delete(orm).unwrap());
        assert!(!post.exists());
        assert_eq!(log.statements()[2], r#"DELETE FROM "posts" WHERE "id" = ?"#);
    }

    #[test]
    fn test_delete_without_key_fails() {
        let conn = Connection::new("test", RecordingDriver::new());
        let registry = setup();
        let orm = Orm::new(&conn, &registry);

        let mut user = Model::hydrate(registry.get("User").unwrap(), row! { "name" => "ann" });
        assert!(user.delete(orm).is_err());
    }

    #[test]
    fn test_refresh_reloads_attributes() {
        let driver = RecordingDriver::new().queue_rows(vec![row! { "id" => 3, "name" => "fresh" }]);
        let conn = Connection::new("test", driver);
        let registry = setup();
        let orm = Orm::new(&conn, &registry);

        let mut user = Model::hydrate(registry.get("User").unwrap(), row! { "id" => 3, "name" => "stale" });
        user.set_raw("name", "edited");
        user.refresh(orm).unwrap();
        assert_eq!(user.get_raw("name"), Some(&Value::from("fresh")));
        assert!(user.is_clean());
    }
}

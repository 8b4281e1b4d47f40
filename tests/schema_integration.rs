//! Integration tests for the schema builder and migrator against SQLite.
//!
//! These tests verify that blueprints produce working DDL and that
//! migration batches survive reopening the database.

use pretty_assertions::assert_eq;
use quarry::migrate::{
    FnMigration, MigrationError, MigrationState, Migrator, RollbackOptions, RunOptions,
};
use quarry::query::{Connection, Value, row};
use quarry::sqlite::{SqliteConfig, SqliteDriver, memory_connection};

fn users_and_posts(conn: &Connection) {
    let schema = conn.schema_builder();
    schema
        .create("users", |t| {
            t.id();
            t.string("email").unique();
            t.timestamps();
        })
        .unwrap();
    schema
        .create("posts", |t| {
            t.id();
            t.foreign_id("user_id");
            t.string("title");
            t.soft_deletes();
            t.foreign(["user_id"]).references(["id"]).on("users").cascade_on_delete();
        })
        .unwrap();
}

#[test]
fn test_create_and_inspect() {
    let conn = memory_connection("main").unwrap();
    users_and_posts(&conn);
    let schema = conn.schema_builder();

    assert!(schema.has_table("users").unwrap());
    assert!(!schema.has_table("comments").unwrap());
    assert_eq!(
        schema.get_column_listing("posts").unwrap(),
        vec!["id", "user_id", "title", "deleted_at"]
    );
    assert!(schema.has_columns("users", &["EMAIL", "created_at"]).unwrap());
    assert_eq!(schema.get_tables().unwrap(), vec!["posts", "users"]);
}

#[test]
fn test_unique_constraint_is_enforced() {
    let conn = memory_connection("main").unwrap();
    users_and_posts(&conn);

    conn.table("users").insert([row! { "email" => "a@x.io" }]).unwrap();
    let err = conn.table("users").insert([row! { "email" => "a@x.io" }]).unwrap_err();
    assert!(err.is_execution());
}

#[test]
fn test_foreign_key_cascades() {
    let conn = memory_connection("main").unwrap();
    users_and_posts(&conn);

    conn.table("users").insert([row! { "email" => "a@x.io" }]).unwrap();
    conn.table("posts")
        .insert([
            row! { "user_id" => 1, "title" => "one" },
            row! { "user_id" => 1, "title" => "two" },
        ])
        .unwrap();
    assert!(conn.table("posts").insert([row! { "user_id" => 9, "title" => "orphan" }]).is_err());

    conn.table("users").where_eq("id", 1).delete().unwrap();
    assert_eq!(conn.table("posts").count().unwrap(), 0);
}

#[test]
fn test_alter_table() {
    let conn = memory_connection("main").unwrap();
    users_and_posts(&conn);
    let schema = conn.schema_builder();

    schema
        .table("users", |t| {
            t.string("nickname").nullable();
            t.index(["email", "nickname"]);
        })
        .unwrap();
    assert!(schema.has_column("users", "nickname").unwrap());

    schema.table("users", |t| t.rename_column("nickname", "handle")).unwrap();
    assert!(schema.has_column("users", "handle").unwrap());

    schema.table("posts", |t| t.drop_soft_deletes()).unwrap();
    assert!(!schema.has_column("posts", "deleted_at").unwrap());

    schema.rename("posts", "articles").unwrap();
    assert!(schema.has_table("articles").unwrap());
    schema.drop_if_exists("posts").unwrap();
}

#[test]
fn test_column_defaults() {
    let conn = memory_connection("main").unwrap();
    conn.schema_builder()
        .create("settings", |t| {
            t.increments("id");
            t.string("key");
            t.integer("weight").default(5);
            t.timestamp("seen_at").use_current();
        })
        .unwrap();

    conn.table("settings").insert([row! { "key" => "theme" }]).unwrap();
    let row = conn.table("settings").first().unwrap().unwrap();
    assert_eq!(row.get("weight"), Some(&Value::Int(5)));
    assert!(matches!(row.get("seen_at"), Some(Value::String(_))));
}

fn migrator_for(conn: &Connection) -> Migrator<'_> {
    let mut migrator = Migrator::new(conn);
    migrator
        .add(
            FnMigration::new("2024_01_01_000000_create_users")
                .with_up(|s| {
                    s.create("users", |t| {
                        t.id();
                        t.string("email").unique();
                    })
                })
                .with_down(|s| s.drop("users")),
        )
        .unwrap()
        .add(
            FnMigration::new("2024_01_02_000000_add_users_name")
                .with_up(|s| s.table("users", |t| {
                    t.string("name").nullable();
                }))
                .with_down(|s| s.table("users", |t| t.drop_column(["name"]))),
        )
        .unwrap();
    migrator
}

#[test]
fn test_migrations_persist_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let open = || Connection::new("main", SqliteDriver::open(SqliteConfig::file(&path)).unwrap());

    {
        let conn = open();
        let report = migrator_for(&conn).run(RunOptions::new()).unwrap();
        assert_eq!(report.migrations.len(), 2);
    }

    let conn = open();
    let mut migrator = migrator_for(&conn);
    assert!(migrator.pending().unwrap().is_empty());
    assert!(conn.schema_builder().has_column("users", "name").unwrap());

    migrator
        .add(
            FnMigration::new("2024_02_01_000000_create_teams")
                .with_up(|s| s.create("teams", |t| {
                    t.id();
                }))
                .with_down(|s| s.drop("teams")),
        )
        .unwrap();
    let report = migrator.run(RunOptions::new()).unwrap();
    assert_eq!(report.batches, vec![2]);

    let status = migrator.status().unwrap();
    assert!(status.iter().all(|s| s.state == MigrationState::Ran));
    assert_eq!(status.iter().map(|s| s.batch).collect::<Vec<_>>(), vec![Some(1), Some(1), Some(2)]);

    let report = migrator.rollback(RollbackOptions::new()).unwrap();
    assert_eq!(report.migrations, vec!["2024_02_01_000000_create_teams"]);

    let report = migrator.rollback(RollbackOptions::new()).unwrap();
    assert_eq!(
        report.migrations,
        vec!["2024_01_02_000000_add_users_name", "2024_01_01_000000_create_users"]
    );
    assert!(!conn.schema_builder().has_table("users").unwrap());
}

#[test]
fn test_failed_migration_leaves_repository_consistent() {
    let conn = memory_connection("main").unwrap();
    let mut migrator = migrator_for(&conn);
    migrator
        .add(
            FnMigration::new("2024_01_03_000000_broken")
                .with_up(|s| s.table("nope", |t| {
                    t.string("x").nullable();
                })),
        )
        .unwrap();

    let err = migrator.run(RunOptions::new()).unwrap_err();
    assert!(matches!(&err, MigrationError::Failed { migration, .. } if migration == "2024_01_03_000000_broken"));
    assert_eq!(
        migrator.repository().get_ran().unwrap(),
        vec!["2024_01_01_000000_create_users", "2024_01_02_000000_add_users_name"]
    );
}

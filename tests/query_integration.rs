//! Integration tests for the query builder against SQLite.
//!
//! These tests verify the query building functionality including:
//! - Inserts and generated keys
//! - Predicates, joins and ordering
//! - Aggregates and pagination
//! - Transactions and error propagation

use pretty_assertions::assert_eq;
use quarry::query::{Connection, ErrorCode, SortOrder, Value, raw, row};
use quarry::sqlite::memory_connection;

fn seeded() -> Connection {
    let conn = memory_connection("main").expect("open in-memory database");
    let schema = conn.schema_builder();
    schema
        .create("users", |t| {
            t.id();
            t.string("name");
            t.integer("age").nullable();
            t.boolean("active").default(true);
        })
        .unwrap();
    schema
        .create("posts", |t| {
            t.id();
            t.foreign_id("user_id");
            t.string("title");
            t.integer("votes").default(0);
        })
        .unwrap();

    conn.table("users")
        .insert([
            row! { "name" => "ann", "age" => 31, "active" => true },
            row! { "name" => "bob", "age" => 25, "active" => false },
            row! { "name" => "cid", "age" => Value::Null, "active" => true },
        ])
        .unwrap();
    conn.table("posts")
        .insert([
            row! { "user_id" => 1, "title" => "first", "votes" => 3 },
            row! { "user_id" => 1, "title" => "second", "votes" => 10 },
            row! { "user_id" => 2, "title" => "third", "votes" => 1 },
        ])
        .unwrap();
    conn
}

fn names(rows: Vec<quarry::query::Row>) -> Vec<String> {
    rows.into_iter()
        .filter_map(|mut r| r.shift_remove("name"))
        .map(|v| v.to_string())
        .collect()
}

#[test]
fn test_insert_get_id_is_sequential() {
    let conn = seeded();
    let id = conn
        .table("users")
        .insert_get_id(row! { "name" => "dee", "age" => 40 }, None)
        .unwrap();
    assert_eq!(id, Value::Int(4));
    assert_eq!(conn.table("users").count().unwrap(), 4);
}

#[test]
fn test_where_clauses() {
    let conn = seeded();

    let adults = conn
        .table("users")
        .r#where("age", ">=", 30)
        .or_where_null("age")
        .order_by("name", SortOrder::Asc)
        .get()
        .unwrap();
    assert_eq!(names(adults), vec!["ann", "cid"]);

    let nested = conn
        .table("users")
        .where_eq("active", true)
        .where_nested(|q| q.where_eq("name", "bob").or_where_eq("name", "cid"))
        .get()
        .unwrap();
    assert_eq!(names(nested), vec!["cid"]);

    let none = conn.table("users").where_in("id", Vec::<i64>::new()).get().unwrap();
    assert!(none.is_empty());

    let between = conn.table("users").where_between("age", 20, 30).pluck("name").unwrap();
    assert_eq!(between, vec![Value::from("bob")]);
}

#[test]
fn test_join_and_group_by() {
    let conn = seeded();
    let rows = conn
        .table("users")
        .select(["users.name"])
        .select_raw(raw("SUM(posts.votes) AS total"))
        .join("posts", "users.id", "=", "posts.user_id")
        .group_by(["users.name"])
        .having("total", ">", 2)
        .order_by_desc("total")
        .get()
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::from("ann")));
    assert_eq!(rows[0].get("total"), Some(&Value::Int(13)));
}

#[test]
fn test_aggregates() {
    let conn = seeded();
    let posts = conn.table("posts");
    assert_eq!(posts.count().unwrap(), 3);
    assert_eq!(posts.max("votes").unwrap(), Value::Int(10));
    assert_eq!(posts.min("votes").unwrap(), Value::Int(1));
    assert_eq!(posts.sum("votes").unwrap(), Value::Int(14));
    assert_eq!(conn.table("posts").where_eq("user_id", 99).sum("votes").unwrap(), Value::Int(0));
    assert!(conn.table("users").where_eq("name", "ann").exists().unwrap());
    assert!(conn.table("users").where_eq("name", "zed").doesnt_exist().unwrap());
}

#[test]
fn test_update_increment_and_delete() {
    let conn = seeded();

    let changed = conn.table("users").where_eq("active", false).update([("active", true)]).unwrap();
    assert_eq!(changed, 1);
    assert_eq!(conn.table("users").where_eq("active", true).count().unwrap(), 3);

    conn.table("posts").where_eq("title", "third").increment("votes", 4).unwrap();
    assert_eq!(
        conn.table("posts").where_eq("title", "third").value("votes").unwrap(),
        Some(Value::Int(5))
    );

    let deleted = conn.table("posts").where_eq("user_id", 1).delete().unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(conn.table("posts").count().unwrap(), 1);
}

#[test]
fn test_pagination_and_chunking() {
    let conn = seeded();

    let page = conn.table("users").order_by("id", SortOrder::Asc).paginate(2, 2).unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.last_page, 2);
    assert_eq!(page.from, Some(3));
    assert_eq!(page.len(), 1);
    assert!(!page.has_more_pages());

    let simple = conn.table("users").order_by("id", SortOrder::Asc).simple_paginate(2, 1).unwrap();
    assert!(simple.has_more_pages());
    assert_eq!(simple.data.len(), 2);

    let mut seen = Vec::new();
    let completed = conn
        .table("users")
        .order_by("id", SortOrder::Asc)
        .chunk(2, |rows, page| {
            seen.push((page, rows.len()));
            Ok(true)
        })
        .unwrap();
    assert!(completed);
    assert_eq!(seen, vec![(1, 2), (2, 1)]);
}

#[test]
fn test_transaction_rolls_back() {
    let conn = seeded();

    let result: quarry::QueryResult<()> = conn.transaction(|c| {
        c.table("users").insert([row! { "name" => "eve" }])?;
        c.table("missing").insert([row! { "name" => "eve" }])?;
        Ok(())
    });

    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::ExecutionFailed);
    assert!(err.display_full().contains("missing"));
    assert_eq!(conn.table("users").where_eq("name", "eve").count().unwrap(), 0);
    assert_eq!(conn.transaction_level(), 0);
}

#[test]
fn test_nested_transaction_commits_once() {
    let conn = seeded();

    conn.transaction(|outer| {
        outer.table("users").insert([row! { "name" => "fay" }])?;
        outer.transaction(|inner| {
            assert_eq!(inner.transaction_level(), 2);
            inner.table("users").insert([row! { "name" => "gus" }])
        })
    })
    .unwrap();

    assert_eq!(conn.table("users").count().unwrap(), 5);
}

#[test]
fn test_query_log() {
    let conn = seeded();
    conn.enable_query_log();
    conn.table("users").where_eq("name", "ann").first().unwrap();

    let log = conn.query_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].sql, r#"SELECT * FROM "users" WHERE "name" = ? LIMIT 1"#);
    assert_eq!(log[0].bindings, vec![Value::from("ann")]);
}

//! End-to-end tests through the dispatcher with real SQLite files.
//!
//! These tests verify that:
//! - a read-only alias answers queries and rejects writes
//! - configuration reload is all-or-nothing
//! - pools of removed aliases are closed on reload
//! - requests that straddle a reload never reinstate an outdated pool

use tempfile::TempDir;
use unified_db::config::ConfigDocument;
use unified_db::dispatcher::Dispatcher;
use unified_db::error::ErrorKind;
use unified_db::models::{
    AccessMode, BackendKind, QueryParam, QueryParams, QueryRequest, SchemaInfo, Value,
};
use unified_db::registry::Registry;

fn document(yaml: &str) -> ConfigDocument {
    ConfigDocument::from_yaml_str(yaml).unwrap()
}

/// A read-write and a read-only alias over the same SQLite file.
fn setup(dir: &TempDir) -> Dispatcher {
    let path = dir.path().join("shop.db");
    let yaml = format!(
        r#"
databases:
  r1:
    path: '{path}'
    description: reporting replica
  w1:
    type: sqlite
    path: '{path}'
    access: read-write
"#,
        path = path.display()
    );
    Dispatcher::new(Registry::load(&document(&yaml)).unwrap())
}

async fn seed(dispatcher: &Dispatcher) {
    for sql in [
        "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL, price REAL)",
        "INSERT INTO t (name, price) VALUES ('apple', 1.5), ('pear', NULL)",
    ] {
        dispatcher
            .execute_query(&QueryRequest::new("w1", sql))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_read_only_alias_end_to_end() {
    let dir = TempDir::new().unwrap();
    let dispatcher = setup(&dir);
    seed(&dispatcher).await;

    let result = dispatcher
        .execute_query(&QueryRequest::new("r1", "SELECT 1"))
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![Value::Integer(1)]]);
    assert_eq!(result.row_count, 1);

    let err = dispatcher
        .execute_query(&QueryRequest::new("r1", "DELETE FROM t"))
        .await
        .unwrap_err();
    assert_eq!(err.error.kind(), ErrorKind::AccessDenied);

    let count = dispatcher
        .execute_query(&QueryRequest::new("r1", "SELECT count(*) AS n FROM t"))
        .await
        .unwrap();
    assert_eq!(count.rows, vec![vec![Value::Integer(2)]]);
}

#[tokio::test]
async fn test_list_databases_hides_connection_details() {
    let dir = TempDir::new().unwrap();
    let dispatcher = setup(&dir);

    let databases = dispatcher.list_databases();
    assert_eq!(databases.len(), 2);
    assert_eq!(databases[0].alias, "r1");
    assert_eq!(databases[0].access_mode, AccessMode::ReadOnly);
    assert_eq!(databases[0].backend_kind, BackendKind::Sqlite);
    assert_eq!(databases[1].access_mode, AccessMode::ReadWrite);

    let json = serde_json::to_string(&databases).unwrap();
    assert!(!json.contains("shop.db"));
}

#[tokio::test]
async fn test_named_parameters_and_limit() {
    let dir = TempDir::new().unwrap();
    let dispatcher = setup(&dir);
    seed(&dispatcher).await;

    let mut named = std::collections::BTreeMap::new();
    named.insert("name".to_string(), QueryParam::String("apple".into()));
    let result = dispatcher
        .execute_query(
            &QueryRequest::new("r1", "SELECT id, price FROM t WHERE name = :name")
                .with_params(QueryParams::Named(named)),
        )
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![Value::Integer(1), Value::Float(1.5)]]);

    let limited = dispatcher
        .execute_query(&QueryRequest::new("r1", "SELECT * FROM t ORDER BY id").with_limit(1))
        .await
        .unwrap();
    assert_eq!(limited.row_count, 1);
    assert!(limited.truncated);
}

#[tokio::test]
async fn test_injection_text_is_bound_as_value() {
    let dir = TempDir::new().unwrap();
    let dispatcher = setup(&dir);
    seed(&dispatcher).await;

    let hostile = "x'; DROP TABLE t; --";
    dispatcher
        .execute_query(
            &QueryRequest::new("w1", "INSERT INTO t (name) VALUES (?)")
                .with_params(vec![QueryParam::String(hostile.into())]),
        )
        .await
        .unwrap();

    let result = dispatcher
        .execute_query(
            &QueryRequest::new("r1", "SELECT name FROM t WHERE name = ?")
                .with_params(vec![QueryParam::String(hostile.into())]),
        )
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![Value::Text(hostile.into())]]);
}

#[tokio::test]
async fn test_describe_schema_end_to_end() {
    let dir = TempDir::new().unwrap();
    let dispatcher = setup(&dir);
    seed(&dispatcher).await;

    let SchemaInfo::Table(table) = dispatcher.describe_schema("r1", Some("t")).await.unwrap()
    else {
        panic!("expected a table description");
    };
    assert_eq!(table.primary_key, vec!["id"]);
    let names: Vec<_> = table.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "price"]);

    let err = dispatcher
        .describe_schema("r1", Some("missing"))
        .await
        .unwrap_err();
    assert_eq!(err.error.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_reload_with_invalid_alias_keeps_previous_registry() {
    let dir = TempDir::new().unwrap();
    let dispatcher = setup(&dir);
    seed(&dispatcher).await;

    let broken = format!(
        r#"
databases:
  fresh:
    path: '{}'
  bad:
    type: oracle
    host: db.internal
"#,
        dir.path().join("fresh.db").display()
    );
    let err = dispatcher.reload(&document(&broken)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("bad"));

    let aliases: Vec<_> = dispatcher
        .list_databases()
        .into_iter()
        .map(|d| d.alias)
        .collect();
    assert_eq!(aliases, vec!["r1", "w1"]);
    dispatcher
        .execute_query(&QueryRequest::new("r1", "SELECT 1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reload_replaces_registry_and_closes_removed_pools() {
    let dir = TempDir::new().unwrap();
    let dispatcher = setup(&dir);
    seed(&dispatcher).await;
    assert_eq!(dispatcher.pools().pool_count().await, 1);

    let next = format!(
        r#"
databases:
  r2:
    path: '{}'
"#,
        dir.path().join("shop.db").display()
    );
    dispatcher.reload(&document(&next)).await.unwrap();

    assert_eq!(dispatcher.pools().pool_count().await, 0);
    let err = dispatcher
        .execute_query(&QueryRequest::new("w1", "SELECT 1"))
        .await
        .unwrap_err();
    assert_eq!(err.error.kind(), ErrorKind::NotFound);

    let result = dispatcher
        .execute_query(&QueryRequest::new("r2", "SELECT name FROM t ORDER BY id"))
        .await
        .unwrap();
    assert_eq!(result.row_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queries_racing_reloads_keep_current_pool() {
    let dir = TempDir::new().unwrap();
    let dispatcher = setup(&dir);
    seed(&dispatcher).await;
    let path = dir.path().join("shop.db");

    for round in 0..10 {
        let queries: Vec<_> = (0..8)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher
                        .execute_query(&QueryRequest::new("r1", "SELECT count(*) FROM t"))
                        .await
                })
            })
            .collect();

        let next = format!(
            r#"
databases:
  r1:
    path: '{path}'
    description: round {round}
  w1:
    type: sqlite
    path: '{path}'
    access: read-write
"#,
            path = path.display()
        );
        dispatcher.reload(&document(&next)).await.unwrap();

        for query in queries {
            // Losing the pool to a concurrent reload is the only allowed failure
            if let Err(err) = query.await.unwrap() {
                assert_eq!(err.error.kind(), ErrorKind::BackendUnavailable);
            }
        }
    }

    let result = dispatcher
        .execute_query(&QueryRequest::new("r1", "SELECT count(*) FROM t"))
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![Value::Integer(2)]]);
    assert_eq!(dispatcher.pools().pool_count().await, 2);
    let summary = &dispatcher.list_databases()[0];
    assert_eq!(summary.description.as_deref(), Some("round 9"));
    let stats = dispatcher.pools().stats("r1").await.unwrap();
    assert_eq!(stats.in_use, 0);
    assert!(stats.idle >= 1);
}

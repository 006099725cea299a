//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use event_store::{
    AggregateId, EventLog, EventStoreError, NewEvent, PageRequest, PostgresEventStore, Version,
    postgres::{append_in, current_version_in},
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_events_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and a cleared events table
async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn test_event(event_type: &str) -> NewEvent {
    NewEvent::from_json(event_type, serde_json::json!({"name": "Maria", "n": 1}))
}

#[tokio::test]
async fn append_assigns_sequential_versions() {
    let mut store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let first = store
        .append(test_event("CustomerCreated"), aggregate_id, "Customer", Version::initial())
        .await
        .unwrap();
    let second = store
        .append(test_event("CustomerUpdated"), aggregate_id, "Customer", first.version)
        .await
        .unwrap();

    assert_eq!(first.version, Version::first());
    assert_eq!(second.version, Version::new(2));
    assert_eq!(
        store.current_version(aggregate_id).await.unwrap(),
        Version::new(2)
    );
}

#[tokio::test]
async fn list_by_aggregate_preserves_payload_and_order() {
    let mut store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    for (i, event_type) in ["CustomerCreated", "AddressAdded", "CustomerUpdated"]
        .iter()
        .enumerate()
    {
        store
            .append(
                test_event(event_type),
                aggregate_id,
                "Customer",
                Version::new(i as i64),
            )
            .await
            .unwrap();
    }

    let events = store.list_by_aggregate(aggregate_id).await.unwrap();
    let versions: Vec<_> = events.iter().map(|e| e.version.as_i64()).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert_eq!(events[1].event_type, "AddressAdded");
    assert_eq!(
        events[0].payload,
        serde_json::json!({"name": "Maria", "n": 1})
    );
}

#[tokio::test]
async fn stale_expected_version_conflicts() {
    let mut store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    store
        .append(test_event("A"), aggregate_id, "Customer", Version::initial())
        .await
        .unwrap();

    let result = store
        .append(test_event("B"), aggregate_id, "Customer", Version::initial())
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
}

#[tokio::test]
async fn unique_constraint_catches_interleaved_writers() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    // Both transactions read head 0 before either inserts.
    let mut tx1 = store.pool().begin().await.unwrap();
    let mut tx2 = store.pool().begin().await.unwrap();
    assert_eq!(
        current_version_in(&mut tx1, aggregate_id).await.unwrap(),
        Version::initial()
    );
    assert_eq!(
        current_version_in(&mut tx2, aggregate_id).await.unwrap(),
        Version::initial()
    );

    append_in(&mut tx1, test_event("A"), aggregate_id, "Customer", Version::initial())
        .await
        .unwrap();
    tx1.commit().await.unwrap();

    let result =
        append_in(&mut tx2, test_event("B"), aggregate_id, "Customer", Version::initial()).await;
    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
    tx2.rollback().await.unwrap();

    let mut store = store;
    assert_eq!(store.list_by_aggregate(aggregate_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_appends_yield_one_winner() {
    let store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    let attempts = (0..5).map(|_| {
        let mut store = store.clone();
        async move {
            store
                .append(test_event("A"), aggregate_id, "Customer", Version::initial())
                .await
        }
    });
    let results = futures_util::future::join_all(attempts).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
}

#[tokio::test]
async fn uncommitted_append_is_invisible() {
    let mut store = get_test_store().await;
    let aggregate_id = AggregateId::new();

    {
        let mut tx = store.pool().begin().await.unwrap();
        append_in(&mut tx, test_event("A"), aggregate_id, "Customer", Version::initial())
            .await
            .unwrap();
        // dropped without commit
    }

    assert_eq!(
        store.current_version(aggregate_id).await.unwrap(),
        Version::initial()
    );
}

#[tokio::test]
async fn list_all_pages_newest_first() {
    let mut store = get_test_store().await;
    let base = Utc::now();

    for i in 0..5 {
        let mut event = test_event(&format!("E{i}"));
        event.timestamp = base + Duration::seconds(i);
        store
            .append(event, AggregateId::new(), "Customer", Version::initial())
            .await
            .unwrap();
    }

    let page = store.list_all(PageRequest::new(1, 3)).await.unwrap();
    assert_eq!(page.total, 5);
    let types: Vec<_> = page.items.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, vec!["E4", "E3", "E2"]);

    let rest = store.list_all(PageRequest::new(2, 3)).await.unwrap();
    assert_eq!(rest.items.len(), 2);
}

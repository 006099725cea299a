use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventId, EventStoreError, NewEvent, Page, PageRequest, Result, StoredEvent,
    Version, store::EventLog,
};

const SELECT_EVENTS: &str = r#"
    SELECT id, event_type, aggregate_id, aggregate_type, version, timestamp, payload
    FROM events
"#;

fn row_to_event(row: PgRow) -> Result<StoredEvent> {
    Ok(StoredEvent {
        event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        event_type: row.try_get("event_type")?,
        aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
        aggregate_type: row.try_get("aggregate_type")?,
        version: Version::new(row.try_get("version")?),
        timestamp: row.try_get("timestamp")?,
        payload: row.try_get("payload")?,
    })
}

/// Appends on an existing connection, usually one inside a transaction the
/// caller owns. Nothing is committed here.
#[tracing::instrument(skip(conn, event), fields(event_type = %event.event_type))]
pub async fn append_in(
    conn: &mut PgConnection,
    event: NewEvent,
    aggregate_id: AggregateId,
    aggregate_type: &str,
    expected: Version,
) -> Result<StoredEvent> {
    let actual = current_version_in(conn, aggregate_id).await?;
    if actual != expected {
        return Err(EventStoreError::ConcurrencyConflict {
            aggregate_id,
            expected,
            actual,
        });
    }

    let stored = event.into_stored(aggregate_id, aggregate_type, expected.next());

    sqlx::query(
        r#"
        INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, timestamp, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(stored.event_id.as_uuid())
    .bind(&stored.event_type)
    .bind(stored.aggregate_id.as_uuid())
    .bind(&stored.aggregate_type)
    .bind(stored.version.as_i64())
    .bind(stored.timestamp)
    .bind(&stored.payload)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        // Another transaction inserted the same version after our read.
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.constraint() == Some("unique_aggregate_version")
        {
            return EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: stored.version,
            };
        }
        EventStoreError::Database(e)
    })?;

    Ok(stored)
}

pub async fn list_by_aggregate_in(
    conn: &mut PgConnection,
    aggregate_id: AggregateId,
) -> Result<Vec<StoredEvent>> {
    let rows = sqlx::query(&format!(
        "{SELECT_EVENTS} WHERE aggregate_id = $1 ORDER BY version ASC"
    ))
    .bind(aggregate_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(row_to_event).collect()
}

pub async fn list_all_in(
    conn: &mut PgConnection,
    page: PageRequest,
) -> Result<Page<StoredEvent>> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(&mut *conn)
        .await?;

    let rows = sqlx::query(&format!(
        "{SELECT_EVENTS} ORDER BY timestamp DESC, version DESC LIMIT $1 OFFSET $2"
    ))
    .bind(page.limit() as i64)
    .bind(page.offset() as i64)
    .fetch_all(&mut *conn)
    .await?;

    let items = rows
        .into_iter()
        .map(row_to_event)
        .collect::<Result<Vec<_>>>()?;
    Ok(Page::new(items, total as u64, page))
}

pub async fn current_version_in(
    conn: &mut PgConnection,
    aggregate_id: AggregateId,
) -> Result<Version> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
            .bind(aggregate_id.as_uuid())
            .fetch_one(&mut *conn)
            .await?;

    Ok(version.map(Version::new).unwrap_or(Version::initial()))
}

/// PostgreSQL-backed event log.
///
/// Every append runs in its own transaction. To append as part of a wider
/// unit of work, call [`append_in`] on that transaction's connection.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EventLog for PostgresEventStore {
    async fn append(
        &mut self,
        event: NewEvent,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected: Version,
    ) -> Result<StoredEvent> {
        let mut tx = self.pool.begin().await?;
        let stored = append_in(&mut tx, event, aggregate_id, aggregate_type, expected).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn list_by_aggregate(&mut self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>> {
        let mut conn = self.pool.acquire().await?;
        list_by_aggregate_in(&mut conn, aggregate_id).await
    }

    async fn list_all(&mut self, page: PageRequest) -> Result<Page<StoredEvent>> {
        let mut conn = self.pool.acquire().await?;
        list_all_in(&mut conn, page).await
    }

    async fn current_version(&mut self, aggregate_id: AggregateId) -> Result<Version> {
        let mut conn = self.pool.acquire().await?;
        current_version_in(&mut conn, aggregate_id).await
    }
}

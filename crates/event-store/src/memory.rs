use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventStoreError, NewEvent, Page, PageRequest, Result, StoredEvent, Version,
    store::{EventLog, newest_first},
};

/// Plain in-memory event table.
///
/// Holds the same uniqueness rule as the `events` table in Postgres: one
/// event per `(aggregate_id, version)`, versions contiguous from 1. It is
/// `Clone` so callers can snapshot it for transactional work.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    events: Vec<StoredEvent>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `event` at `expected.next()` if the stream head is `expected`.
    pub fn append(
        &mut self,
        event: NewEvent,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected: Version,
    ) -> Result<StoredEvent> {
        let actual = self.current_version(aggregate_id);
        if actual != expected {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            });
        }

        let stored = event.into_stored(aggregate_id, aggregate_type, expected.next());
        self.events.push(stored.clone());
        Ok(stored)
    }

    /// Inserts an already versioned event, enforcing the unique key.
    ///
    /// Used when replaying events staged against an older snapshot; the
    /// version they were given must still be the next free one.
    pub fn insert(&mut self, event: StoredEvent) -> Result<()> {
        let actual = self.current_version(event.aggregate_id);
        if event.version != actual.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: event.aggregate_id,
                expected: Version::new(event.version.as_i64() - 1),
                actual,
            });
        }
        self.events.push(event);
        Ok(())
    }

    pub fn list_by_aggregate(&self, aggregate_id: AggregateId) -> Vec<StoredEvent> {
        let mut events: Vec<_> = self
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        events
    }

    pub fn list_all(&self, page: PageRequest) -> Page<StoredEvent> {
        let mut events = self.events.clone();
        events.sort_by(newest_first);
        Page::from_sorted(events, page)
    }

    pub fn current_version(&self, aggregate_id: AggregateId) -> Version {
        self.events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// In-memory event log for tests and local runs.
///
/// Each append is its own atomic step under the write lock.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    table: Arc<RwLock<EventTable>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.table.read().await.len()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        *self.table.write().await = EventTable::new();
    }
}

#[async_trait]
impl EventLog for InMemoryEventStore {
    async fn append(
        &mut self,
        event: NewEvent,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected: Version,
    ) -> Result<StoredEvent> {
        self.table
            .write()
            .await
            .append(event, aggregate_id, aggregate_type, expected)
    }

    async fn list_by_aggregate(&mut self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>> {
        Ok(self.table.read().await.list_by_aggregate(aggregate_id))
    }

    async fn list_all(&mut self, page: PageRequest) -> Result<Page<StoredEvent>> {
        Ok(self.table.read().await.list_all(page))
    }

    async fn current_version(&mut self, aggregate_id: AggregateId) -> Result<Version> {
        Ok(self.table.read().await.current_version(aggregate_id))
    }
}

use async_trait::async_trait;

use crate::{AggregateId, NewEvent, Page, PageRequest, Result, StoredEvent, Version};

/// Append-only, versioned log of aggregate events.
///
/// Methods take `&mut self` so the same trait can be implemented both by a
/// standalone store and by a unit of work that borrows an open transaction.
/// Appends made through a unit of work become visible only on commit.
#[async_trait]
pub trait EventLog: Send {
    /// Appends one event to the stream of `aggregate_id`.
    ///
    /// `expected` is the stream head the caller observed. The event is
    /// stored at `expected.next()`; if the head has moved, or another
    /// writer claims that version first, the append fails with
    /// `ConcurrencyConflict` and nothing is written.
    async fn append(
        &mut self,
        event: NewEvent,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected: Version,
    ) -> Result<StoredEvent>;

    /// All events of one aggregate, oldest first.
    async fn list_by_aggregate(&mut self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>>;

    /// A page of the whole log, most recent first.
    async fn list_all(&mut self, page: PageRequest) -> Result<Page<StoredEvent>>;

    /// Version of the latest event for `aggregate_id`, or `Version::initial()`
    /// if the stream is empty.
    async fn current_version(&mut self, aggregate_id: AggregateId) -> Result<Version>;
}

/// Convenience methods available on every event log.
#[async_trait]
pub trait EventLogExt: EventLog {
    /// Checks if an aggregate has any recorded events.
    async fn has_events(&mut self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.current_version(aggregate_id).await? > Version::initial())
    }

    /// Appends at whatever the stream head currently is.
    ///
    /// Only safe for streams with a single writer; prefer `append` with an
    /// observed version everywhere else.
    async fn append_at_head(
        &mut self,
        event: NewEvent,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<StoredEvent> {
        let head = self.current_version(aggregate_id).await?;
        self.append(event, aggregate_id, aggregate_type, head).await
    }
}

// Blanket implementation for all EventLog implementations
impl<T: EventLog + ?Sized> EventLogExt for T {}

/// Orders events for `list_all`: newest first, ties broken by version.
pub fn newest_first(a: &StoredEvent, b: &StoredEvent) -> std::cmp::Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then(b.version.cmp(&a.version))
}

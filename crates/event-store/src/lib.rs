//! Append-only event log.
//!
//! Every mutation of an aggregate is recorded as a [`StoredEvent`] with a
//! per-aggregate [`Version`]. The pair `(aggregate_id, version)` is unique,
//! which is what turns concurrent writers into a detectable conflict.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{AggregateId, Page, PageRequest};
pub use error::{EventStoreError, Result};
pub use event::{EventId, NewEvent, StoredEvent, Version};
pub use memory::{EventTable, InMemoryEventStore};
pub use postgres::PostgresEventStore;
pub use store::{EventLog, EventLogExt};

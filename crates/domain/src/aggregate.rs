//! Core aggregate and domain event traits.

use async_trait::async_trait;
use common::AggregateId;
use event_store::{EventLog, EventStoreError, NewEvent, StoredEvent, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::entity::{HasIdentity, HasVersion};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// This is stored alongside the payload and used for filtering.
    fn event_type(&self) -> &'static str;
}

/// An aggregate root: the unit of consistency whose id names an event stream.
pub trait Aggregate: HasIdentity<Id = AggregateId> + HasVersion + Send + Sync {
    /// The type of events recorded against this aggregate.
    type Event: DomainEvent;

    /// Returns the aggregate type name stored with each event.
    fn aggregate_type() -> &'static str;
}

/// Typed appends on top of any [`EventLog`].
#[async_trait]
pub trait DomainEventLog: EventLog {
    /// Serializes `event` and appends it to the stream of `aggregate`.
    ///
    /// `expected` is the stream head read earlier in the same unit of work.
    async fn append_domain_event<A: Aggregate>(
        &mut self,
        aggregate: &A,
        event: &A::Event,
        expected: Version,
    ) -> Result<StoredEvent, EventStoreError> {
        let event_type = event.event_type();
        let new_event = NewEvent::new(event_type, event)?;
        let stored = self
            .append(new_event, aggregate.id(), A::aggregate_type(), expected)
            .await?;

        tracing::debug!(
            aggregate_id = %stored.aggregate_id,
            event_type,
            version = %stored.version,
            "appended event"
        );
        Ok(stored)
    }
}

// Blanket implementation for all EventLog implementations
impl<T: EventLog + ?Sized> DomainEventLog for T {}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::AggregateId;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic version counter.
///
/// Used both for event streams (the version of the aggregate's stream after
/// an event) and for entity rows (the number of committed mutations).
/// Streams start empty at 0; the first event and a freshly created entity
/// are both at 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The version of an empty stream.
    pub fn initial() -> Self {
        Self(0)
    }

    /// The version of the first event, or of a newly created entity.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// An event that has been serialized but not yet placed in a stream.
///
/// The log assigns aggregate, type and version on append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl NewEvent {
    /// Serializes `payload` into a new event of the given type.
    pub fn new<T: Serialize>(
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::from_json(event_type, serde_json::to_value(payload)?))
    }

    /// Wraps an already serialized payload.
    pub fn from_json(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Places the event at `version` in the stream of `aggregate_id`.
    pub fn into_stored(
        self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
    ) -> StoredEvent {
        StoredEvent {
            event_id: self.event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: self.event_type,
            payload: self.payload,
            timestamp: self.timestamp,
            version,
        }
    }
}

/// An immutable entry of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The aggregate whose stream this event belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g., "Customer").
    pub aggregate_type: String,

    /// The type of the event (e.g., "CustomerCreated").
    pub event_type: String,

    /// The serialized event.
    pub payload: serde_json::Value,

    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,

    /// The version of the aggregate's stream after this event.
    pub version: Version,
}

impl StoredEvent {
    /// Deserializes the payload back into a typed event.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Renamed {
        customer: String,
        name: String,
    }

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = Version::new(2);
        assert!(v1 < v2);
        assert_eq!(v1.next(), v2);
    }

    #[test]
    fn version_initial_and_first() {
        assert_eq!(Version::initial().as_i64(), 0);
        assert_eq!(Version::first().as_i64(), 1);
        assert_eq!(Version::initial().next(), Version::first());
    }

    #[test]
    fn new_event_keeps_payload_through_storage() {
        let payload = Renamed {
            customer: "c-1".to_string(),
            name: "Maria".to_string(),
        };
        let aggregate_id = AggregateId::new();

        let stored = NewEvent::new("CustomerRenamed", &payload)
            .unwrap()
            .into_stored(aggregate_id, "Customer", Version::first());

        assert_eq!(stored.aggregate_id, aggregate_id);
        assert_eq!(stored.aggregate_type, "Customer");
        assert_eq!(stored.event_type, "CustomerRenamed");
        assert_eq!(stored.version, Version::first());
        assert_eq!(stored.decode::<Renamed>().unwrap(), payload);
    }

    #[test]
    fn each_new_event_gets_its_own_id() {
        let a = NewEvent::from_json("A", serde_json::json!({}));
        let b = NewEvent::from_json("A", serde_json::json!({}));
        assert_ne!(a.event_id, b.event_id);
    }
}

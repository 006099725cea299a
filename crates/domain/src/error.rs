//! Domain error types.

use event_store::{EventStoreError, Version};
use thiserror::Error;

use crate::customer::CustomerError;
use crate::unit_of_work::StorageError;

/// Fields that must be unique across all customers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniqueField {
    Document,
    Email,
}

impl std::fmt::Display for UniqueField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueField::Document => write!(f, "document"),
            UniqueField::Email => write!(f, "email"),
        }
    }
}

/// A write lost against concurrent or pre-existing state.
#[derive(Debug, Error)]
pub enum Conflict {
    /// Another customer already holds this document or email.
    #[error("{field} '{value}' is already registered")]
    Duplicate { field: UniqueField, value: String },

    /// The entity changed after it was loaded.
    #[error("{entity} {id} was modified concurrently (expected version {expected})")]
    Concurrent {
        entity: &'static str,
        id: String,
        expected: Version,
    },
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The target entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness or optimistic-concurrency violation.
    #[error("Conflict: {0}")]
    Conflict(#[from] Conflict),

    /// A customer rule rejected the command.
    #[error("Invalid state: {0}")]
    InvalidState(CustomerError),

    /// Storage failed for a reason unrelated to the command itself.
    #[error("Storage failure: {0}")]
    StorageFailure(StorageError),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::NotFound { .. } => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::InvalidState(_) => "invalid_state",
            DomainError::StorageFailure(_) => "storage_failure",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::Conflict(_))
    }
}

impl From<CustomerError> for DomainError {
    fn from(e: CustomerError) -> Self {
        match e {
            CustomerError::AddressNotFound { address_id } => {
                DomainError::not_found("Address", address_id)
            }
            other => DomainError::InvalidState(other),
        }
    }
}

impl From<StorageError> for DomainError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Duplicate { field, value } => {
                DomainError::Conflict(Conflict::Duplicate { field, value })
            }
            StorageError::StaleVersion {
                entity,
                id,
                expected,
            } => DomainError::Conflict(Conflict::Concurrent {
                entity,
                id,
                expected,
            }),
            StorageError::EventStore(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                ..
            }) => DomainError::Conflict(Conflict::Concurrent {
                entity: "event stream",
                id: aggregate_id.to_string(),
                expected,
            }),
            other => DomainError::StorageFailure(other),
        }
    }
}

impl From<EventStoreError> for DomainError {
    fn from(e: EventStoreError) -> Self {
        StorageError::EventStore(e).into()
    }
}

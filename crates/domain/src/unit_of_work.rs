//! Transaction boundary for command handlers.

use async_trait::async_trait;
use event_store::{EventLog, EventStoreError, Version};
use thiserror::Error;

use crate::error::UniqueField;
use crate::repository::{AddressRepository, CustomerRepository};

/// Failures reported by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A unique document or email constraint rejected the write.
    #[error("Duplicate {field}: {value}")]
    Duplicate { field: UniqueField, value: String },

    /// The row changed (or vanished) since it was read.
    #[error("Stale {entity} {id}: expected version {expected}")]
    StaleVersion {
        entity: &'static str,
        id: String,
        expected: Version,
    },

    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    /// The unit of work was already committed or rolled back.
    #[error("Transaction already closed")]
    TransactionClosed,

    #[error("Backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    pub fn backend(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        StorageError::Backend(Box::new(e))
    }
}

/// One atomic scope of reads and writes.
///
/// Repositories and the event log returned here share the unit's
/// transaction. Writes become visible to others only after a successful
/// [`commit`](UnitOfWork::commit). Dropping the unit without committing
/// discards everything it staged.
#[async_trait]
pub trait UnitOfWork: Send {
    fn customers(&mut self) -> &mut dyn CustomerRepository;

    fn addresses(&mut self) -> &mut dyn AddressRepository;

    fn events(&mut self) -> &mut dyn EventLog;

    /// Commits all staged writes atomically.
    ///
    /// Never errors: on failure everything is rolled back, `false` is
    /// returned and the cause is kept for [`take_failure`](Self::take_failure).
    async fn commit(&mut self) -> bool;

    /// Discards all staged writes.
    async fn rollback(&mut self);

    /// Why the last `commit` returned `false`.
    fn take_failure(&mut self) -> Option<StorageError>;
}

/// A storage backend able to open units of work.
#[async_trait]
pub trait Database: Send + Sync {
    type UnitOfWork: UnitOfWork;

    async fn begin(&self) -> Result<Self::UnitOfWork, StorageError>;
}

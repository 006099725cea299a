use thiserror::Error;

/// Errors raised while setting up the PostgreSQL backend.
///
/// Failures inside a unit of work are reported as
/// [`StorageError`](domain::StorageError) instead.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

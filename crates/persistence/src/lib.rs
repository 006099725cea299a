//! PostgreSQL backend for the customer registry.
//!
//! [`PgDatabase`] opens one database transaction per unit of work; the
//! customer and address repositories and the event log all run on it.

pub mod config;
pub mod error;
pub mod postgres;

pub use config::PersistenceConfig;
pub use error::PersistenceError;
pub use postgres::{PgDatabase, PgUnitOfWork};

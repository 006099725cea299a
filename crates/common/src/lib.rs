//! Shared types used across the customer registry crates.

mod page;
mod types;

pub use page::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, Page, PageRequest};
pub use types::AggregateId;

//! Repository ports. Implementations live behind a unit of work, so every
//! method sees that unit's uncommitted writes.

use async_trait::async_trait;
use common::{AggregateId, Page, PageRequest};
use event_store::Version;

use crate::customer::{Address, AddressId, Customer};
use crate::unit_of_work::StorageError;

#[async_trait]
pub trait CustomerRepository: Send {
    /// Loads the customer row only; the address collection is left empty.
    async fn get_by_id(&mut self, id: AggregateId) -> Result<Option<Customer>, StorageError>;

    /// Loads the customer together with all of its addresses.
    async fn get_with_addresses(
        &mut self,
        id: AggregateId,
    ) -> Result<Option<Customer>, StorageError>;

    async fn get_by_document(&mut self, document: &str)
    -> Result<Option<Customer>, StorageError>;

    async fn get_by_email(&mut self, email: &str) -> Result<Option<Customer>, StorageError>;

    /// Whether any customer other than `excluding` holds `document`.
    async fn document_exists(
        &mut self,
        document: &str,
        excluding: Option<AggregateId>,
    ) -> Result<bool, StorageError>;

    /// Whether any customer other than `excluding` holds `email`.
    async fn email_exists(
        &mut self,
        email: &str,
        excluding: Option<AggregateId>,
    ) -> Result<bool, StorageError>;

    /// Customers ordered by name, without addresses.
    async fn get_paged(&mut self, page: PageRequest) -> Result<Page<Customer>, StorageError>;

    /// Case-insensitive substring match on name or document, ordered by
    /// name. A blank term matches everything.
    async fn search(
        &mut self,
        term: &str,
        page: PageRequest,
    ) -> Result<Page<Customer>, StorageError>;

    /// Inserts the customer row. Addresses are written separately.
    async fn add(&mut self, customer: &Customer) -> Result<(), StorageError>;

    /// Overwrites the customer row if its stored version is still
    /// `expected_version`.
    async fn update(
        &mut self,
        customer: &Customer,
        expected_version: Version,
    ) -> Result<(), StorageError>;

    async fn remove(
        &mut self,
        id: AggregateId,
        expected_version: Version,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait AddressRepository: Send {
    async fn get_by_id(&mut self, id: AddressId) -> Result<Option<Address>, StorageError>;

    /// Addresses of one customer, in insertion order.
    async fn get_by_customer_id(
        &mut self,
        customer_id: AggregateId,
    ) -> Result<Vec<Address>, StorageError>;

    async fn add(&mut self, address: &Address) -> Result<(), StorageError>;

    async fn update(
        &mut self,
        address: &Address,
        expected_version: Version,
    ) -> Result<(), StorageError>;

    async fn remove(&mut self, id: AddressId, expected_version: Version)
    -> Result<(), StorageError>;
}

/// Case-insensitive substring match used by `CustomerRepository::search`.
pub fn matches_search(customer: &Customer, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    term.is_empty()
        || customer.name().to_lowercase().contains(&term)
        || customer.document().to_lowercase().contains(&term)
}

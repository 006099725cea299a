//! Domain layer for the customer registry.
//!
//! This crate provides:
//! - the `Customer` aggregate with its owned addresses and business rules
//! - address reconciliation against a submitted target list
//! - repository and unit-of-work abstractions plus an in-memory backend
//! - `CustomerService`, which runs each command as one atomic unit of work
//!   and records one audit event per effective change

pub mod aggregate;
pub mod command;
pub mod customer;
pub mod entity;
pub mod error;
pub mod memory;
pub mod repository;
pub mod uniqueness;
pub mod unit_of_work;

pub use aggregate::{Aggregate, DomainEvent, DomainEventLog};
pub use command::{Command, CommandResult};
pub use customer::{
    ActivateCustomer, AddAddress, Address, AddressChanges, AddressDetails, AddressId,
    AddressInput, CreateCustomer, Customer, CustomerDetails, CustomerError, CustomerEvent,
    CustomerService, DeactivateCustomer, DeleteAddress, DeleteCustomer, PersonProfile,
    PersonType, UpdateAddress, UpdateCustomer,
};
pub use entity::{EntityMeta, HasIdentity, HasVersion};
pub use error::{Conflict, DomainError, UniqueField};
pub use memory::{InMemoryDatabase, InMemoryUnitOfWork};
pub use repository::{AddressRepository, CustomerRepository};
pub use unit_of_work::{Database, StorageError, UnitOfWork};

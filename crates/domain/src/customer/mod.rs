//! Customer aggregate and related types.

mod address;
mod aggregate;
mod commands;
mod events;
mod person;
pub mod reconcile;
mod service;
mod value_objects;

pub use address::{Address, AddressDetails, AddressInput};
pub use aggregate::{AddressChanges, Customer, UpdateOutcome};
pub use commands::*;
pub use events::{
    AddressData, AddressRemovedData, CustomerCreatedData, CustomerEvent, CustomerRemovedData,
    CustomerStatusData, CustomerUpdatedData,
};
pub use person::{
    CustomerDetails, MINIMUM_AGE_YEARS, PersonProfile, PersonType, is_adult_on,
};
pub use reconcile::{ReconcilePlan, reconcile};
pub use service::CustomerService;
pub use value_objects::AddressId;

use chrono::NaiveDate;
use thiserror::Error;

/// Business rule violations raised by the customer aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustomerError {
    /// Physical person younger than the minimum age.
    #[error("Customer born on {birth_date} is under {minimum_age} years old")]
    Underage {
        birth_date: NaiveDate,
        minimum_age: u32,
    },

    /// Legal person without a state registration that is not exempt.
    #[error("State registration is required unless the company is exempt")]
    MissingStateRegistration,

    /// Attempt to change the person type of an existing customer.
    #[error("Person type cannot change: customer is {expected}, got {actual}")]
    PersonTypeMismatch {
        expected: PersonType,
        actual: PersonType,
    },

    #[error("Invalid state code: {value:?} (expected two letters)")]
    InvalidStateCode { value: String },

    /// The address does not belong to this customer.
    #[error("Address not found: {address_id}")]
    AddressNotFound { address_id: AddressId },
}

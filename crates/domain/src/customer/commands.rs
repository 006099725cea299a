//! Customer commands.

use common::AggregateId;

use super::{AddressDetails, AddressId, AddressInput, CustomerDetails};
use crate::command::Command;

/// Command to register a new customer.
#[derive(Debug, Clone)]
pub struct CreateCustomer {
    /// The id the customer will be stored under.
    pub customer_id: AggregateId,
    pub details: CustomerDetails,
    pub addresses: Vec<AddressDetails>,
}

impl CreateCustomer {
    /// Creates a new CreateCustomer command with a generated customer ID.
    pub fn new(details: CustomerDetails, addresses: Vec<AddressDetails>) -> Self {
        Self {
            customer_id: AggregateId::new(),
            details,
            addresses,
        }
    }
}

impl Command for CreateCustomer {
    const NAME: &'static str = "create_customer";
}

/// Command to replace a customer's details, status and address collection.
#[derive(Debug, Clone)]
pub struct UpdateCustomer {
    pub customer_id: AggregateId,
    pub details: CustomerDetails,
    pub active: bool,
    /// The complete desired address collection.
    pub addresses: Vec<AddressInput>,
}

impl Command for UpdateCustomer {
    const NAME: &'static str = "update_customer";
}

#[derive(Debug, Clone)]
pub struct DeleteCustomer {
    pub customer_id: AggregateId,
}

impl Command for DeleteCustomer {
    const NAME: &'static str = "delete_customer";
}

#[derive(Debug, Clone)]
pub struct ActivateCustomer {
    pub customer_id: AggregateId,
}

impl Command for ActivateCustomer {
    const NAME: &'static str = "activate_customer";
}

#[derive(Debug, Clone)]
pub struct DeactivateCustomer {
    pub customer_id: AggregateId,
}

impl Command for DeactivateCustomer {
    const NAME: &'static str = "deactivate_customer";
}

/// Command to add one address to an existing customer.
#[derive(Debug, Clone)]
pub struct AddAddress {
    pub customer_id: AggregateId,
    pub details: AddressDetails,
}

impl Command for AddAddress {
    const NAME: &'static str = "add_address";
}

/// Command to overwrite one address. The address must belong to
/// `customer_id`.
#[derive(Debug, Clone)]
pub struct UpdateAddress {
    pub customer_id: AggregateId,
    pub address_id: AddressId,
    pub details: AddressDetails,
}

impl Command for UpdateAddress {
    const NAME: &'static str = "update_address";
}

/// Command to delete an address. The owner is looked up from the address.
#[derive(Debug, Clone)]
pub struct DeleteAddress {
    pub address_id: AddressId,
}

impl Command for DeleteAddress {
    const NAME: &'static str = "delete_address";
}

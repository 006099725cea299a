use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use super::{AddressId, CustomerError};
use crate::entity::{EntityMeta, HasIdentity, HasVersion};

/// Postal data of an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressDetails {
    pub postal_code: String,
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub district: String,
    pub city: String,
    /// Two-letter state code, stored upper-case.
    pub state: String,
}

impl AddressDetails {
    /// Validates the state code and returns the details in stored form.
    pub fn normalized(mut self) -> Result<Self, CustomerError> {
        let state = self.state.trim();
        if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CustomerError::InvalidStateCode {
                value: self.state.clone(),
            });
        }
        self.state = state.to_ascii_uppercase();
        Ok(self)
    }
}

/// An address owned by exactly one customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    meta: EntityMeta<AddressId>,
    customer_id: AggregateId,
    details: AddressDetails,
}

impl Address {
    /// Builds a new member from already normalized details.
    pub(crate) fn new(customer_id: AggregateId, details: AddressDetails) -> Self {
        Self {
            meta: EntityMeta::new(AddressId::new()),
            customer_id,
            details,
        }
    }

    /// Rebuilds an address read back from storage.
    pub fn restore(
        meta: EntityMeta<AddressId>,
        customer_id: AggregateId,
        details: AddressDetails,
    ) -> Self {
        Self {
            meta,
            customer_id,
            details,
        }
    }

    pub fn meta(&self) -> &EntityMeta<AddressId> {
        &self.meta
    }

    pub fn customer_id(&self) -> AggregateId {
        self.customer_id
    }

    pub fn details(&self) -> &AddressDetails {
        &self.details
    }

    /// Replaces the details. Returns `false`, and leaves the version alone,
    /// when nothing differs.
    pub(crate) fn replace_details(&mut self, details: AddressDetails) -> bool {
        if self.details == details {
            return false;
        }
        self.details = details;
        self.meta.touch();
        true
    }
}

impl HasIdentity for Address {
    type Id = AddressId;

    fn id(&self) -> AddressId {
        self.meta.id()
    }
}

impl HasVersion for Address {
    fn version(&self) -> Version {
        self.meta.version()
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.meta.updated_at()
    }
}

/// One entry of a client-supplied address collection.
///
/// `id: None` asks for a new address; `Some(id)` targets the existing
/// address with that id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInput {
    pub id: Option<AddressId>,
    pub details: AddressDetails,
}

impl AddressInput {
    pub fn new(details: AddressDetails) -> Self {
        Self { id: None, details }
    }

    pub fn existing(id: AddressId, details: AddressDetails) -> Self {
        Self {
            id: Some(id),
            details,
        }
    }
}

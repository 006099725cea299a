//! Customer domain events.
//!
//! Every event lands in the owning customer's stream, address events
//! included.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use super::{Address, AddressChanges, AddressDetails, AddressId, Customer, PersonProfile};
use crate::aggregate::DomainEvent;
use crate::entity::HasIdentity;

/// Events recorded against a customer aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CustomerEvent {
    /// Customer was registered.
    CustomerCreated(CustomerCreatedData),

    /// Customer details or address collection changed.
    CustomerUpdated(CustomerUpdatedData),

    CustomerActivated(CustomerStatusData),

    CustomerDeactivated(CustomerStatusData),

    /// Customer and all of its addresses were deleted.
    CustomerRemoved(CustomerRemovedData),

    AddressAdded(AddressData),

    AddressUpdated(AddressData),

    AddressRemoved(AddressRemovedData),
}

impl DomainEvent for CustomerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CustomerEvent::CustomerCreated(_) => "CustomerCreated",
            CustomerEvent::CustomerUpdated(_) => "CustomerUpdated",
            CustomerEvent::CustomerActivated(_) => "CustomerActivated",
            CustomerEvent::CustomerDeactivated(_) => "CustomerDeactivated",
            CustomerEvent::CustomerRemoved(_) => "CustomerRemoved",
            CustomerEvent::AddressAdded(_) => "AddressAdded",
            CustomerEvent::AddressUpdated(_) => "AddressUpdated",
            CustomerEvent::AddressRemoved(_) => "AddressRemoved",
        }
    }
}

/// Data for CustomerCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerCreatedData {
    pub customer_id: AggregateId,
    pub name: String,
    pub document: String,
    pub phone: String,
    pub email: String,
    pub profile: PersonProfile,
    pub addresses: Vec<AddressData>,
    pub created_at: DateTime<Utc>,
}

/// Data for CustomerUpdated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerUpdatedData {
    pub customer_id: AggregateId,
    pub name: String,
    pub document: String,
    pub phone: String,
    pub email: String,
    pub profile: PersonProfile,
    pub active: bool,
    pub addresses_added: Vec<AddressId>,
    pub addresses_updated: Vec<AddressId>,
    pub addresses_removed: Vec<AddressId>,
    pub updated_at: DateTime<Utc>,
}

/// Data for CustomerActivated and CustomerDeactivated events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerStatusData {
    pub customer_id: AggregateId,
    pub changed_at: DateTime<Utc>,
}

/// Data for CustomerRemoved event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRemovedData {
    pub customer_id: AggregateId,
    pub document: String,
    pub email: String,
    pub addresses_removed: Vec<AddressId>,
    pub removed_at: DateTime<Utc>,
}

/// Data for AddressAdded and AddressUpdated events, and for the addresses
/// listed in CustomerCreated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressData {
    pub customer_id: AggregateId,
    pub address_id: AddressId,
    pub details: AddressDetails,
}

/// Data for AddressRemoved event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRemovedData {
    pub customer_id: AggregateId,
    pub address_id: AddressId,
}

impl From<&Address> for AddressData {
    fn from(address: &Address) -> Self {
        Self {
            customer_id: address.customer_id(),
            address_id: address.id(),
            details: address.details().clone(),
        }
    }
}

// Convenience constructors
impl CustomerEvent {
    pub fn customer_created(customer: &Customer) -> Self {
        let details = customer.details();
        CustomerEvent::CustomerCreated(CustomerCreatedData {
            customer_id: customer.id(),
            name: details.name.clone(),
            document: details.document.clone(),
            phone: details.phone.clone(),
            email: details.email.clone(),
            profile: details.profile.clone(),
            addresses: customer.addresses().iter().map(AddressData::from).collect(),
            created_at: customer.meta().created_at(),
        })
    }

    pub fn customer_updated(customer: &Customer, changes: &AddressChanges) -> Self {
        let details = customer.details();
        CustomerEvent::CustomerUpdated(CustomerUpdatedData {
            customer_id: customer.id(),
            name: details.name.clone(),
            document: details.document.clone(),
            phone: details.phone.clone(),
            email: details.email.clone(),
            profile: details.profile.clone(),
            active: customer.is_active(),
            addresses_added: changes.added.clone(),
            addresses_updated: changes.updated.clone(),
            addresses_removed: changes.removed.clone(),
            updated_at: Utc::now(),
        })
    }

    pub fn status_changed(customer: &Customer) -> Self {
        let data = CustomerStatusData {
            customer_id: customer.id(),
            changed_at: Utc::now(),
        };
        if customer.is_active() {
            CustomerEvent::CustomerActivated(data)
        } else {
            CustomerEvent::CustomerDeactivated(data)
        }
    }

    pub fn customer_removed(customer: &Customer, addresses_removed: Vec<AddressId>) -> Self {
        CustomerEvent::CustomerRemoved(CustomerRemovedData {
            customer_id: customer.id(),
            document: customer.document().to_string(),
            email: customer.email().to_string(),
            addresses_removed,
            removed_at: Utc::now(),
        })
    }

    pub fn address_added(address: &Address) -> Self {
        CustomerEvent::AddressAdded(address.into())
    }

    pub fn address_updated(address: &Address) -> Self {
        CustomerEvent::AddressUpdated(address.into())
    }

    pub fn address_removed(address: &Address) -> Self {
        CustomerEvent::AddressRemoved(AddressRemovedData {
            customer_id: address.customer_id(),
            address_id: address.id(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::customer::CustomerDetails;

    fn customer() -> Customer {
        Customer::register(
            AggregateId::new(),
            CustomerDetails {
                name: "Joao".to_string(),
                document: "11144477735".to_string(),
                phone: "2199998888".to_string(),
                email: "joao@example.com".to_string(),
                profile: PersonProfile::Physical {
                    birth_date: NaiveDate::from_ymd_opt(1980, 3, 15).unwrap(),
                },
            },
            vec![AddressDetails {
                postal_code: "80010-000".to_string(),
                street: "Rua XV".to_string(),
                number: "1".to_string(),
                complement: None,
                district: "Centro".to_string(),
                city: "Curitiba".to_string(),
                state: "PR".to_string(),
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_event_type_names() {
        let customer = customer();
        assert_eq!(
            CustomerEvent::customer_created(&customer).event_type(),
            "CustomerCreated"
        );
        assert_eq!(
            CustomerEvent::status_changed(&customer).event_type(),
            "CustomerActivated"
        );
        assert_eq!(
            CustomerEvent::address_removed(&customer.addresses()[0]).event_type(),
            "AddressRemoved"
        );
    }

    #[test]
    fn test_payload_is_adjacently_tagged() {
        let customer = customer();
        let event = CustomerEvent::customer_created(&customer);

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "CustomerCreated");
        assert_eq!(json["data"]["document"], "11144477735");
        assert_eq!(json["data"]["profile"]["person_type"], "Physical");
        assert_eq!(json["data"]["addresses"][0]["details"]["city"], "Curitiba");

        let back: CustomerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_updated_payload_carries_new_birth_date() {
        let mut customer = customer();
        let mut details = customer.details().clone();
        let birth_date = NaiveDate::from_ymd_opt(1981, 4, 16).unwrap();
        details.profile = PersonProfile::Physical { birth_date };
        customer.update_details(details).unwrap();

        let event = CustomerEvent::customer_updated(&customer, &AddressChanges::default());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "CustomerUpdated");
        assert_eq!(json["data"]["profile"]["birth_date"], "1981-04-16");
        match event {
            CustomerEvent::CustomerUpdated(data) => {
                assert_eq!(data.profile.birth_date(), Some(birth_date))
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

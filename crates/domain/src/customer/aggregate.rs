//! Customer aggregate implementation.

use chrono::{DateTime, NaiveDate, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use super::{
    Address, AddressDetails, AddressId, AddressInput, CustomerDetails, CustomerError,
    CustomerEvent, PersonType,
    person::{check_age, today},
    reconcile::reconcile,
};
use crate::aggregate::Aggregate;
use crate::entity::{EntityMeta, HasIdentity, HasVersion};

/// Net effect of one address reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressChanges {
    pub added: Vec<AddressId>,
    /// Only addresses whose details actually changed.
    pub updated: Vec<AddressId>,
    pub removed: Vec<AddressId>,
}

impl AddressChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Whether an address was added or removed.
    pub fn changes_membership(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Net effect of [`Customer::apply_update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub details_changed: bool,
    pub status_changed: bool,
    pub addresses: AddressChanges,
}

impl UpdateOutcome {
    pub fn is_empty(&self) -> bool {
        !self.details_changed && !self.status_changed && self.addresses.is_empty()
    }

    fn touches_customer(&self) -> bool {
        self.details_changed || self.status_changed || self.addresses.changes_membership()
    }
}

fn normalized_target(target: &[AddressInput]) -> Result<Vec<AddressInput>, CustomerError> {
    target
        .iter()
        .map(|input| {
            Ok(AddressInput {
                id: input.id,
                details: input.details.clone().normalized()?,
            })
        })
        .collect()
}

/// Customer aggregate root.
///
/// Owns its addresses. Every constructor validates, so a `Customer` value
/// is never in a state that breaks the age or registration rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    meta: EntityMeta<AggregateId>,
    details: CustomerDetails,
    active: bool,
    addresses: Vec<Address>,
}

impl Aggregate for Customer {
    type Event = CustomerEvent;

    fn aggregate_type() -> &'static str {
        "Customer"
    }
}

impl HasIdentity for Customer {
    type Id = AggregateId;

    fn id(&self) -> AggregateId {
        self.meta.id()
    }
}

impl HasVersion for Customer {
    fn version(&self) -> Version {
        self.meta.version()
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.meta.updated_at()
    }
}

// Construction
impl Customer {
    /// Registers a new, active customer with its initial addresses.
    ///
    /// Initial addresses are part of the creation and do not bump the
    /// version, which starts at 1.
    pub fn register(
        id: AggregateId,
        details: CustomerDetails,
        addresses: Vec<AddressDetails>,
    ) -> Result<Self, CustomerError> {
        details.profile.validate_on(today())?;
        let addresses = addresses
            .into_iter()
            .map(|d| Ok(Address::new(id, d.normalized()?)))
            .collect::<Result<Vec<_>, CustomerError>>()?;

        Ok(Self {
            meta: EntityMeta::new(id),
            details,
            active: true,
            addresses,
        })
    }

    /// Rebuilds a customer read back from storage.
    pub fn restore(
        meta: EntityMeta<AggregateId>,
        details: CustomerDetails,
        active: bool,
        addresses: Vec<Address>,
    ) -> Self {
        Self {
            meta,
            details,
            active,
            addresses,
        }
    }

    /// Replaces the loaded address collection.
    pub fn with_addresses(mut self, addresses: Vec<Address>) -> Self {
        self.addresses = addresses;
        self
    }
}

// Query methods
impl Customer {
    pub fn meta(&self) -> &EntityMeta<AggregateId> {
        &self.meta
    }

    pub fn details(&self) -> &CustomerDetails {
        &self.details
    }

    pub fn name(&self) -> &str {
        &self.details.name
    }

    pub fn document(&self) -> &str {
        &self.details.document
    }

    pub fn email(&self) -> &str {
        &self.details.email
    }

    pub fn person_type(&self) -> PersonType {
        self.details.person_type()
    }

    /// `None` for legal persons.
    pub fn birth_date(&self) -> Option<NaiveDate> {
        self.details.profile.birth_date()
    }

    /// `None` for physical persons, or when not registered.
    pub fn state_registration(&self) -> Option<&str> {
        self.details.profile.state_registration()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn address(&self, id: AddressId) -> Option<&Address> {
        self.addresses.iter().find(|a| a.id() == id)
    }
}

// Mutations
impl Customer {
    /// Replaces the editable fields.
    ///
    /// The person type cannot change. Age is re-checked only when the birth
    /// date changes. Returns `false` without touching the version when the
    /// details are identical.
    pub fn update_details(&mut self, details: CustomerDetails) -> Result<bool, CustomerError> {
        self.check_details(&details)?;
        if details == self.details {
            return Ok(false);
        }
        self.details = details;
        self.meta.touch();
        Ok(true)
    }

    /// Applies a full update (details, status and the whole address
    /// collection) as one mutation.
    ///
    /// Everything is validated before anything changes. The customer's
    /// version moves at most once: when the details, the status or the
    /// address membership changed. In-place address edits bump only the
    /// addresses concerned.
    pub fn apply_update(
        &mut self,
        details: CustomerDetails,
        active: bool,
        target: &[AddressInput],
    ) -> Result<UpdateOutcome, CustomerError> {
        self.check_details(&details)?;
        let target = normalized_target(target)?;

        let details_changed = details != self.details;
        if details_changed {
            self.details = details;
        }
        let status_changed = self.active != active;
        self.active = active;
        let addresses = self.apply_reconcile(&target);

        let outcome = UpdateOutcome {
            details_changed,
            status_changed,
            addresses,
        };
        if outcome.touches_customer() {
            self.meta.touch();
        }
        Ok(outcome)
    }

    pub fn activate(&mut self) {
        self.active = true;
        self.meta.touch();
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.meta.touch();
    }

    pub fn add_address(&mut self, details: AddressDetails) -> Result<AddressId, CustomerError> {
        let address = Address::new(self.id(), details.normalized()?);
        let id = address.id();
        self.addresses.push(address);
        self.meta.touch();
        Ok(id)
    }

    pub fn remove_address(&mut self, id: AddressId) -> Result<Address, CustomerError> {
        let index = self.position(id)?;
        let removed = self.addresses.remove(index);
        self.meta.touch();
        Ok(removed)
    }

    /// Overwrites one address in place. Only the address's own version
    /// moves, and only if something changed.
    pub fn update_address(
        &mut self,
        id: AddressId,
        details: AddressDetails,
    ) -> Result<bool, CustomerError> {
        let details = details.normalized()?;
        let index = self.position(id)?;
        Ok(self.addresses[index].replace_details(details))
    }

    /// Makes the address collection match `target`.
    ///
    /// Every target entry is validated before anything changes. Removals
    /// apply first, then updates, then additions. The customer's own version
    /// moves once for the whole pass, and only if membership changed.
    pub fn reconcile_addresses(
        &mut self,
        target: &[AddressInput],
    ) -> Result<AddressChanges, CustomerError> {
        let target = normalized_target(target)?;
        let changes = self.apply_reconcile(&target);
        if changes.changes_membership() {
            self.meta.touch();
        }
        Ok(changes)
    }

    /// Type, age and registration checks shared by every details update.
    fn check_details(&self, details: &CustomerDetails) -> Result<(), CustomerError> {
        let (expected, actual) = (self.person_type(), details.person_type());
        if expected != actual {
            return Err(CustomerError::PersonTypeMismatch { expected, actual });
        }

        if let Some(birth_date) = details.profile.birth_date()
            && Some(birth_date) != self.birth_date()
        {
            check_age(birth_date, today())?;
        }
        // Registration or exemption is required on every legal update.
        if self.person_type() == PersonType::Legal {
            details.profile.validate_on(today())?;
        }
        Ok(())
    }

    /// Applies an already normalized target without touching the customer.
    fn apply_reconcile(&mut self, target: &[AddressInput]) -> AddressChanges {
        let plan = reconcile(&self.addresses, target);
        let mut changes = AddressChanges::default();

        self.addresses.retain(|a| !plan.to_remove.contains(&a.id()));
        changes.removed = plan.to_remove;

        for (id, details) in plan.to_update {
            if let Some(address) = self.addresses.iter_mut().find(|a| a.id() == id)
                && address.replace_details(details)
            {
                changes.updated.push(id);
            }
        }

        for details in plan.to_add {
            let address = Address::new(self.id(), details);
            changes.added.push(address.id());
            self.addresses.push(address);
        }
        changes
    }

    fn position(&self, id: AddressId) -> Result<usize, CustomerError> {
        self.addresses
            .iter()
            .position(|a| a.id() == id)
            .ok_or(CustomerError::AddressNotFound { address_id: id })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Months;

    use super::*;
    use crate::customer::PersonProfile;

    fn years_ago(years: u32) -> NaiveDate {
        today().checked_sub_months(Months::new(years * 12)).unwrap()
    }

    fn physical(document: &str) -> CustomerDetails {
        CustomerDetails {
            name: "Maria Souza".to_string(),
            document: document.to_string(),
            phone: "11999990000".to_string(),
            email: format!("{document}@example.com"),
            profile: PersonProfile::Physical {
                birth_date: years_ago(30),
            },
        }
    }

    fn legal(state_registration: Option<&str>, exempt: bool) -> CustomerDetails {
        CustomerDetails {
            name: "Acme Ltda".to_string(),
            document: "12345678000199".to_string(),
            phone: "1133334444".to_string(),
            email: "contato@acme.com".to_string(),
            profile: PersonProfile::Legal {
                state_registration: state_registration.map(str::to_string),
                registration_exempt: exempt,
                founding_date: None,
            },
        }
    }

    fn address(street: &str) -> AddressDetails {
        AddressDetails {
            postal_code: "30130-010".to_string(),
            street: street.to_string(),
            number: "55".to_string(),
            complement: Some("apto 1".to_string()),
            district: "Centro".to_string(),
            city: "Belo Horizonte".to_string(),
            state: "mg".to_string(),
        }
    }

    fn registered(addresses: usize) -> Customer {
        Customer::register(
            AggregateId::new(),
            physical("52998224725"),
            (0..addresses).map(|i| address(&format!("Rua {i}"))).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_register_starts_at_version_one() {
        let customer = registered(2);

        assert_eq!(customer.version(), Version::first());
        assert!(customer.is_active());
        assert_eq!(customer.addresses().len(), 2);
        assert!(customer.addresses().iter().all(|a| a.customer_id() == customer.id()));
        assert_eq!(customer.addresses()[0].details().state, "MG");
    }

    #[test]
    fn test_register_exactly_eighteen() {
        let mut details = physical("1");
        details.profile = PersonProfile::Physical {
            birth_date: years_ago(18),
        };
        assert!(Customer::register(AggregateId::new(), details, vec![]).is_ok());
    }

    #[test]
    fn test_register_one_day_short_of_eighteen() {
        let mut details = physical("1");
        details.profile = PersonProfile::Physical {
            birth_date: years_ago(18).succ_opt().unwrap(),
        };
        assert!(matches!(
            Customer::register(AggregateId::new(), details, vec![]),
            Err(CustomerError::Underage { .. })
        ));
    }

    #[test]
    fn test_legal_person_registration_rule() {
        assert!(matches!(
            Customer::register(AggregateId::new(), legal(Some(" "), false), vec![]),
            Err(CustomerError::MissingStateRegistration)
        ));
        let exempt = Customer::register(AggregateId::new(), legal(None, true), vec![]).unwrap();
        assert_eq!(exempt.person_type(), PersonType::Legal);
        assert_eq!(exempt.birth_date(), None);
    }

    #[test]
    fn test_register_rejects_bad_address() {
        let mut bad = address("Rua");
        bad.state = "XYZ".to_string();
        assert!(matches!(
            Customer::register(AggregateId::new(), physical("1"), vec![bad]),
            Err(CustomerError::InvalidStateCode { .. })
        ));
    }

    #[test]
    fn test_update_details_rejects_type_change() {
        let mut customer = registered(0);
        let result = customer.update_details(legal(Some("1"), false));

        assert!(matches!(
            result,
            Err(CustomerError::PersonTypeMismatch {
                expected: PersonType::Physical,
                actual: PersonType::Legal
            })
        ));
        assert_eq!(customer.version(), Version::first());
    }

    #[test]
    fn test_update_details_no_change_is_noop() {
        let mut customer = registered(0);
        let same = customer.details().clone();

        assert!(!customer.update_details(same).unwrap());
        assert_eq!(customer.version(), Version::first());
        assert!(customer.updated_at().is_none());
    }

    #[test]
    fn test_update_details_rechecks_age_only_on_birth_date_change() {
        let mut customer = registered(0);

        let mut renamed = customer.details().clone();
        renamed.name = "Maria S.".to_string();
        assert!(customer.update_details(renamed).unwrap());
        assert_eq!(customer.version(), Version::new(2));

        let mut younger = customer.details().clone();
        younger.profile = PersonProfile::Physical {
            birth_date: years_ago(10),
        };
        assert!(matches!(
            customer.update_details(younger),
            Err(CustomerError::Underage { .. })
        ));
        assert_eq!(customer.name(), "Maria S.");
    }

    #[test]
    fn test_activation_bumps_each_call() {
        let mut customer = registered(0);
        customer.deactivate();
        customer.deactivate();
        assert!(!customer.is_active());
        assert_eq!(customer.version(), Version::new(3));
        customer.activate();
        assert!(customer.is_active());
    }

    #[test]
    fn test_add_and_remove_address_bump_customer() {
        let mut customer = registered(0);
        let id = customer.add_address(address("Rua A")).unwrap();
        assert_eq!(customer.version(), Version::new(2));

        let removed = customer.remove_address(id).unwrap();
        assert_eq!(removed.id(), id);
        assert!(customer.addresses().is_empty());
        assert_eq!(customer.version(), Version::new(3));
    }

    #[test]
    fn test_remove_unknown_address() {
        let mut customer = registered(1);
        let missing = AddressId::new();
        assert!(matches!(
            customer.remove_address(missing),
            Err(CustomerError::AddressNotFound { address_id }) if address_id == missing
        ));
        assert_eq!(customer.version(), Version::first());
    }

    #[test]
    fn test_update_address_bumps_only_address() {
        let mut customer = registered(1);
        let id = customer.addresses()[0].id();

        assert!(customer.update_address(id, address("Rua Nova")).unwrap());
        assert_eq!(customer.version(), Version::first());
        assert_eq!(customer.address(id).unwrap().version(), Version::new(2));
        assert_eq!(customer.address(id).unwrap().details().street, "Rua Nova");
    }

    #[test]
    fn test_reconcile_update_plus_add() {
        let mut customer = registered(1);
        let id = customer.addresses()[0].id();

        let changes = customer
            .reconcile_addresses(&[
                AddressInput::existing(id, address("Rua Modificada")),
                AddressInput::new(address("Rua Extra")),
            ])
            .unwrap();

        assert_eq!(changes.updated, vec![id]);
        assert_eq!(changes.added.len(), 1);
        assert!(changes.removed.is_empty());
        assert_eq!(customer.addresses().len(), 2);
        assert_eq!(customer.version(), Version::new(2));
        assert_eq!(customer.address(id).unwrap().version(), Version::new(2));
    }

    #[test]
    fn test_reconcile_in_place_only_keeps_customer_version() {
        let mut customer = registered(2);
        let target: Vec<_> = customer
            .addresses()
            .iter()
            .map(|a| AddressInput::existing(a.id(), address("Rua Trocada")))
            .collect();

        let changes = customer.reconcile_addresses(&target).unwrap();

        assert_eq!(changes.updated.len(), 2);
        assert_eq!(customer.version(), Version::first());
    }

    #[test]
    fn test_reconcile_empty_target_removes_all() {
        let mut customer = registered(3);
        let changes = customer.reconcile_addresses(&[]).unwrap();

        assert_eq!(changes.removed.len(), 3);
        assert!(customer.addresses().is_empty());
        assert_eq!(customer.version(), Version::new(2));
    }

    #[test]
    fn test_reconcile_identical_target_is_noop() {
        let mut customer = registered(2);
        let target: Vec<_> = customer
            .addresses()
            .iter()
            .map(|a| AddressInput::existing(a.id(), a.details().clone()))
            .collect();

        let changes = customer.reconcile_addresses(&target).unwrap();

        assert!(changes.is_empty());
        assert_eq!(customer.version(), Version::first());
    }

    #[test]
    fn test_reconcile_validates_before_mutating() {
        let mut customer = registered(1);
        let before = customer.clone();
        let mut bad = address("Rua Ruim");
        bad.state = "1".to_string();

        let result = customer.reconcile_addresses(&[AddressInput::new(bad)]);

        assert!(result.is_err());
        assert_eq!(customer, before);
    }

    #[test]
    fn test_apply_update_bumps_once_for_everything() {
        let mut customer = registered(1);
        let kept = customer.addresses()[0].id();
        let mut details = customer.details().clone();
        details.name = "Maria S. Souza".to_string();

        let outcome = customer
            .apply_update(
                details,
                false,
                &[
                    AddressInput::existing(kept, address("Rua Nova")),
                    AddressInput::new(address("Rua Extra")),
                ],
            )
            .unwrap();

        assert!(outcome.details_changed);
        assert!(outcome.status_changed);
        assert_eq!(outcome.addresses.added.len(), 1);
        assert_eq!(outcome.addresses.updated, vec![kept]);
        assert_eq!(customer.version(), Version::first().next());
        assert!(!customer.is_active());
        assert_eq!(customer.address(kept).unwrap().version(), Version::first().next());
    }

    #[test]
    fn test_apply_update_address_edit_only_leaves_customer_version() {
        let mut customer = registered(1);
        let kept = customer.addresses()[0].id();

        let outcome = customer
            .apply_update(
                customer.details().clone(),
                true,
                &[AddressInput::existing(kept, address("Rua Nova"))],
            )
            .unwrap();

        assert!(!outcome.is_empty());
        assert_eq!(customer.version(), Version::first());
        assert_eq!(customer.address(kept).unwrap().version(), Version::first().next());
    }

    #[test]
    fn test_apply_update_identical_is_empty() {
        let mut customer = registered(1);
        let target: Vec<_> = customer
            .addresses()
            .iter()
            .map(|a| AddressInput::existing(a.id(), a.details().clone()))
            .collect();

        let outcome = customer
            .apply_update(customer.details().clone(), true, &target)
            .unwrap();

        assert!(outcome.is_empty());
        assert_eq!(customer.version(), Version::first());
    }

    #[test]
    fn test_apply_update_bad_address_changes_nothing() {
        let mut customer = registered(1);
        let before = customer.clone();
        let mut details = customer.details().clone();
        details.name = "Other".to_string();
        let mut bad = address("Rua Ruim");
        bad.state = "1".to_string();

        let result = customer.apply_update(details, false, &[AddressInput::new(bad)]);

        assert!(matches!(result, Err(CustomerError::InvalidStateCode { .. })));
        assert_eq!(customer, before);
    }
}

//! Customer service: command handlers and queries.
//!
//! Every command follows the same shape inside one unit of work: load the
//! aggregate, read the stream head, check uniqueness, mutate, write rows,
//! append exactly one event at the observed head, commit.

use common::{AggregateId, Page, PageRequest};
use event_store::StoredEvent;

use super::{
    ActivateCustomer, AddAddress, Address, AddressChanges, AddressId, CreateCustomer, Customer,
    CustomerEvent, DeactivateCustomer, DeleteAddress, DeleteCustomer, UpdateAddress,
    UpdateCustomer,
};
use crate::aggregate::DomainEventLog;
use crate::command::{Command, CommandResult};
use crate::entity::{HasIdentity, HasVersion};
use crate::error::DomainError;
use crate::uniqueness;
use crate::unit_of_work::{Database, StorageError, UnitOfWork};

/// Service for managing customers and their addresses.
pub struct CustomerService<D: Database> {
    db: D,
}

impl<D: Database> CustomerService<D> {
    /// Creates a new customer service over the given database.
    pub fn new(db: D) -> Self {
        Self { db }
    }

    /// Returns a reference to the underlying database.
    pub fn database(&self) -> &D {
        &self.db
    }

    /// Registers a new customer with its initial addresses.
    #[tracing::instrument(skip(self, cmd), fields(customer_id = %cmd.customer_id))]
    pub async fn create_customer(
        &self,
        cmd: CreateCustomer,
    ) -> Result<CommandResult, DomainError> {
        observe::<CreateCustomer>(self.handle_create(cmd).await)
    }

    /// Replaces details, status and the whole address collection.
    ///
    /// An update that changes nothing writes nothing and records no event.
    #[tracing::instrument(skip(self, cmd), fields(customer_id = %cmd.customer_id))]
    pub async fn update_customer(
        &self,
        cmd: UpdateCustomer,
    ) -> Result<CommandResult, DomainError> {
        observe::<UpdateCustomer>(self.handle_update(cmd).await)
    }

    /// Deletes the customer and all of its addresses.
    #[tracing::instrument(skip(self, cmd), fields(customer_id = %cmd.customer_id))]
    pub async fn delete_customer(
        &self,
        cmd: DeleteCustomer,
    ) -> Result<CommandResult, DomainError> {
        observe::<DeleteCustomer>(self.handle_delete(cmd).await)
    }

    #[tracing::instrument(skip(self, cmd), fields(customer_id = %cmd.customer_id))]
    pub async fn activate_customer(
        &self,
        cmd: ActivateCustomer,
    ) -> Result<CommandResult, DomainError> {
        observe::<ActivateCustomer>(self.handle_set_active(cmd.customer_id, true).await)
    }

    #[tracing::instrument(skip(self, cmd), fields(customer_id = %cmd.customer_id))]
    pub async fn deactivate_customer(
        &self,
        cmd: DeactivateCustomer,
    ) -> Result<CommandResult, DomainError> {
        observe::<DeactivateCustomer>(self.handle_set_active(cmd.customer_id, false).await)
    }

    #[tracing::instrument(skip(self, cmd), fields(customer_id = %cmd.customer_id))]
    pub async fn add_address(&self, cmd: AddAddress) -> Result<CommandResult, DomainError> {
        observe::<AddAddress>(self.handle_add_address(cmd).await)
    }

    #[tracing::instrument(
        skip(self, cmd),
        fields(customer_id = %cmd.customer_id, address_id = %cmd.address_id)
    )]
    pub async fn update_address(
        &self,
        cmd: UpdateAddress,
    ) -> Result<CommandResult, DomainError> {
        observe::<UpdateAddress>(self.handle_update_address(cmd).await)
    }

    #[tracing::instrument(skip(self, cmd), fields(address_id = %cmd.address_id))]
    pub async fn delete_address(
        &self,
        cmd: DeleteAddress,
    ) -> Result<CommandResult, DomainError> {
        observe::<DeleteAddress>(self.handle_delete_address(cmd).await)
    }
}

// Queries
impl<D: Database> CustomerService<D> {
    /// Loads a customer with its addresses.
    #[tracing::instrument(skip(self))]
    pub async fn get_customer(&self, customer_id: AggregateId) -> Result<Customer, DomainError> {
        let mut uow = self.db.begin().await?;
        let customer = load(&mut uow, customer_id).await;
        uow.rollback().await;
        customer
    }

    /// Customers ordered by name. Addresses are not loaded.
    #[tracing::instrument(skip(self))]
    pub async fn list_customers(&self, page: PageRequest) -> Result<Page<Customer>, DomainError> {
        let mut uow = self.db.begin().await?;
        let customers = uow.customers().get_paged(page).await;
        uow.rollback().await;
        Ok(customers?)
    }

    /// Case-insensitive match on name or document. A blank term lists all.
    #[tracing::instrument(skip(self))]
    pub async fn search_customers(
        &self,
        term: &str,
        page: PageRequest,
    ) -> Result<Page<Customer>, DomainError> {
        let mut uow = self.db.begin().await?;
        let customers = if term.trim().is_empty() {
            uow.customers().get_paged(page).await
        } else {
            uow.customers().search(term, page).await
        };
        uow.rollback().await;
        Ok(customers?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_address(&self, address_id: AddressId) -> Result<Address, DomainError> {
        let mut uow = self.db.begin().await?;
        let address = uow.addresses().get_by_id(address_id).await;
        uow.rollback().await;
        address?.ok_or_else(|| DomainError::not_found("Address", address_id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn customer_addresses(
        &self,
        customer_id: AggregateId,
    ) -> Result<Vec<Address>, DomainError> {
        let customer = self.get_customer(customer_id).await?;
        Ok(customer.addresses().to_vec())
    }

    /// Every event recorded for one customer, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn customer_history(
        &self,
        customer_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let mut uow = self.db.begin().await?;
        let events = uow.events().list_by_aggregate(customer_id).await;
        uow.rollback().await;
        Ok(events?)
    }

    /// The whole audit log, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn audit_log(&self, page: PageRequest) -> Result<Page<StoredEvent>, DomainError> {
        let mut uow = self.db.begin().await?;
        let events = uow.events().list_all(page).await;
        uow.rollback().await;
        Ok(events?)
    }
}

// Handlers
impl<D: Database> CustomerService<D> {
    async fn handle_create(&self, cmd: CreateCustomer) -> Result<CommandResult, DomainError> {
        let mut uow = self.db.begin().await?;
        uniqueness::ensure_available(
            uow.customers(),
            &cmd.details.document,
            &cmd.details.email,
            None,
        )
        .await?;

        let customer = Customer::register(cmd.customer_id, cmd.details, cmd.addresses)?;
        let head = uow.events().current_version(customer.id()).await?;

        uow.customers().add(&customer).await?;
        for address in customer.addresses() {
            uow.addresses().add(address).await?;
        }

        let event = CustomerEvent::customer_created(&customer);
        let stored = uow
            .events()
            .append_domain_event(&customer, &event, head)
            .await?;
        commit(&mut uow).await?;

        tracing::info!(customer_id = %customer.id(), "customer created");
        Ok(CommandResult::changed(customer, stored))
    }

    async fn handle_update(&self, cmd: UpdateCustomer) -> Result<CommandResult, DomainError> {
        let mut uow = self.db.begin().await?;
        let mut customer = load(&mut uow, cmd.customer_id).await?;
        let loaded = customer.clone();
        let head = uow.events().current_version(customer.id()).await?;

        uniqueness::ensure_available(
            uow.customers(),
            &cmd.details.document,
            &cmd.details.email,
            Some(customer.id()),
        )
        .await?;

        let outcome = customer.apply_update(cmd.details, cmd.active, &cmd.addresses)?;
        if outcome.is_empty() {
            uow.rollback().await;
            tracing::debug!("update changed nothing");
            return Ok(CommandResult::unchanged(loaded));
        }
        let changes = outcome.addresses;

        uow.customers().update(&customer, loaded.version()).await?;
        persist_address_changes(&mut uow, &loaded, &customer, &changes).await?;

        let event = CustomerEvent::customer_updated(&customer, &changes);
        let stored = uow
            .events()
            .append_domain_event(&customer, &event, head)
            .await?;
        commit(&mut uow).await?;

        tracing::info!(
            added = changes.added.len(),
            updated = changes.updated.len(),
            removed = changes.removed.len(),
            "customer updated"
        );
        Ok(CommandResult::changed(customer, stored))
    }

    async fn handle_delete(&self, cmd: DeleteCustomer) -> Result<CommandResult, DomainError> {
        let mut uow = self.db.begin().await?;
        let mut customer = load(&mut uow, cmd.customer_id).await?;
        let loaded_version = customer.version();
        let head = uow.events().current_version(customer.id()).await?;

        let address_ids: Vec<AddressId> = customer.addresses().iter().map(|a| a.id()).collect();
        for id in &address_ids {
            let address = customer.remove_address(*id)?;
            uow.addresses().remove(*id, address.version()).await?;
        }
        uow.customers().remove(customer.id(), loaded_version).await?;

        let event = CustomerEvent::customer_removed(&customer, address_ids);
        let stored = uow
            .events()
            .append_domain_event(&customer, &event, head)
            .await?;
        commit(&mut uow).await?;

        tracing::info!("customer deleted");
        Ok(CommandResult::changed(customer, stored))
    }

    async fn handle_set_active(
        &self,
        customer_id: AggregateId,
        active: bool,
    ) -> Result<CommandResult, DomainError> {
        let mut uow = self.db.begin().await?;
        let mut customer = load(&mut uow, customer_id).await?;
        let loaded_version = customer.version();
        let head = uow.events().current_version(customer.id()).await?;

        if active {
            customer.activate();
        } else {
            customer.deactivate();
        }
        uow.customers().update(&customer, loaded_version).await?;

        let event = CustomerEvent::status_changed(&customer);
        let stored = uow
            .events()
            .append_domain_event(&customer, &event, head)
            .await?;
        commit(&mut uow).await?;

        Ok(CommandResult::changed(customer, stored))
    }

    async fn handle_add_address(&self, cmd: AddAddress) -> Result<CommandResult, DomainError> {
        let mut uow = self.db.begin().await?;
        let mut customer = load(&mut uow, cmd.customer_id).await?;
        let loaded_version = customer.version();
        let head = uow.events().current_version(customer.id()).await?;

        let address_id = customer.add_address(cmd.details)?;
        let address = customer
            .address(address_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Address", address_id))?;

        uow.customers().update(&customer, loaded_version).await?;
        uow.addresses().add(&address).await?;

        let event = CustomerEvent::address_added(&address);
        let stored = uow
            .events()
            .append_domain_event(&customer, &event, head)
            .await?;
        commit(&mut uow).await?;

        Ok(CommandResult::changed(customer, stored))
    }

    async fn handle_update_address(
        &self,
        cmd: UpdateAddress,
    ) -> Result<CommandResult, DomainError> {
        let mut uow = self.db.begin().await?;
        let mut customer = load(&mut uow, cmd.customer_id).await?;
        let before = customer
            .address(cmd.address_id)
            .map(|a| a.version())
            .ok_or_else(|| DomainError::not_found("Address", cmd.address_id))?;
        let head = uow.events().current_version(customer.id()).await?;

        if !customer.update_address(cmd.address_id, cmd.details)? {
            uow.rollback().await;
            return Ok(CommandResult::unchanged(customer));
        }
        let address = customer
            .address(cmd.address_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Address", cmd.address_id))?;
        uow.addresses().update(&address, before).await?;

        let event = CustomerEvent::address_updated(&address);
        let stored = uow
            .events()
            .append_domain_event(&customer, &event, head)
            .await?;
        commit(&mut uow).await?;

        Ok(CommandResult::changed(customer, stored))
    }

    async fn handle_delete_address(
        &self,
        cmd: DeleteAddress,
    ) -> Result<CommandResult, DomainError> {
        let mut uow = self.db.begin().await?;
        let owner = uow
            .addresses()
            .get_by_id(cmd.address_id)
            .await?
            .map(|a| a.customer_id())
            .ok_or_else(|| DomainError::not_found("Address", cmd.address_id))?;

        let mut customer = load(&mut uow, owner).await?;
        let loaded_version = customer.version();
        let head = uow.events().current_version(customer.id()).await?;

        let removed = customer.remove_address(cmd.address_id)?;
        uow.addresses()
            .remove(removed.id(), removed.version())
            .await?;
        uow.customers().update(&customer, loaded_version).await?;

        let event = CustomerEvent::address_removed(&removed);
        let stored = uow
            .events()
            .append_domain_event(&customer, &event, head)
            .await?;
        commit(&mut uow).await?;

        Ok(CommandResult::changed(customer, stored))
    }
}

async fn load<U: UnitOfWork>(uow: &mut U, id: AggregateId) -> Result<Customer, DomainError> {
    uow.customers()
        .get_with_addresses(id)
        .await?
        .ok_or_else(|| DomainError::not_found("Customer", id))
}

/// Writes address rows in the order the aggregate applied them: removals,
/// updates, additions.
async fn persist_address_changes<U: UnitOfWork>(
    uow: &mut U,
    loaded: &Customer,
    customer: &Customer,
    changes: &AddressChanges,
) -> Result<(), DomainError> {
    for id in &changes.removed {
        if let Some(address) = loaded.address(*id) {
            uow.addresses().remove(*id, address.version()).await?;
        }
    }
    for id in &changes.updated {
        if let (Some(before), Some(after)) = (loaded.address(*id), customer.address(*id)) {
            uow.addresses().update(after, before.version()).await?;
        }
    }
    for id in &changes.added {
        if let Some(address) = customer.address(*id) {
            uow.addresses().add(address).await?;
        }
    }
    Ok(())
}

/// Commits, turning a `false` into the error the backend recorded.
async fn commit<U: UnitOfWork>(uow: &mut U) -> Result<(), DomainError> {
    if uow.commit().await {
        metrics::counter!("unit_of_work_commits_total", "outcome" => "committed").increment(1);
        return Ok(());
    }

    metrics::counter!("unit_of_work_commits_total", "outcome" => "failed").increment(1);
    let failure = uow.take_failure().unwrap_or(StorageError::TransactionClosed);
    tracing::warn!(error = %failure, "commit failed, changes rolled back");
    Err(failure.into())
}

fn observe<C: Command>(
    result: Result<CommandResult, DomainError>,
) -> Result<CommandResult, DomainError> {
    metrics::counter!("customer_commands_total", "command" => C::NAME).increment(1);
    if let Err(e) = &result {
        metrics::counter!(
            "customer_command_failures_total",
            "command" => C::NAME,
            "kind" => e.kind()
        )
        .increment(1);
        tracing::debug!(command = C::NAME, error = %e, "command rejected");
    }
    result
}

//! In-memory storage backend.
//!
//! Each unit of work reads from a private snapshot of the committed tables
//! and stages its writes. Commit takes the write lock, replays every staged
//! write against the current committed state with the same checks Postgres
//! applies (unique document/email, row versions, event version key) and
//! swaps the result in only if all of them pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{AggregateId, Page, PageRequest};
use event_store::{EventLog, EventStoreError, EventTable, NewEvent, StoredEvent, Version};
use tokio::sync::RwLock;

use crate::customer::{Address, AddressId, Customer};
use crate::entity::{HasIdentity, HasVersion};
use crate::error::UniqueField;
use crate::repository::{AddressRepository, CustomerRepository, matches_search};
use crate::unit_of_work::{Database, StorageError, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct Tables {
    /// Customer rows, stored without their addresses.
    customers: Vec<Customer>,
    /// Address rows in insertion order.
    addresses: Vec<Address>,
    events: EventTable,
}

#[derive(Debug, Clone)]
enum Write {
    InsertCustomer(Customer),
    UpdateCustomer { customer: Customer, expected: Version },
    RemoveCustomer { id: AggregateId, expected: Version },
    InsertAddress(Address),
    UpdateAddress { address: Address, expected: Version },
    RemoveAddress { id: AddressId, expected: Version },
    AppendEvent(StoredEvent),
}

/// Finds `id` in `rows` and checks its version, as `WHERE id = $1 AND
/// version = $2` would.
fn locate<E: HasIdentity + HasVersion>(
    rows: &[E],
    entity: &'static str,
    id: E::Id,
    expected: Version,
) -> Result<usize, StorageError> {
    rows.iter()
        .position(|row| row.id() == id && row.version() == expected)
        .ok_or_else(|| StorageError::StaleVersion {
            entity,
            id: id.to_string(),
            expected,
        })
}

impl Tables {
    fn customer(&self, id: AggregateId) -> Option<&Customer> {
        self.customers.iter().find(|c| c.id() == id)
    }

    fn addresses_of(&self, customer_id: AggregateId) -> Vec<Address> {
        self.addresses
            .iter()
            .filter(|a| a.customer_id() == customer_id)
            .cloned()
            .collect()
    }

    fn holder_of(&self, field: UniqueField, value: &str) -> Option<AggregateId> {
        self.customers
            .iter()
            .find(|c| match field {
                UniqueField::Document => c.document() == value,
                UniqueField::Email => c.email() == value,
            })
            .map(|c| c.id())
    }

    fn check_unique(&self, customer: &Customer) -> Result<(), StorageError> {
        for (field, value) in [
            (UniqueField::Document, customer.document()),
            (UniqueField::Email, customer.email()),
        ] {
            if self
                .holder_of(field, value)
                .is_some_and(|holder| holder != customer.id())
            {
                return Err(StorageError::Duplicate {
                    field,
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    fn sorted_customers(&self, term: &str) -> Vec<Customer> {
        let mut customers: Vec<_> = self
            .customers
            .iter()
            .filter(|c| matches_search(c, term))
            .cloned()
            .collect();
        customers.sort_by_cached_key(|c| (c.name().to_lowercase(), c.id()));
        customers
    }

    fn apply(&mut self, write: &Write) -> Result<(), StorageError> {
        match write {
            Write::InsertCustomer(customer) => {
                if self.customer(customer.id()).is_some() {
                    return Err(StorageError::Backend(
                        format!("customer {} already exists", customer.id()).into(),
                    ));
                }
                self.check_unique(customer)?;
                self.customers.push(customer.clone());
            }
            Write::UpdateCustomer { customer, expected } => {
                let index = locate(&self.customers, "Customer", customer.id(), *expected)?;
                self.check_unique(customer)?;
                self.customers[index] = customer.clone();
            }
            Write::RemoveCustomer { id, expected } => {
                let index = locate(&self.customers, "Customer", *id, *expected)?;
                self.customers.remove(index);
                self.addresses.retain(|a| a.customer_id() != *id);
            }
            Write::InsertAddress(address) => {
                if self.customer(address.customer_id()).is_none() {
                    return Err(StorageError::Backend(
                        format!("customer {} does not exist", address.customer_id()).into(),
                    ));
                }
                if self.addresses.iter().any(|a| a.id() == address.id()) {
                    return Err(StorageError::Backend(
                        format!("address {} already exists", address.id()).into(),
                    ));
                }
                self.addresses.push(address.clone());
            }
            Write::UpdateAddress { address, expected } => {
                let index = locate(&self.addresses, "Address", address.id(), *expected)?;
                self.addresses[index] = address.clone();
            }
            Write::RemoveAddress { id, expected } => {
                let index = locate(&self.addresses, "Address", *id, *expected)?;
                self.addresses.remove(index);
            }
            Write::AppendEvent(event) => self.events.insert(event.clone())?,
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    fail_next_commit: AtomicBool,
}

impl Shared {
    async fn commit(&self, writes: &[Write]) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Backend("simulated commit failure".into()));
        }

        let mut next = tables.clone();
        for write in writes {
            next.apply(write)?;
        }
        *tables = next;
        Ok(())
    }
}

/// In-memory [`Database`] for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    shared: Arc<Shared>,
}

impl InMemoryDatabase {
    /// Creates a new empty in-memory database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit fail, whatever it contains.
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Returns the number of committed customers.
    pub async fn customer_count(&self) -> usize {
        self.shared.tables.read().await.customers.len()
    }

    /// Returns the number of committed addresses.
    pub async fn address_count(&self) -> usize {
        self.shared.tables.read().await.addresses.len()
    }

    /// Returns the number of committed events.
    pub async fn event_count(&self) -> usize {
        self.shared.tables.read().await.events.len()
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    type UnitOfWork = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<InMemoryUnitOfWork, StorageError> {
        let snapshot = self.shared.tables.read().await.clone();
        Ok(InMemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            snapshot,
            writes: Vec::new(),
            closed: false,
            failure: None,
        })
    }
}

/// Unit of work over an [`InMemoryDatabase`].
pub struct InMemoryUnitOfWork {
    shared: Arc<Shared>,
    snapshot: Tables,
    writes: Vec<Write>,
    closed: bool,
    failure: Option<StorageError>,
}

impl InMemoryUnitOfWork {
    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed {
            Err(StorageError::TransactionClosed)
        } else {
            Ok(())
        }
    }

    /// Applies `write` to the private snapshot, then queues it for commit.
    fn stage(&mut self, write: Write) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.snapshot.apply(&write)?;
        self.writes.push(write);
        Ok(())
    }
}

#[async_trait]
impl CustomerRepository for InMemoryUnitOfWork {
    async fn get_by_id(&mut self, id: AggregateId) -> Result<Option<Customer>, StorageError> {
        self.ensure_open()?;
        Ok(self.snapshot.customer(id).cloned())
    }

    async fn get_with_addresses(
        &mut self,
        id: AggregateId,
    ) -> Result<Option<Customer>, StorageError> {
        self.ensure_open()?;
        Ok(self
            .snapshot
            .customer(id)
            .cloned()
            .map(|c| c.with_addresses(self.snapshot.addresses_of(id))))
    }

    async fn get_by_document(
        &mut self,
        document: &str,
    ) -> Result<Option<Customer>, StorageError> {
        self.ensure_open()?;
        let holder = self.snapshot.holder_of(UniqueField::Document, document);
        Ok(holder.and_then(|id| self.snapshot.customer(id).cloned()))
    }

    async fn get_by_email(&mut self, email: &str) -> Result<Option<Customer>, StorageError> {
        self.ensure_open()?;
        let holder = self.snapshot.holder_of(UniqueField::Email, email);
        Ok(holder.and_then(|id| self.snapshot.customer(id).cloned()))
    }

    async fn document_exists(
        &mut self,
        document: &str,
        excluding: Option<AggregateId>,
    ) -> Result<bool, StorageError> {
        self.ensure_open()?;
        let holder = self.snapshot.holder_of(UniqueField::Document, document);
        Ok(holder.is_some_and(|id| Some(id) != excluding))
    }

    async fn email_exists(
        &mut self,
        email: &str,
        excluding: Option<AggregateId>,
    ) -> Result<bool, StorageError> {
        self.ensure_open()?;
        let holder = self.snapshot.holder_of(UniqueField::Email, email);
        Ok(holder.is_some_and(|id| Some(id) != excluding))
    }

    async fn get_paged(&mut self, page: PageRequest) -> Result<Page<Customer>, StorageError> {
        self.ensure_open()?;
        Ok(Page::from_sorted(self.snapshot.sorted_customers(""), page))
    }

    async fn search(
        &mut self,
        term: &str,
        page: PageRequest,
    ) -> Result<Page<Customer>, StorageError> {
        self.ensure_open()?;
        Ok(Page::from_sorted(self.snapshot.sorted_customers(term), page))
    }

    async fn add(&mut self, customer: &Customer) -> Result<(), StorageError> {
        let row = customer.clone().with_addresses(Vec::new());
        self.stage(Write::InsertCustomer(row))
    }

    async fn update(
        &mut self,
        customer: &Customer,
        expected_version: Version,
    ) -> Result<(), StorageError> {
        let row = customer.clone().with_addresses(Vec::new());
        self.stage(Write::UpdateCustomer {
            customer: row,
            expected: expected_version,
        })
    }

    async fn remove(
        &mut self,
        id: AggregateId,
        expected_version: Version,
    ) -> Result<(), StorageError> {
        self.stage(Write::RemoveCustomer {
            id,
            expected: expected_version,
        })
    }
}

#[async_trait]
impl AddressRepository for InMemoryUnitOfWork {
    async fn get_by_id(&mut self, id: AddressId) -> Result<Option<Address>, StorageError> {
        self.ensure_open()?;
        Ok(self
            .snapshot
            .addresses
            .iter()
            .find(|a| a.id() == id)
            .cloned())
    }

    async fn get_by_customer_id(
        &mut self,
        customer_id: AggregateId,
    ) -> Result<Vec<Address>, StorageError> {
        self.ensure_open()?;
        Ok(self.snapshot.addresses_of(customer_id))
    }

    async fn add(&mut self, address: &Address) -> Result<(), StorageError> {
        self.stage(Write::InsertAddress(address.clone()))
    }

    async fn update(
        &mut self,
        address: &Address,
        expected_version: Version,
    ) -> Result<(), StorageError> {
        self.stage(Write::UpdateAddress {
            address: address.clone(),
            expected: expected_version,
        })
    }

    async fn remove(
        &mut self,
        id: AddressId,
        expected_version: Version,
    ) -> Result<(), StorageError> {
        self.stage(Write::RemoveAddress {
            id,
            expected: expected_version,
        })
    }
}

#[async_trait]
impl EventLog for InMemoryUnitOfWork {
    async fn append(
        &mut self,
        event: NewEvent,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected: Version,
    ) -> event_store::Result<StoredEvent> {
        if self.closed {
            return Err(EventStoreError::TransactionClosed);
        }
        let stored = event.into_stored(aggregate_id, aggregate_type, expected.next());
        self.snapshot.events.insert(stored.clone())?;
        self.writes.push(Write::AppendEvent(stored.clone()));
        Ok(stored)
    }

    async fn list_by_aggregate(
        &mut self,
        aggregate_id: AggregateId,
    ) -> event_store::Result<Vec<StoredEvent>> {
        Ok(self.snapshot.events.list_by_aggregate(aggregate_id))
    }

    async fn list_all(&mut self, page: PageRequest) -> event_store::Result<Page<StoredEvent>> {
        Ok(self.snapshot.events.list_all(page))
    }

    async fn current_version(&mut self, aggregate_id: AggregateId) -> event_store::Result<Version> {
        Ok(self.snapshot.events.current_version(aggregate_id))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    fn customers(&mut self) -> &mut dyn CustomerRepository {
        self
    }

    fn addresses(&mut self) -> &mut dyn AddressRepository {
        self
    }

    fn events(&mut self) -> &mut dyn EventLog {
        self
    }

    async fn commit(&mut self) -> bool {
        if self.closed {
            self.failure = Some(StorageError::TransactionClosed);
            return false;
        }
        self.closed = true;

        let writes = std::mem::take(&mut self.writes);
        match self.shared.commit(&writes).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, writes = writes.len(), "in-memory commit rejected");
                self.failure = Some(e);
                false
            }
        }
    }

    async fn rollback(&mut self) {
        self.writes.clear();
        self.closed = true;
    }

    fn take_failure(&mut self) -> Option<StorageError> {
        self.failure.take()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::customer::{AddressDetails, CustomerDetails, PersonProfile};

    fn customer(document: &str, email: &str) -> Customer {
        Customer::register(
            AggregateId::new(),
            CustomerDetails {
                name: format!("Cliente {document}"),
                document: document.to_string(),
                phone: "11911112222".to_string(),
                email: email.to_string(),
                profile: PersonProfile::Physical {
                    birth_date: NaiveDate::from_ymd_opt(1985, 7, 1).unwrap(),
                },
            },
            vec![AddressDetails {
                postal_code: "69005-000".to_string(),
                street: "Rua Central".to_string(),
                number: "9".to_string(),
                complement: None,
                district: "Centro".to_string(),
                city: "Manaus".to_string(),
                state: "AM".to_string(),
            }],
        )
        .unwrap()
    }

    async fn insert(db: &InMemoryDatabase, customer: &Customer) {
        let mut uow = db.begin().await.unwrap();
        uow.customers().add(customer).await.unwrap();
        for address in customer.addresses() {
            uow.addresses().add(address).await.unwrap();
        }
        assert!(uow.commit().await);
    }

    #[tokio::test]
    async fn uncommitted_writes_are_private() {
        let db = InMemoryDatabase::new();
        let c = customer("1", "a@x.com");

        let mut writer = db.begin().await.unwrap();
        writer.customers().add(&c).await.unwrap();
        assert!(writer.customers().get_by_id(c.id()).await.unwrap().is_some());

        let mut reader = db.begin().await.unwrap();
        assert!(reader.customers().get_by_id(c.id()).await.unwrap().is_none());

        drop(writer);
        assert_eq!(db.customer_count().await, 0);
    }

    #[tokio::test]
    async fn get_with_addresses_assembles_collection() {
        let db = InMemoryDatabase::new();
        let c = customer("1", "a@x.com");
        insert(&db, &c).await;

        let mut uow = db.begin().await.unwrap();
        let bare = uow.customers().get_by_id(c.id()).await.unwrap().unwrap();
        assert!(bare.addresses().is_empty());

        let full = uow
            .customers()
            .get_with_addresses(c.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(full, c);
    }

    #[tokio::test]
    async fn duplicate_document_rejected_at_stage_time() {
        let db = InMemoryDatabase::new();
        insert(&db, &customer("1", "a@x.com")).await;

        let mut uow = db.begin().await.unwrap();
        let result = uow.customers().add(&customer("1", "b@x.com")).await;

        assert!(matches!(
            result,
            Err(StorageError::Duplicate {
                field: UniqueField::Document,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn concurrent_creates_with_same_email_one_wins() {
        let db = InMemoryDatabase::new();

        let mut first = db.begin().await.unwrap();
        let mut second = db.begin().await.unwrap();
        first
            .customers()
            .add(&customer("1", "same@x.com"))
            .await
            .unwrap();
        second
            .customers()
            .add(&customer("2", "same@x.com"))
            .await
            .unwrap();

        assert!(first.commit().await);
        assert!(!second.commit().await);
        assert!(matches!(
            second.take_failure(),
            Some(StorageError::Duplicate {
                field: UniqueField::Email,
                ..
            })
        ));
        assert_eq!(db.customer_count().await, 1);
    }

    #[tokio::test]
    async fn stale_row_version_fails_commit() {
        let db = InMemoryDatabase::new();
        let mut c = customer("1", "a@x.com");
        insert(&db, &c).await;
        let loaded = c.version();
        c.deactivate();

        let mut first = db.begin().await.unwrap();
        let mut second = db.begin().await.unwrap();
        first.customers().update(&c, loaded).await.unwrap();
        second.customers().update(&c, loaded).await.unwrap();

        assert!(first.commit().await);
        assert!(!second.commit().await);
        assert!(matches!(
            second.take_failure(),
            Some(StorageError::StaleVersion { entity: "Customer", .. })
        ));
    }

    #[tokio::test]
    async fn removing_customer_cascades_to_addresses() {
        let db = InMemoryDatabase::new();
        let c = customer("1", "a@x.com");
        insert(&db, &c).await;
        assert_eq!(db.address_count().await, 1);

        let mut uow = db.begin().await.unwrap();
        uow.customers().remove(c.id(), c.version()).await.unwrap();
        assert!(uow.commit().await);

        assert_eq!(db.customer_count().await, 0);
        assert_eq!(db.address_count().await, 0);
    }

    #[tokio::test]
    async fn event_appends_conflict_at_commit() {
        let db = InMemoryDatabase::new();
        let id = AggregateId::new();
        let event = || NewEvent::from_json("CustomerUpdated", serde_json::json!({}));

        let mut first = db.begin().await.unwrap();
        let mut second = db.begin().await.unwrap();
        first
            .events()
            .append(event(), id, "Customer", Version::initial())
            .await
            .unwrap();
        second
            .events()
            .append(event(), id, "Customer", Version::initial())
            .await
            .unwrap();

        assert!(first.commit().await);
        assert!(!second.commit().await);
        assert!(matches!(
            second.take_failure(),
            Some(StorageError::EventStore(EventStoreError::ConcurrencyConflict { .. }))
        ));
        assert_eq!(db.event_count().await, 1);
    }

    #[tokio::test]
    async fn simulated_failure_discards_everything() {
        let db = InMemoryDatabase::new();
        db.fail_next_commit();

        let mut uow = db.begin().await.unwrap();
        uow.customers()
            .add(&customer("1", "a@x.com"))
            .await
            .unwrap();
        assert!(!uow.commit().await);
        assert!(matches!(uow.take_failure(), Some(StorageError::Backend(_))));
        assert_eq!(db.customer_count().await, 0);

        // Flag is one-shot.
        insert(&db, &customer("2", "b@x.com")).await;
        assert_eq!(db.customer_count().await, 1);
    }

    #[tokio::test]
    async fn closed_unit_rejects_further_use() {
        let db = InMemoryDatabase::new();
        let mut uow = db.begin().await.unwrap();
        uow.rollback().await;

        assert!(matches!(
            uow.customers().get_by_id(AggregateId::new()).await,
            Err(StorageError::TransactionClosed)
        ));
        assert!(!uow.commit().await);
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_ordered_by_name() {
        let db = InMemoryDatabase::new();
        for (doc, name) in [("111", "Carla"), ("222", "ana"), ("333", "Bruno")] {
            let mut c = customer(doc, &format!("{doc}@x.com"));
            let mut details = c.details().clone();
            details.name = name.to_string();
            c.update_details(details).unwrap();
            insert(&db, &c).await;
        }

        let mut uow = db.begin().await.unwrap();
        let page = uow
            .customers()
            .search("AR", PageRequest::default())
            .await
            .unwrap();
        let found: Vec<_> = page.items.iter().map(|c| c.name()).collect();
        assert_eq!(found, vec!["Carla"]);

        let by_doc = uow
            .customers()
            .search("22", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(by_doc.total, 1);

        let all = uow
            .customers()
            .get_paged(PageRequest::new(1, 2))
            .await
            .unwrap();
        assert_eq!(all.total, 3);
        let first_page: Vec<_> = all.items.iter().map(|c| c.name()).collect();
        assert_eq!(first_page, vec!["ana", "Bruno"]);
    }
}

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{AggregateId, Page, PageRequest};
use domain::{
    Address, AddressDetails, AddressId, AddressRepository, Customer, CustomerDetails,
    CustomerRepository, Database, EntityMeta, HasIdentity, HasVersion, PersonProfile, PersonType,
    StorageError, UniqueField, UnitOfWork,
};
use event_store::{
    EventLog, EventStoreError, NewEvent, StoredEvent, Version,
    postgres::{append_in, current_version_in, list_all_in, list_by_aggregate_in},
};
use sqlx::{
    PgConnection, PgPool, Postgres, Row, Transaction,
    postgres::{PgPoolOptions, PgRow},
};

use crate::{PersistenceConfig, PersistenceError};

const SELECT_CUSTOMERS: &str = r#"
    SELECT id, name, document, phone, email, person_type, birth_date, state_registration,
           registration_exempt, founding_date, active, created_at, updated_at, version
    FROM customers
"#;

const SELECT_ADDRESSES: &str = r#"
    SELECT id, customer_id, postal_code, street, number, complement, district, city, state,
           created_at, updated_at, version
    FROM addresses
"#;

fn decode_error(message: impl Into<String>) -> sqlx::Error {
    let message: String = message.into();
    sqlx::Error::Decode(message.into())
}

fn row_to_customer(row: PgRow) -> Result<Customer, sqlx::Error> {
    let person_type: String = row.try_get("person_type")?;
    let profile = match person_type.parse::<PersonType>().map_err(decode_error)? {
        PersonType::Physical => PersonProfile::Physical {
            birth_date: row
                .try_get::<Option<NaiveDate>, _>("birth_date")?
                .ok_or_else(|| decode_error("physical customer without birth date"))?,
        },
        PersonType::Legal => PersonProfile::Legal {
            state_registration: row.try_get("state_registration")?,
            registration_exempt: row.try_get("registration_exempt")?,
            founding_date: row.try_get("founding_date")?,
        },
    };

    let meta = EntityMeta::restore(
        AggregateId::from_uuid(row.try_get("id")?),
        row.try_get("created_at")?,
        row.try_get("updated_at")?,
        Version::new(row.try_get("version")?),
    );
    let details = CustomerDetails {
        name: row.try_get("name")?,
        document: row.try_get("document")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        profile,
    };
    Ok(Customer::restore(meta, details, row.try_get("active")?, Vec::new()))
}

fn row_to_address(row: PgRow) -> Result<Address, sqlx::Error> {
    let meta = EntityMeta::restore(
        AddressId::from_uuid(row.try_get("id")?),
        row.try_get("created_at")?,
        row.try_get("updated_at")?,
        Version::new(row.try_get("version")?),
    );
    let details = AddressDetails {
        postal_code: row.try_get("postal_code")?,
        street: row.try_get("street")?,
        number: row.try_get("number")?,
        complement: row.try_get("complement")?,
        district: row.try_get("district")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
    };
    Ok(Address::restore(
        meta,
        AggregateId::from_uuid(row.try_get("customer_id")?),
        details,
    ))
}

/// Column values of the person profile:
/// `(birth_date, state_registration, registration_exempt, founding_date)`.
fn profile_columns(
    profile: &PersonProfile,
) -> (Option<NaiveDate>, Option<&str>, bool, Option<NaiveDate>) {
    match profile {
        PersonProfile::Physical { birth_date } => (Some(*birth_date), None, false, None),
        PersonProfile::Legal {
            state_registration,
            registration_exempt,
            founding_date,
        } => (
            None,
            state_registration.as_deref(),
            *registration_exempt,
            *founding_date,
        ),
    }
}

/// Maps unique violations on document/email to `Duplicate`.
fn customer_write_error(e: sqlx::Error, customer: &Customer) -> StorageError {
    if let sqlx::Error::Database(ref db_err) = e {
        match db_err.constraint() {
            Some("customers_document_key") => {
                return StorageError::Duplicate {
                    field: UniqueField::Document,
                    value: customer.document().to_string(),
                };
            }
            Some("customers_email_key") => {
                return StorageError::Duplicate {
                    field: UniqueField::Email,
                    value: customer.email().to_string(),
                };
            }
            _ => {}
        }
    }
    StorageError::backend(e)
}

fn stale(entity: &'static str, id: impl ToString, expected: Version) -> StorageError {
    StorageError::StaleVersion {
        entity,
        id: id.to_string(),
        expected,
    }
}

/// `LIKE` pattern matching `term` anywhere, with wildcards in the term
/// taken literally.
fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.trim().to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// PostgreSQL-backed [`Database`].
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool sized from the configuration.
    pub async fn connect(config: &PersistenceConfig) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Database for PgDatabase {
    type UnitOfWork = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, StorageError> {
        let tx = self.pool.begin().await.map_err(StorageError::backend)?;
        Ok(PgUnitOfWork {
            tx: Some(tx),
            failure: None,
        })
    }
}

/// One PostgreSQL transaction. Dropping it uncommitted rolls back.
pub struct PgUnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
    failure: Option<StorageError>,
}

impl PgUnitOfWork {
    fn conn(&mut self) -> Result<&mut PgConnection, StorageError> {
        self.tx.as_deref_mut().ok_or(StorageError::TransactionClosed)
    }

    async fn fetch_customers(
        &mut self,
        filter: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Customer>, StorageError> {
        let conn = self.conn()?;
        let (condition, pattern) = match filter {
            Some(term) => (
                "WHERE LOWER(name) LIKE $1 OR LOWER(document) LIKE $1",
                Some(contains_pattern(term)),
            ),
            None => ("WHERE $1::text IS NULL", None),
        };

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM customers {condition}"
        ))
        .bind(pattern.as_deref())
        .fetch_one(&mut *conn)
        .await
        .map_err(StorageError::backend)?;

        let rows = sqlx::query(&format!(
            "{SELECT_CUSTOMERS} {condition} ORDER BY LOWER(name), id LIMIT $2 OFFSET $3"
        ))
        .bind(pattern.as_deref())
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&mut *conn)
        .await
        .map_err(StorageError::backend)?;

        let items = rows
            .into_iter()
            .map(row_to_customer)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::backend)?;
        Ok(Page::new(items, total as u64, page))
    }

    async fn fetch_one_customer(
        &mut self,
        column: &str,
        value: &str,
    ) -> Result<Option<Customer>, StorageError> {
        let conn = self.conn()?;
        let row = sqlx::query(&format!("{SELECT_CUSTOMERS} WHERE {column} = $1"))
            .bind(value)
            .fetch_optional(&mut *conn)
            .await
            .map_err(StorageError::backend)?;
        row.map(row_to_customer)
            .transpose()
            .map_err(StorageError::backend)
    }

    async fn taken(
        &mut self,
        column: &str,
        value: &str,
        excluding: Option<AggregateId>,
    ) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM customers WHERE {column} = $1 AND ($2::uuid IS NULL OR id <> $2))"
        ))
        .bind(value)
        .bind(excluding.map(|id| id.as_uuid()))
        .fetch_one(&mut *conn)
        .await
        .map_err(StorageError::backend)
    }
}

#[async_trait]
impl CustomerRepository for PgUnitOfWork {
    async fn get_by_id(&mut self, id: AggregateId) -> Result<Option<Customer>, StorageError> {
        let conn = self.conn()?;
        let row = sqlx::query(&format!("{SELECT_CUSTOMERS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(StorageError::backend)?;
        row.map(row_to_customer)
            .transpose()
            .map_err(StorageError::backend)
    }

    async fn get_with_addresses(
        &mut self,
        id: AggregateId,
    ) -> Result<Option<Customer>, StorageError> {
        let Some(customer) = CustomerRepository::get_by_id(self, id).await? else {
            return Ok(None);
        };
        let addresses = self.get_by_customer_id(id).await?;
        Ok(Some(customer.with_addresses(addresses)))
    }

    async fn get_by_document(
        &mut self,
        document: &str,
    ) -> Result<Option<Customer>, StorageError> {
        self.fetch_one_customer("document", document).await
    }

    async fn get_by_email(&mut self, email: &str) -> Result<Option<Customer>, StorageError> {
        self.fetch_one_customer("email", email).await
    }

    async fn document_exists(
        &mut self,
        document: &str,
        excluding: Option<AggregateId>,
    ) -> Result<bool, StorageError> {
        self.taken("document", document, excluding).await
    }

    async fn email_exists(
        &mut self,
        email: &str,
        excluding: Option<AggregateId>,
    ) -> Result<bool, StorageError> {
        self.taken("email", email, excluding).await
    }

    async fn get_paged(&mut self, page: PageRequest) -> Result<Page<Customer>, StorageError> {
        self.fetch_customers(None, page).await
    }

    async fn search(
        &mut self,
        term: &str,
        page: PageRequest,
    ) -> Result<Page<Customer>, StorageError> {
        let filter = Some(term).filter(|t| !t.trim().is_empty());
        self.fetch_customers(filter, page).await
    }

    #[tracing::instrument(skip(self, customer), fields(customer_id = %customer.id()))]
    async fn add(&mut self, customer: &Customer) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let (birth_date, state_registration, registration_exempt, founding_date) =
            profile_columns(&customer.details().profile);

        sqlx::query(
            r#"
            INSERT INTO customers (id, name, document, phone, email, person_type, birth_date,
                                   state_registration, registration_exempt, founding_date,
                                   active, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(customer.id().as_uuid())
        .bind(customer.name())
        .bind(customer.document())
        .bind(&customer.details().phone)
        .bind(customer.email())
        .bind(customer.person_type().as_str())
        .bind(birth_date)
        .bind(state_registration)
        .bind(registration_exempt)
        .bind(founding_date)
        .bind(customer.is_active())
        .bind(customer.meta().created_at())
        .bind(customer.meta().updated_at())
        .bind(customer.version().as_i64())
        .execute(&mut *conn)
        .await
        .map_err(|e| customer_write_error(e, customer))?;

        Ok(())
    }

    #[tracing::instrument(skip(self, customer), fields(customer_id = %customer.id()))]
    async fn update(
        &mut self,
        customer: &Customer,
        expected_version: Version,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let (birth_date, state_registration, registration_exempt, founding_date) =
            profile_columns(&customer.details().profile);

        let result = sqlx::query(
            r#"
            UPDATE customers
            SET name = $3, document = $4, phone = $5, email = $6, birth_date = $7,
                state_registration = $8, registration_exempt = $9, founding_date = $10,
                active = $11, updated_at = $12, version = $13
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(customer.id().as_uuid())
        .bind(expected_version.as_i64())
        .bind(customer.name())
        .bind(customer.document())
        .bind(&customer.details().phone)
        .bind(customer.email())
        .bind(birth_date)
        .bind(state_registration)
        .bind(registration_exempt)
        .bind(founding_date)
        .bind(customer.is_active())
        .bind(customer.updated_at())
        .bind(customer.version().as_i64())
        .execute(&mut *conn)
        .await
        .map_err(|e| customer_write_error(e, customer))?;

        if result.rows_affected() == 0 {
            return Err(stale("Customer", customer.id(), expected_version));
        }
        Ok(())
    }

    async fn remove(
        &mut self,
        id: AggregateId,
        expected_version: Version,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let result = sqlx::query("DELETE FROM customers WHERE id = $1 AND version = $2")
            .bind(id.as_uuid())
            .bind(expected_version.as_i64())
            .execute(&mut *conn)
            .await
            .map_err(StorageError::backend)?;

        if result.rows_affected() == 0 {
            return Err(stale("Customer", id, expected_version));
        }
        Ok(())
    }
}

#[async_trait]
impl AddressRepository for PgUnitOfWork {
    async fn get_by_id(&mut self, id: AddressId) -> Result<Option<Address>, StorageError> {
        let conn = self.conn()?;
        let row = sqlx::query(&format!("{SELECT_ADDRESSES} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(StorageError::backend)?;
        row.map(row_to_address)
            .transpose()
            .map_err(StorageError::backend)
    }

    async fn get_by_customer_id(
        &mut self,
        customer_id: AggregateId,
    ) -> Result<Vec<Address>, StorageError> {
        let conn = self.conn()?;
        let rows = sqlx::query(&format!(
            "{SELECT_ADDRESSES} WHERE customer_id = $1 ORDER BY seq"
        ))
        .bind(customer_id.as_uuid())
        .fetch_all(&mut *conn)
        .await
        .map_err(StorageError::backend)?;

        rows.into_iter()
            .map(row_to_address)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::backend)
    }

    async fn add(&mut self, address: &Address) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let details = address.details();

        sqlx::query(
            r#"
            INSERT INTO addresses (id, customer_id, postal_code, street, number, complement,
                                   district, city, state, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(address.id().as_uuid())
        .bind(address.customer_id().as_uuid())
        .bind(&details.postal_code)
        .bind(&details.street)
        .bind(&details.number)
        .bind(details.complement.as_deref())
        .bind(&details.district)
        .bind(&details.city)
        .bind(&details.state)
        .bind(address.meta().created_at())
        .bind(address.updated_at())
        .bind(address.version().as_i64())
        .execute(&mut *conn)
        .await
        .map_err(StorageError::backend)?;

        Ok(())
    }

    async fn update(
        &mut self,
        address: &Address,
        expected_version: Version,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let details = address.details();

        let result = sqlx::query(
            r#"
            UPDATE addresses
            SET postal_code = $3, street = $4, number = $5, complement = $6, district = $7,
                city = $8, state = $9, updated_at = $10, version = $11
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(address.id().as_uuid())
        .bind(expected_version.as_i64())
        .bind(&details.postal_code)
        .bind(&details.street)
        .bind(&details.number)
        .bind(details.complement.as_deref())
        .bind(&details.district)
        .bind(&details.city)
        .bind(&details.state)
        .bind(address.updated_at())
        .bind(address.version().as_i64())
        .execute(&mut *conn)
        .await
        .map_err(StorageError::backend)?;

        if result.rows_affected() == 0 {
            return Err(stale("Address", address.id(), expected_version));
        }
        Ok(())
    }

    async fn remove(
        &mut self,
        id: AddressId,
        expected_version: Version,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let result = sqlx::query("DELETE FROM addresses WHERE id = $1 AND version = $2")
            .bind(id.as_uuid())
            .bind(expected_version.as_i64())
            .execute(&mut *conn)
            .await
            .map_err(StorageError::backend)?;

        if result.rows_affected() == 0 {
            return Err(stale("Address", id, expected_version));
        }
        Ok(())
    }
}

#[async_trait]
impl EventLog for PgUnitOfWork {
    async fn append(
        &mut self,
        event: NewEvent,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected: Version,
    ) -> event_store::Result<StoredEvent> {
        let conn = self
            .tx
            .as_deref_mut()
            .ok_or(EventStoreError::TransactionClosed)?;
        append_in(conn, event, aggregate_id, aggregate_type, expected).await
    }

    async fn list_by_aggregate(
        &mut self,
        aggregate_id: AggregateId,
    ) -> event_store::Result<Vec<StoredEvent>> {
        let conn = self
            .tx
            .as_deref_mut()
            .ok_or(EventStoreError::TransactionClosed)?;
        list_by_aggregate_in(conn, aggregate_id).await
    }

    async fn list_all(&mut self, page: PageRequest) -> event_store::Result<Page<StoredEvent>> {
        let conn = self
            .tx
            .as_deref_mut()
            .ok_or(EventStoreError::TransactionClosed)?;
        list_all_in(conn, page).await
    }

    async fn current_version(&mut self, aggregate_id: AggregateId) -> event_store::Result<Version> {
        let conn = self
            .tx
            .as_deref_mut()
            .ok_or(EventStoreError::TransactionClosed)?;
        current_version_in(conn, aggregate_id).await
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
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
        let Some(tx) = self.tx.take() else {
            self.failure = Some(StorageError::TransactionClosed);
            return false;
        };

        match tx.commit().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "transaction commit rejected");
                self.failure = Some(StorageError::backend(e));
                false
            }
        }
    }

    async fn rollback(&mut self) {
        if let Some(tx) = self.tx.take()
            && let Err(e) = tx.rollback().await
        {
            tracing::warn!(error = %e, "transaction rollback failed");
        }
    }

    fn take_failure(&mut self) -> Option<StorageError> {
        self.failure.take()
    }
}

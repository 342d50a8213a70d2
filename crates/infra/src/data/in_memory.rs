//! In-memory invoice and customer tables for tests/dev.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use recurra_billing::{
    Customer, CustomerDataAccess, CustomerStatus, DataAccessError, Invoice, InvoiceDataAccess,
    InvoiceStatus,
};
use recurra_core::{Currency, CustomerId, Entity, InvoiceId, Money};

#[derive(Debug, Default)]
struct Tables {
    invoices: BTreeMap<InvoiceId, Invoice>,
    customers: BTreeMap<CustomerId, Customer>,
    last_invoice_id: i64,
    last_customer_id: i64,
}

impl Tables {
    fn next_invoice_id(&mut self) -> InvoiceId {
        self.last_invoice_id += 1;
        InvoiceId::new(self.last_invoice_id)
    }

    fn next_customer_id(&mut self) -> CustomerId {
        self.last_customer_id += 1;
        CustomerId::new(self.last_customer_id)
    }
}

/// Both billing tables behind one lock, with store-assigned ids.
///
/// Implements [`InvoiceDataAccess`] and [`CustomerDataAccess`]; call trait
/// methods with a path (`InvoiceDataAccess::fetch(&store, id)`) since the names
/// overlap.
#[derive(Debug, Default)]
pub struct InMemoryBillingStore {
    tables: RwLock<Tables>,
    offline: AtomicBool,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every trait call fails with `DataAccessError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn create_customer(
        &self,
        currency: Currency,
        status: CustomerStatus,
    ) -> Result<Customer, DataAccessError> {
        let mut tables = self.write()?;
        let customer = Customer::new(tables.next_customer_id(), currency, status);
        tables.customers.insert(customer.id(), customer.clone());
        Ok(customer)
    }

    /// Inserts an invoice with any status; the customer is not checked, so
    /// orphaned invoices can be seeded.
    pub fn create_invoice(
        &self,
        amount: Money,
        customer_id: CustomerId,
        status: InvoiceStatus,
    ) -> Result<Invoice, DataAccessError> {
        let mut tables = self.write()?;
        let invoice = Invoice::new(tables.next_invoice_id(), customer_id, amount, status);
        tables.invoices.insert(invoice.id(), invoice.clone());
        Ok(invoice)
    }

    pub fn invoice(&self, id: InvoiceId) -> Option<Invoice> {
        self.tables.read().ok()?.invoices.get(&id).cloned()
    }

    pub fn customer(&self, id: CustomerId) -> Option<Customer> {
        self.tables.read().ok()?.customers.get(&id).cloned()
    }

    pub fn invoices_of(&self, customer_id: CustomerId) -> Vec<Invoice> {
        match self.tables.read() {
            Ok(tables) => tables
                .invoices
                .values()
                .filter(|i| i.customer_id == customer_id)
                .cloned()
                .collect(),
            Err(_) => vec![],
        }
    }

    fn check_online(&self) -> Result<(), DataAccessError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DataAccessError::Unavailable("billing store offline".into()));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, DataAccessError> {
        self.check_online()?;
        self.tables
            .read()
            .map_err(|_| DataAccessError::Storage("billing tables lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, DataAccessError> {
        self.check_online()?;
        self.tables
            .write()
            .map_err(|_| DataAccessError::Storage("billing tables lock poisoned".into()))
    }
}

#[async_trait]
impl InvoiceDataAccess for InMemoryBillingStore {
    async fn fetch(&self, id: InvoiceId) -> Result<Invoice, DataAccessError> {
        let tables = self.read()?;
        tables
            .invoices
            .get(&id)
            .cloned()
            .ok_or(DataAccessError::InvoiceNotFound(id))
    }

    async fn fetch_all(&self) -> Result<Vec<Invoice>, DataAccessError> {
        Ok(self.read()?.invoices.values().cloned().collect())
    }

    async fn update(&self, invoice: Invoice) -> Result<Invoice, DataAccessError> {
        let mut tables = self.write()?;
        let slot = tables
            .invoices
            .get_mut(&invoice.id)
            .ok_or(DataAccessError::InvoiceNotFound(invoice.id))?;
        *slot = invoice.clone();
        Ok(invoice)
    }

    async fn create(&self, amount: Money, customer: &Customer) -> Result<Invoice, DataAccessError> {
        let mut tables = self.write()?;
        if !tables.customers.contains_key(&customer.id) {
            return Err(DataAccessError::CustomerNotFound(customer.id));
        }
        let invoice = Invoice::new(
            tables.next_invoice_id(),
            customer.id,
            amount,
            InvoiceStatus::Pending,
        );
        tables.invoices.insert(invoice.id(), invoice.clone());
        Ok(invoice)
    }
}

#[async_trait]
impl CustomerDataAccess for InMemoryBillingStore {
    async fn fetch(&self, id: CustomerId) -> Result<Customer, DataAccessError> {
        let tables = self.read()?;
        tables
            .customers
            .get(&id)
            .cloned()
            .ok_or(DataAccessError::CustomerNotFound(id))
    }

    async fn fetch_all(&self) -> Result<Vec<Customer>, DataAccessError> {
        Ok(self.read()?.customers.values().cloned().collect())
    }

    async fn deactivate(&self, id: CustomerId) -> Result<Customer, DataAccessError> {
        let mut tables = self.write()?;
        let customer = tables
            .customers
            .get_mut(&id)
            .ok_or(DataAccessError::CustomerNotFound(id))?;
        customer.status = CustomerStatus::Inactive;
        Ok(customer.clone())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn eur(cents: i64) -> Money {
        Money::new(Decimal::new(cents, 2), Currency::Eur)
    }

    #[tokio::test]
    async fn assigns_increasing_ids() {
        let store = InMemoryBillingStore::new();
        let customer = store
            .create_customer(Currency::Eur, CustomerStatus::Active)
            .unwrap();

        let first = store
            .create_invoice(eur(1000), customer.id, InvoiceStatus::Pending)
            .unwrap();
        let second = InvoiceDataAccess::create(&store, eur(2000), &customer)
            .await
            .unwrap();

        assert_eq!(customer.id, CustomerId::new(1));
        assert_eq!(first.id, InvoiceId::new(1));
        assert_eq!(second.id, InvoiceId::new(2));
        assert_eq!(second.status, InvoiceStatus::Pending);
    }

    #[tokio::test]
    async fn update_replaces_the_whole_record() {
        let store = InMemoryBillingStore::new();
        let invoice = store
            .create_invoice(eur(1000), CustomerId::new(1), InvoiceStatus::Pending)
            .unwrap();

        InvoiceDataAccess::update(&store, invoice.with_status(InvoiceStatus::Paid))
            .await
            .unwrap();

        let stored = InvoiceDataAccess::fetch(&store, invoice.id).await.unwrap();
        assert_eq!(stored, invoice.with_status(InvoiceStatus::Paid));
    }

    #[tokio::test]
    async fn created_invoice_fetches_back_unchanged() {
        let store = InMemoryBillingStore::new();
        let customer = store
            .create_customer(Currency::Eur, CustomerStatus::Active)
            .unwrap();

        let created = InvoiceDataAccess::create(&store, eur(4250), &customer)
            .await
            .unwrap();
        let fetched = InvoiceDataAccess::fetch(&store, created.id).await.unwrap();

        assert_eq!(fetched, created);
        assert_eq!(
            fetched,
            Invoice::new(created.id, customer.id, eur(4250), InvoiceStatus::Pending)
        );
    }

    #[tokio::test]
    async fn created_customer_fetches_back_unchanged() {
        let store = InMemoryBillingStore::new();
        let created = store
            .create_customer(Currency::Sek, CustomerStatus::Active)
            .unwrap();

        let fetched = CustomerDataAccess::fetch(&store, created.id).await.unwrap();

        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = InMemoryBillingStore::new();
        let ghost = Invoice::new(
            InvoiceId::new(7),
            CustomerId::new(7),
            eur(100),
            InvoiceStatus::Pending,
        );

        assert_eq!(
            InvoiceDataAccess::fetch(&store, InvoiceId::new(7)).await,
            Err(DataAccessError::InvoiceNotFound(InvoiceId::new(7)))
        );
        assert_eq!(
            InvoiceDataAccess::update(&store, ghost).await,
            Err(DataAccessError::InvoiceNotFound(InvoiceId::new(7)))
        );
        assert_eq!(
            CustomerDataAccess::deactivate(&store, CustomerId::new(7)).await,
            Err(DataAccessError::CustomerNotFound(CustomerId::new(7)))
        );
    }

    #[tokio::test]
    async fn create_requires_a_known_customer() {
        let store = InMemoryBillingStore::new();
        let stranger = Customer::new(CustomerId::new(9), Currency::Eur, CustomerStatus::Active);

        let err = InvoiceDataAccess::create(&store, eur(100), &stranger)
            .await
            .unwrap_err();

        assert_eq!(err, DataAccessError::CustomerNotFound(CustomerId::new(9)));
    }

    #[tokio::test]
    async fn deactivate_flips_status() {
        let store = InMemoryBillingStore::new();
        let customer = store
            .create_customer(Currency::Dkk, CustomerStatus::Active)
            .unwrap();

        let updated = CustomerDataAccess::deactivate(&store, customer.id)
            .await
            .unwrap();

        assert_eq!(updated.status, CustomerStatus::Inactive);
        assert!(!store.customer(customer.id).unwrap().is_active());
    }

    #[tokio::test]
    async fn offline_store_is_unavailable() {
        let store = InMemoryBillingStore::new();
        store.set_offline(true);

        let err = InvoiceDataAccess::fetch_all(&store).await.unwrap_err();
        assert!(matches!(err, DataAccessError::Unavailable(_)));

        store.set_offline(false);
        assert!(InvoiceDataAccess::fetch_all(&store).await.unwrap().is_empty());
    }
}

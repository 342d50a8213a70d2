//! Payment provider backed by per-customer account balances.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use recurra_billing::{ChargeError, CustomerDataAccess, DataAccessError, Invoice, PaymentProvider};
use recurra_core::CustomerId;

/// Charges invoices against customer balances.
///
/// Customers without a recorded balance are always approved. The provider
/// validates the customer and currency the way a real provider does, so every
/// recovery path of the billing job can be driven from it.
pub struct LedgerPaymentProvider {
    customers: Arc<dyn CustomerDataAccess>,
    balances: RwLock<HashMap<CustomerId, Decimal>>,
    /// Remaining charges that fail with a network error.
    outage: AtomicU32,
}

impl LedgerPaymentProvider {
    pub fn new(customers: Arc<dyn CustomerDataAccess>) -> Self {
        Self {
            customers,
            balances: RwLock::new(HashMap::new()),
            outage: AtomicU32::new(0),
        }
    }

    pub fn set_balance(&self, customer_id: CustomerId, balance: Decimal) {
        if let Ok(mut balances) = self.balances.write() {
            balances.insert(customer_id, balance);
        }
    }

    pub fn balance(&self, customer_id: CustomerId) -> Option<Decimal> {
        self.balances.read().ok()?.get(&customer_id).copied()
    }

    /// Makes the next `charges` calls fail with `ChargeError::Network`.
    pub fn fail_next(&self, charges: u32) {
        self.outage.store(charges, Ordering::SeqCst);
    }

    fn take_outage(&self) -> bool {
        self.outage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn debit(&self, customer_id: CustomerId, amount: Decimal) -> Result<bool, ChargeError> {
        let mut balances = self
            .balances
            .write()
            .map_err(|_| ChargeError::Network("ledger unavailable".into()))?;
        match balances.get_mut(&customer_id) {
            None => Ok(true),
            Some(balance) if *balance >= amount => {
                *balance -= amount;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }
}

#[async_trait]
impl PaymentProvider for LedgerPaymentProvider {
    async fn charge(&self, invoice: &Invoice) -> Result<bool, ChargeError> {
        if self.take_outage() {
            return Err(ChargeError::Network("payment provider unreachable".into()));
        }

        let customer = self
            .customers
            .fetch(invoice.customer_id)
            .await
            .map_err(|err| match err {
                DataAccessError::CustomerNotFound(id) => ChargeError::CustomerNotFound(id),
                other => ChargeError::Network(other.to_string()),
            })?;

        if invoice.amount.currency() != customer.currency {
            return Err(ChargeError::CurrencyMismatch {
                invoice_id: invoice.id,
                customer_id: customer.id,
            });
        }

        let approved = self.debit(customer.id, invoice.amount.value())?;
        debug!(invoice_id = %invoice.id, customer_id = %customer.id, approved, "charge processed");
        Ok(approved)
    }
}

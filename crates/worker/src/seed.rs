//! Demo data for a local run.

use anyhow::Result;
use rust_decimal::Decimal;

use recurra_billing::{CustomerStatus, InvoiceStatus};
use recurra_core::{Currency, Money};
use recurra_infra::InMemoryBillingStore;

const CUSTOMERS: usize = 20;
const INVOICES_PER_CUSTOMER: i64 = 5;

/// Creates customers across all currencies, each with one paid invoice and
/// the rest pending.
pub fn seed(store: &InMemoryBillingStore) -> Result<usize> {
    let mut created = 0;
    for n in 0..CUSTOMERS {
        let currency = Currency::ALL[n % Currency::ALL.len()];
        let customer = store.create_customer(currency, CustomerStatus::Active)?;

        for k in 0..INVOICES_PER_CUSTOMER {
            let cents = 1_000 + customer.id.get() * 731 + k * 1_297;
            let status = if k == 0 {
                InvoiceStatus::Paid
            } else {
                InvoiceStatus::Pending
            };
            let amount = Money::new(Decimal::new(cents, 2), currency);
            store.create_invoice(amount, customer.id, status)?;
            created += 1;
        }
    }
    Ok(created)
}

//! Contracts of the collaborators a billing job drives.
//!
//! Every call is a bounded remote call: implementations may block on IO, and the
//! billing job wraps each one in a timeout.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use recurra_core::{Currency, CustomerId, InvoiceId, Money};

use crate::customer::Customer;
use crate::invoice::Invoice;

/// Data access failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataAccessError {
    #[error("invoice not found: {0}")]
    InvoiceNotFound(InvoiceId),
    #[error("customer not found: {0}")]
    CustomerNotFound(CustomerId),
    /// The store could not be reached; callers may retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Failure raised by a payment provider instead of a boolean charge result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChargeError {
    #[error("customer not found: {0}")]
    CustomerNotFound(CustomerId),
    #[error("currency of invoice {invoice_id} does not match customer {customer_id}")]
    CurrencyMismatch {
        invoice_id: InvoiceId,
        customer_id: CustomerId,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("invoice not found: {0}")]
    InvoiceNotFound(InvoiceId),
}

/// Currency conversion failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("no exchange rate from {from} to {to}")]
    RateUnavailable { from: Currency, to: Currency },
    #[error("converting {amount} {from} to {to} overflows")]
    Overflow {
        from: Currency,
        to: Currency,
        amount: Decimal,
    },
    #[error("network error: {0}")]
    Network(String),
}

#[async_trait]
pub trait InvoiceDataAccess: Send + Sync {
    async fn fetch(&self, id: InvoiceId) -> Result<Invoice, DataAccessError>;

    async fn fetch_all(&self) -> Result<Vec<Invoice>, DataAccessError>;

    /// Full-record replace; fails with `InvoiceNotFound` for unknown ids.
    async fn update(&self, invoice: Invoice) -> Result<Invoice, DataAccessError>;

    /// Creates a `Pending` invoice with a fresh id.
    async fn create(&self, amount: Money, customer: &Customer) -> Result<Invoice, DataAccessError>;
}

#[async_trait]
pub trait CustomerDataAccess: Send + Sync {
    async fn fetch(&self, id: CustomerId) -> Result<Customer, DataAccessError>;

    async fn fetch_all(&self) -> Result<Vec<Customer>, DataAccessError>;

    async fn deactivate(&self, id: CustomerId) -> Result<Customer, DataAccessError>;
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Charges the invoice amount. `Ok(false)` means insufficient funds.
    async fn charge(&self, invoice: &Invoice) -> Result<bool, ChargeError>;
}

#[async_trait]
pub trait CurrencyConversion: Send + Sync {
    async fn convert(
        &self,
        from: Currency,
        to: Currency,
        amount: Decimal,
    ) -> Result<Decimal, ConversionError>;
}

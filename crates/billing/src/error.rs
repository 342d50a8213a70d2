//! Billing error taxonomy.
//!
//! Every collaborator failure converts into one `BillingError` variant, and the
//! billing job picks its recovery action by matching on that variant.

use thiserror::Error;

use recurra_core::{CustomerId, InvoiceId};

use crate::ports::{ChargeError, ConversionError, DataAccessError};
use crate::schedule::{JobKey, SchedulingError};

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    /// Permanent: the job is purged.
    #[error("invoice {0} not found")]
    InvoiceNotFound(InvoiceId),

    /// Permanent: the job is purged and the customer deactivated.
    #[error("customer {0} not found")]
    CustomerNotFound(CustomerId),

    /// Recoverable by converting the amount into a replacement invoice.
    #[error("currency mismatch between invoice {invoice_id} and customer {customer_id}")]
    CurrencyMismatch {
        invoice_id: InvoiceId,
        customer_id: CustomerId,
    },

    /// Transient, including timeouts of remote calls; retried within the budget.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed cron expression, returned to the enrolling caller.
    #[error("invalid schedule `{expression}`: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// Terminal: the job has been unscheduled.
    #[error("retries exhausted for invoice {invoice_id} (job {job})")]
    RetriesExhausted { invoice_id: InvoiceId, job: JobKey },

    /// Terminal: the job is gone but the customer could not be deactivated.
    #[error("customer {customer_id} left active after its job was purged: {reason}")]
    DeactivationFailed {
        customer_id: CustomerId,
        reason: String,
    },

    /// Terminal: a collectable invoice exists that no job is bound to.
    #[error("invoice {invoice_id} is pending without a billing job: {reason}")]
    Unbound { invoice_id: InvoiceId, reason: String },

    #[error("currency conversion failed: {0}")]
    Conversion(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("scheduling error: {0}")]
    Scheduling(SchedulingError),
}

impl BillingError {
    /// Whether a later attempt may succeed without any corrective action.
    pub fn is_transient(&self) -> bool {
        matches!(self, BillingError::Network(_))
    }

    pub fn timeout(what: &str, after: std::time::Duration) -> Self {
        BillingError::Network(format!("{what} timed out after {after:?}"))
    }
}

impl From<DataAccessError> for BillingError {
    fn from(value: DataAccessError) -> Self {
        match value {
            DataAccessError::InvoiceNotFound(id) => BillingError::InvoiceNotFound(id),
            DataAccessError::CustomerNotFound(id) => BillingError::CustomerNotFound(id),
            DataAccessError::Unavailable(msg) => BillingError::Network(msg),
            DataAccessError::Storage(msg) => BillingError::Storage(msg),
        }
    }
}

impl From<ChargeError> for BillingError {
    fn from(value: ChargeError) -> Self {
        match value {
            ChargeError::CustomerNotFound(id) => BillingError::CustomerNotFound(id),
            ChargeError::CurrencyMismatch {
                invoice_id,
                customer_id,
            } => BillingError::CurrencyMismatch {
                invoice_id,
                customer_id,
            },
            ChargeError::Network(msg) => BillingError::Network(msg),
            ChargeError::InvoiceNotFound(id) => BillingError::InvoiceNotFound(id),
        }
    }
}

impl From<ConversionError> for BillingError {
    fn from(value: ConversionError) -> Self {
        match value {
            ConversionError::Network(msg) => BillingError::Network(msg),
            other => BillingError::Conversion(other.to_string()),
        }
    }
}

impl From<SchedulingError> for BillingError {
    fn from(value: SchedulingError) -> Self {
        match value {
            SchedulingError::InvalidSchedule { expression, reason } => {
                BillingError::InvalidSchedule { expression, reason }
            }
            other => BillingError::Scheduling(other),
        }
    }
}

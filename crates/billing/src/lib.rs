//! Recurring invoice collection.
//!
//! This crate holds the billing domain (invoices, customers), the contracts of
//! the collaborators it drives (data access, payment provider, currency
//! conversion, scheduling engine), and the two core components built on them:
//!
//! - [`BillingJob`]: the per-firing state machine that charges one invoice and
//!   picks a recovery action when the charge fails.
//! - [`BillingScheduler`]: enrolls invoices into recurring billing and binds the
//!   shared [`ExecutionContext`] to the engine.

pub mod context;
pub mod customer;
pub mod error;
pub mod invoice;
pub mod job;
pub mod ports;
pub mod schedule;
pub mod scheduler;

#[cfg(test)]
mod test_support;

pub use context::{ExecutionContext, RetryPolicy};
pub use customer::{Customer, CustomerStatus};
pub use error::{BillingError, BillingResult};
pub use invoice::{Invoice, InvoiceStatus};
pub use job::BillingJob;
pub use ports::{
    ChargeError, ConversionError, CurrencyConversion, CustomerDataAccess, DataAccessError,
    InvoiceDataAccess, PaymentProvider,
};
pub use schedule::{
    CronSchedule, DEFAULT_BILLING_CRON, Firing, FiringHandler, FiringOutcome, JobData, JobKey,
    SchedulingEngine, SchedulingError, TriggerKey,
};
pub use scheduler::BillingScheduler;

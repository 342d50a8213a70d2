//! Adapters for the external services a billing firing calls.

pub mod conversion;
pub mod payment;

pub use conversion::RateTableConversion;
pub use payment::LedgerPaymentProvider;

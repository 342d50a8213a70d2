//! Infrastructure for recurring billing: configuration, in-memory data
//! access, payment/conversion adapters, and the local scheduling engine.

pub mod config;
pub mod data;
pub mod external;
pub mod scheduling;


pub use config::{BillingConfig, ConfigError};
pub use data::InMemoryBillingStore;
pub use external::{LedgerPaymentProvider, RateTableConversion};
pub use scheduling::{
    DeadLetterEntry, EngineConfig, EngineStats, InMemoryTriggerStore, LocalSchedulingEngine,
    TriggerStore, TriggerStoreError,
};

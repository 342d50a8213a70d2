//! In-process scheduling engine for billing jobs.
//!
//! - `TriggerStore`: jobs, their data, recurring and one-shot triggers, and
//!   dead letters
//! - `LocalSchedulingEngine`: polls the store and dispatches firings, then
//!   applies the schedule change each firing asks for

pub mod engine;
pub mod store;
pub mod types;

pub use engine::{EngineConfig, LocalSchedulingEngine};
pub use store::{InMemoryTriggerStore, TriggerStore, TriggerStoreError};
pub use types::{
    ClaimedFiring, DeadLetterEntry, EngineStats, ScheduledJob, Trigger, TriggerKind,
};

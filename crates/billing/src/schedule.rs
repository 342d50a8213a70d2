//! Scheduling contracts: job/trigger identity, per-job data, cron schedules,
//! and the engine the billing core drives.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use recurra_core::InvoiceId;

use crate::error::BillingError;

/// Every Jan 1st at 12:00 (sec min hour day-of-month month day-of-week year).
pub const DEFAULT_BILLING_CRON: &str = "0 0 12 1 1 * *";

/// Name of a durable job (one per enrolled invoice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Deterministic key, so re-enrolling an invoice finds the existing job.
    pub fn for_invoice(invoice_id: InvoiceId) -> Self {
        Self(format!("job_invoice_{invoice_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for JobKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a trigger (a recurring cron trigger or a one-shot retry).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerKey(String);

impl TriggerKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn for_invoice(invoice_id: InvoiceId) -> Self {
        Self(format!("trigger_invoice_{invoice_id}"))
    }

    /// Unique key for a one-shot re-attempt of `job`.
    pub fn one_shot(job: &JobKey) -> Self {
        Self(format!("{job}_retry_{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mutable per-job state, owned by the engine's job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobData {
    /// Invoice the next firing charges. Replaced on currency remediation.
    pub invoice_id: InvoiceId,
    /// Network-failure retries left before the job is abandoned.
    pub retries_remaining: u32,
}

impl JobData {
    pub fn new(invoice_id: InvoiceId, retries_remaining: u32) -> Self {
        Self {
            invoice_id,
            retries_remaining,
        }
    }
}

/// A parsed cron expression.
///
/// Uses the seconds-first format of the `cron` crate:
/// `sec min hour day-of-month month day-of-week [year]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, SchedulingError> {
        let expression = expression.trim();
        let schedule =
            cron::Schedule::from_str(expression).map_err(|e| SchedulingError::InvalidSchedule {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`, if the schedule fires again at all.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronSchedule {}

impl TryFrom<String> for CronSchedule {
    type Error = SchedulingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CronSchedule> for String {
    fn from(value: CronSchedule) -> Self {
        value.expression
    }
}

impl FromStr for CronSchedule {
    type Err = SchedulingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// One invocation of a job by the engine.
#[derive(Debug, Clone)]
pub struct Firing {
    pub id: Uuid,
    pub job: JobKey,
    /// Trigger that fired; `None` for an immediate re-fire.
    pub trigger: Option<TriggerKey>,
    /// Job data as stored when the firing was dispatched.
    pub data: JobData,
    pub fired_at: DateTime<Utc>,
}

impl Firing {
    pub fn new(job: JobKey, trigger: Option<TriggerKey>, data: JobData) -> Self {
        Self {
            id: Uuid::now_v7(),
            job,
            trigger,
            data,
            fired_at: Utc::now(),
        }
    }
}

/// Schedule change requested by a firing, applied by the engine after it returns.
#[derive(Debug)]
pub enum FiringOutcome {
    /// Leave the schedule as it is.
    Done,
    /// Fire the same job again right away, reading its updated job data.
    RefireNow,
    /// Add a one-shot trigger after the delay; recurring triggers stay.
    RetryAfter(Duration),
    /// Remove the job and all its triggers.
    Unschedule,
    /// Remove the job and record a terminal failure.
    Abandon(BillingError),
}

impl FiringOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            FiringOutcome::Done => "done",
            FiringOutcome::RefireNow => "refire_now",
            FiringOutcome::RetryAfter(_) => "retry_after",
            FiringOutcome::Unschedule => "unschedule",
            FiringOutcome::Abandon(_) => "abandon",
        }
    }
}

/// Scheduling engine failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("invalid cron expression `{expression}`: {reason}")]
    InvalidSchedule { expression: String, reason: String },
    #[error("job not found: {0}")]
    JobNotFound(JobKey),
    #[error("no firing handler bound to the engine")]
    NoHandler,
    #[error("engine error: {0}")]
    Engine(String),
}

/// Job-execution callback invoked by the engine once per firing.
#[async_trait]
pub trait FiringHandler: Send + Sync {
    async fn fire(&self, firing: Firing, engine: &dyn SchedulingEngine) -> FiringOutcome;
}

/// Trigger/job registry with recurring and one-shot triggers.
#[async_trait]
pub trait SchedulingEngine: Send + Sync {
    /// Binds the callback that firings are dispatched to, replacing any earlier one.
    fn bind_handler(&self, handler: Arc<dyn FiringHandler>);

    fn is_started(&self) -> bool;

    async fn start(&self) -> Result<(), SchedulingError>;

    /// Registers `job` with `data` and a recurring trigger.
    ///
    /// Returns `false` without changing anything when the job already exists.
    async fn schedule_recurring(
        &self,
        job: &JobKey,
        trigger: &TriggerKey,
        schedule: &CronSchedule,
        data: JobData,
    ) -> Result<bool, SchedulingError>;

    async fn schedule_one_shot(
        &self,
        job: &JobKey,
        delay: Duration,
    ) -> Result<TriggerKey, SchedulingError>;

    async fn reschedule_immediately(&self, job: &JobKey) -> Result<(), SchedulingError>;

    /// Removes the job and all its triggers. Returns `false` if it did not exist.
    async fn delete_job(&self, job: &JobKey) -> Result<bool, SchedulingError>;

    async fn job_data(&self, job: &JobKey) -> Result<Option<JobData>, SchedulingError>;

    async fn put_job_data(&self, job: &JobKey, data: JobData) -> Result<(), SchedulingError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn keys_are_derived_from_invoice_id() {
        let id = InvoiceId::new(1);
        assert_eq!(JobKey::for_invoice(id).as_str(), "job_invoice_1");
        assert_eq!(TriggerKey::for_invoice(id).as_str(), "trigger_invoice_1");
    }

    #[test]
    fn one_shot_triggers_get_distinct_keys() {
        let job = JobKey::for_invoice(InvoiceId::new(3));
        let a = TriggerKey::one_shot(&job);
        let b = TriggerKey::one_shot(&job);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("job_invoice_3_retry_"));
    }

    #[test]
    fn default_schedule_fires_on_january_first_at_noon() {
        let schedule = CronSchedule::parse(DEFAULT_BILLING_CRON).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 15, 8, 0, 0).unwrap();

        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2027, 1, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn malformed_expression_is_rejected() {
        let err = CronSchedule::parse("bla bla bla").unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::InvalidSchedule { expression, .. } if expression == "bla bla bla"
        ));
    }

    #[test]
    fn schedule_serializes_as_expression() {
        let schedule = CronSchedule::parse("0 */5 * * * *").unwrap();
        let json = serde_json::to_string(&schedule).unwrap();
        assert_eq!(json, "\"0 */5 * * * *\"");

        let back: CronSchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schedule);
    }
}

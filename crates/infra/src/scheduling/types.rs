//! Trigger and job records kept by the trigger store.

use chrono::{DateTime, Utc};
use serde::Serialize;

use recurra_billing::{CronSchedule, Firing, JobData, JobKey, TriggerKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerKind {
    /// Fires on every cron match until the job is removed.
    Cron(CronSchedule),
    /// Fires once, then is dropped.
    OneShot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub key: TriggerKey,
    pub kind: TriggerKind,
    /// `None` once the trigger can never fire again.
    pub next_fire_at: Option<DateTime<Utc>>,
}

impl Trigger {
    pub fn cron(key: TriggerKey, schedule: CronSchedule, now: DateTime<Utc>) -> Self {
        let next_fire_at = schedule.next_after(now);
        Self {
            key,
            kind: TriggerKind::Cron(schedule),
            next_fire_at,
        }
    }

    pub fn one_shot(key: TriggerKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            kind: TriggerKind::OneShot,
            next_fire_at: Some(at),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire_at.is_some_and(|at| at <= now)
    }

    /// Moves past a firing at `now`. Missed cron matches are coalesced into
    /// the one firing. Returns `false` when the trigger is spent.
    pub fn advance(&mut self, now: DateTime<Utc>) -> bool {
        self.next_fire_at = match &self.kind {
            TriggerKind::Cron(schedule) => schedule.next_after(now),
            TriggerKind::OneShot => None,
        };
        self.next_fire_at.is_some()
    }
}

/// A durable job: its data and the triggers that fire it.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub key: JobKey,
    pub data: JobData,
    pub triggers: Vec<Trigger>,
    /// Set by an immediate re-fire request; served before any trigger.
    pub refire_requested: bool,
    /// A firing of this job is in flight. Jobs never fire concurrently.
    pub running: bool,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn new(key: JobKey, data: JobData, trigger: Trigger) -> Self {
        Self {
            key,
            data,
            triggers: vec![trigger],
            refire_requested: false,
            running: false,
            created_at: Utc::now(),
        }
    }

    /// Earliest pending fire time, ignoring re-fire requests.
    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.triggers.iter().filter_map(|t| t.next_fire_at).min()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.running && (self.refire_requested || self.triggers.iter().any(|t| t.is_due(now)))
    }
}

/// A firing claimed from the store, ready to hand to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedFiring {
    pub job: JobKey,
    pub trigger: Option<TriggerKey>,
    pub data: JobData,
}

impl ClaimedFiring {
    pub fn into_firing(self) -> Firing {
        Firing::new(self.job, self.trigger, self.data)
    }
}

/// A job removed after a terminal failure, kept for inspection.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    pub job: JobKey,
    pub data: JobData,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(job: JobKey, data: JobData, reason: String) -> Self {
        Self {
            job,
            data,
            dead_lettered_at: Utc::now(),
            reason,
        }
    }
}

/// Engine runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub firings: u64,
    pub refires: u64,
    pub retries_scheduled: u64,
    pub unscheduled: u64,
    pub abandoned: u64,
}

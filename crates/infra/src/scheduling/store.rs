//! Trigger storage implementations.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use recurra_billing::{JobData, JobKey, SchedulingError};

use super::types::{ClaimedFiring, DeadLetterEntry, ScheduledJob, Trigger};

/// Trigger store abstraction.
pub trait TriggerStore: Send + Sync {
    /// Store a new job with its first trigger. Returns `false` if the key is taken.
    fn insert_job(&self, job: ScheduledJob) -> Result<bool, TriggerStoreError>;

    fn contains(&self, job: &JobKey) -> Result<bool, TriggerStoreError>;

    fn get_data(&self, job: &JobKey) -> Result<Option<JobData>, TriggerStoreError>;

    fn put_data(&self, job: &JobKey, data: JobData) -> Result<(), TriggerStoreError>;

    fn add_trigger(&self, job: &JobKey, trigger: Trigger) -> Result<(), TriggerStoreError>;

    /// Mark the job to fire again as soon as it is not running.
    fn request_refire(&self, job: &JobKey) -> Result<(), TriggerStoreError>;

    /// Remove a job with all its triggers.
    fn remove_job(&self, job: &JobKey) -> Result<Option<ScheduledJob>, TriggerStoreError>;

    /// Claim at most one firing per due job and mark those jobs running.
    ///
    /// A pending re-fire wins over triggers; otherwise the earliest due trigger
    /// fires and is advanced (or dropped when spent).
    fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<ClaimedFiring>, TriggerStoreError>;

    /// Clear the running mark. A no-op if the job was removed meanwhile.
    fn release(&self, job: &JobKey) -> Result<(), TriggerStoreError>;

    /// Earliest time any idle job becomes due.
    fn next_due_at(&self) -> Result<Option<DateTime<Utc>>, TriggerStoreError>;

    fn dead_letter(&self, entry: DeadLetterEntry) -> Result<(), TriggerStoreError>;

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, TriggerStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerStoreError {
    #[error("job not found: {0}")]
    NotFound(JobKey),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<TriggerStoreError> for SchedulingError {
    fn from(value: TriggerStoreError) -> Self {
        match value {
            TriggerStoreError::NotFound(job) => SchedulingError::JobNotFound(job),
            TriggerStoreError::Storage(msg) => SchedulingError::Engine(msg),
        }
    }
}

/// In-memory trigger store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTriggerStore {
    jobs: RwLock<BTreeMap<JobKey, ScheduledJob>>,
    dead_letters: RwLock<Vec<DeadLetterEntry>>,
}

impl InMemoryTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<JobKey, ScheduledJob>>, TriggerStoreError> {
        self.jobs.read().map_err(|_| poisoned())
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, BTreeMap<JobKey, ScheduledJob>>, TriggerStoreError> {
        self.jobs.write().map_err(|_| poisoned())
    }

    fn with_job<T>(
        &self,
        job: &JobKey,
        f: impl FnOnce(&mut ScheduledJob) -> T,
    ) -> Result<T, TriggerStoreError> {
        let mut jobs = self.write()?;
        let entry = jobs
            .get_mut(job)
            .ok_or_else(|| TriggerStoreError::NotFound(job.clone()))?;
        Ok(f(entry))
    }
}

fn poisoned() -> TriggerStoreError {
    TriggerStoreError::Storage("trigger store lock poisoned".into())
}

impl TriggerStore for InMemoryTriggerStore {
    fn insert_job(&self, job: ScheduledJob) -> Result<bool, TriggerStoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.key) {
            return Ok(false);
        }
        jobs.insert(job.key.clone(), job);
        Ok(true)
    }

    fn contains(&self, job: &JobKey) -> Result<bool, TriggerStoreError> {
        Ok(self.read()?.contains_key(job))
    }

    fn get_data(&self, job: &JobKey) -> Result<Option<JobData>, TriggerStoreError> {
        Ok(self.read()?.get(job).map(|j| j.data))
    }

    fn put_data(&self, job: &JobKey, data: JobData) -> Result<(), TriggerStoreError> {
        self.with_job(job, |j| j.data = data)
    }

    fn add_trigger(&self, job: &JobKey, trigger: Trigger) -> Result<(), TriggerStoreError> {
        self.with_job(job, |j| j.triggers.push(trigger))
    }

    fn request_refire(&self, job: &JobKey) -> Result<(), TriggerStoreError> {
        self.with_job(job, |j| j.refire_requested = true)
    }

    fn remove_job(&self, job: &JobKey) -> Result<Option<ScheduledJob>, TriggerStoreError> {
        Ok(self.write()?.remove(job))
    }

    fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<ClaimedFiring>, TriggerStoreError> {
        let mut jobs = self.write()?;
        let mut claimed = Vec::new();

        for job in jobs.values_mut().filter(|j| j.is_due(now)) {
            let trigger = if job.refire_requested {
                job.refire_requested = false;
                None
            } else {
                let Some(idx) = job
                    .triggers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.is_due(now))
                    .min_by_key(|(_, t)| t.next_fire_at)
                    .map(|(idx, _)| idx)
                else {
                    continue;
                };
                let key = job.triggers[idx].key.clone();
                if !job.triggers[idx].advance(now) {
                    job.triggers.remove(idx);
                }
                Some(key)
            };

            job.running = true;
            claimed.push(ClaimedFiring {
                job: job.key.clone(),
                trigger,
                data: job.data,
            });
        }

        Ok(claimed)
    }

    fn release(&self, job: &JobKey) -> Result<(), TriggerStoreError> {
        if let Some(entry) = self.write()?.get_mut(job) {
            entry.running = false;
        }
        Ok(())
    }

    fn next_due_at(&self) -> Result<Option<DateTime<Utc>>, TriggerStoreError> {
        let jobs = self.read()?;
        let now = Utc::now();
        Ok(jobs
            .values()
            .filter(|j| !j.running)
            .filter_map(|j| if j.refire_requested { Some(now) } else { j.next_fire_at() })
            .min())
    }

    fn dead_letter(&self, entry: DeadLetterEntry) -> Result<(), TriggerStoreError> {
        self.dead_letters
            .write()
            .map_err(|_| poisoned())?
            .push(entry);
        Ok(())
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, TriggerStoreError> {
        let dls = self.dead_letters.read().map_err(|_| poisoned())?;
        let mut result = dls.clone();
        result.sort_by_key(|e| e.dead_lettered_at);
        result.truncate(limit);
        Ok(result)
    }
}

//! Local scheduling engine: polls a trigger store and dispatches firings on
//! the tokio runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use recurra_billing::{
    CronSchedule, FiringHandler, FiringOutcome, JobData, JobKey, SchedulingEngine,
    SchedulingError, TriggerKey,
};

use super::store::{InMemoryTriggerStore, TriggerStore, TriggerStoreError};
use super::types::{ClaimedFiring, DeadLetterEntry, EngineStats, ScheduledJob, Trigger};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on the time between two trigger scans.
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            name: "billing-scheduler".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

struct EngineInner {
    store: Arc<dyn TriggerStore>,
    config: EngineConfig,
    handler: RwLock<Option<Arc<dyn FiringHandler>>>,
    started: AtomicBool,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    run_loop: Mutex<Option<JoinHandle<()>>>,
    stats: Mutex<EngineStats>,
}

/// In-process [`SchedulingEngine`].
///
/// Cheap to clone; clones share the same store, handler, and loop. A job never
/// has two firings in flight: schedule changes requested by a firing are
/// applied before the job becomes claimable again.
#[derive(Clone)]
pub struct LocalSchedulingEngine {
    inner: Arc<EngineInner>,
}

impl LocalSchedulingEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(Arc::new(InMemoryTriggerStore::new()), config)
    }

    pub fn with_store(store: Arc<dyn TriggerStore>, config: EngineConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(EngineInner {
                store,
                config,
                handler: RwLock::new(None),
                started: AtomicBool::new(false),
                wake: Notify::new(),
                shutdown,
                run_loop: Mutex::new(None),
                stats: Mutex::new(EngineStats::default()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn TriggerStore> {
        &self.inner.store
    }

    pub fn stats(&self) -> EngineStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn has_job(&self, job: &JobKey) -> bool {
        self.inner.store.contains(job).unwrap_or(false)
    }

    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, SchedulingError> {
        Ok(self.inner.store.list_dead_letters(limit)?)
    }

    /// Stops the loop and waits for in-flight firings to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let handle = self.inner.run_loop.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(engine = %self.inner.config.name, error = %e, "engine loop panicked");
            }
        }
        self.inner.started.store(false, Ordering::SeqCst);
    }

    fn handler(&self) -> Option<Arc<dyn FiringHandler>> {
        self.inner.handler.read().ok()?.clone()
    }

    fn record(&self, f: impl FnOnce(&mut EngineStats)) {
        if let Ok(mut stats) = self.inner.stats.lock() {
            f(&mut stats);
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.inner.config.name.clone();
        info!(engine = %name, "scheduling engine loop started");
        let mut in_flight = JoinSet::new();

        loop {
            self.dispatch_due(&mut in_flight);

            let idle = self.idle_delay();
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.inner.wake.notified() => {}
                _ = tokio::time::sleep(idle) => {}
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = done {
                        error!(engine = %name, error = %e, "firing task failed");
                    }
                }
            }
        }

        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                error!(engine = %name, error = %e, "firing task failed");
            }
        }
        info!(engine = %name, "scheduling engine loop stopped");
    }

    /// Time until the next known due trigger, capped by the poll interval.
    fn idle_delay(&self) -> Duration {
        let poll = self.inner.config.poll_interval;
        if self.handler().is_none() {
            return poll;
        }
        match self.inner.store.next_due_at() {
            Ok(Some(at)) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO).min(poll),
            _ => poll,
        }
    }

    fn dispatch_due(&self, in_flight: &mut JoinSet<()>) {
        let Some(handler) = self.handler() else {
            return;
        };

        let claimed = match self.inner.store.claim_due(Utc::now()) {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(engine = %self.inner.config.name, error = %e, "failed to claim due firings");
                return;
            }
        };

        for claim in claimed {
            debug!(
                engine = %self.inner.config.name,
                job = %claim.job,
                trigger = ?claim.trigger,
                "claimed firing"
            );
            self.record(|s| s.firings += 1);
            in_flight.spawn(self.clone().fire(handler.clone(), claim));
        }
    }

    async fn fire(self, handler: Arc<dyn FiringHandler>, claim: ClaimedFiring) {
        let job = claim.job.clone();
        let data = claim.data;
        let engine = self.clone();
        let firing = claim.into_firing();

        // A panicking handler still releases the job.
        let outcome = match tokio::spawn(async move { handler.fire(firing, &engine).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(job = %job, error = %e, "firing handler panicked");
                FiringOutcome::Done
            }
        };

        self.apply(&job, data, outcome);

        if let Err(e) = self.inner.store.release(&job) {
            error!(job = %job, error = %e, "failed to release job");
        }
        self.inner.wake.notify_one();
    }

    fn apply(&self, job: &JobKey, data: JobData, outcome: FiringOutcome) {
        let store = &self.inner.store;
        debug!(job = %job, outcome = outcome.name(), "applying firing outcome");

        let result = match outcome {
            FiringOutcome::Done => Ok(()),
            FiringOutcome::RefireNow => store
                .request_refire(job)
                .map(|_| self.record(|s| s.refires += 1)),
            FiringOutcome::RetryAfter(delay) => self
                .add_one_shot(job, delay)
                .map(|_| self.record(|s| s.retries_scheduled += 1)),
            FiringOutcome::Unschedule => store.remove_job(job).map(|removed| {
                if removed.is_some() {
                    self.record(|s| s.unscheduled += 1);
                }
            }),
            FiringOutcome::Abandon(err) => store.remove_job(job).and_then(|removed| {
                let data = removed.map_or(data, |j| j.data);
                error!(job = %job, invoice_id = %data.invoice_id, error = %err, "job abandoned");
                self.record(|s| s.abandoned += 1);
                store.dead_letter(DeadLetterEntry::new(job.clone(), data, err.to_string()))
            }),
        };

        if let Err(e) = result {
            warn!(job = %job, error = %e, "schedule change dropped");
        }
    }

    fn add_one_shot(
        &self,
        job: &JobKey,
        delay: Duration,
    ) -> Result<TriggerKey, TriggerStoreError> {
        let key = TriggerKey::one_shot(job);
        let at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.inner
            .store
            .add_trigger(job, Trigger::one_shot(key.clone(), at))?;
        Ok(key)
    }
}

impl core::fmt::Debug for LocalSchedulingEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalSchedulingEngine")
            .field("config", &self.inner.config)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SchedulingEngine for LocalSchedulingEngine {
    fn bind_handler(&self, handler: Arc<dyn FiringHandler>) {
        if let Ok(mut slot) = self.inner.handler.write() {
            *slot = Some(handler);
        }
        self.inner.wake.notify_one();
    }

    fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<(), SchedulingError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutdown.send_replace(false);
        let shutdown = self.inner.shutdown.subscribe();
        let handle = tokio::spawn(self.clone().run(shutdown));
        let mut slot = self
            .inner
            .run_loop
            .lock()
            .map_err(|_| SchedulingError::Engine("engine state poisoned".into()))?;
        *slot = Some(handle);
        Ok(())
    }

    async fn schedule_recurring(
        &self,
        job: &JobKey,
        trigger: &TriggerKey,
        schedule: &CronSchedule,
        data: JobData,
    ) -> Result<bool, SchedulingError> {
        let trigger = Trigger::cron(trigger.clone(), schedule.clone(), Utc::now());
        if trigger.next_fire_at.is_none() {
            return Err(SchedulingError::InvalidSchedule {
                expression: schedule.expression().to_string(),
                reason: "schedule never fires".into(),
            });
        }
        let created = self
            .inner
            .store
            .insert_job(ScheduledJob::new(job.clone(), data, trigger))?;
        if created {
            self.inner.wake.notify_one();
        }
        Ok(created)
    }

    async fn schedule_one_shot(
        &self,
        job: &JobKey,
        delay: Duration,
    ) -> Result<TriggerKey, SchedulingError> {
        let key = self.add_one_shot(job, delay)?;
        self.inner.wake.notify_one();
        Ok(key)
    }

    async fn reschedule_immediately(&self, job: &JobKey) -> Result<(), SchedulingError> {
        self.inner.store.request_refire(job)?;
        self.inner.wake.notify_one();
        Ok(())
    }

    async fn delete_job(&self, job: &JobKey) -> Result<bool, SchedulingError> {
        Ok(self.inner.store.remove_job(job)?.is_some())
    }

    async fn job_data(&self, job: &JobKey) -> Result<Option<JobData>, SchedulingError> {
        Ok(self.inner.store.get_data(job)?)
    }

    async fn put_job_data(&self, job: &JobKey, data: JobData) -> Result<(), SchedulingError> {
        Ok(self.inner.store.put_data(job, data)?)
    }
}

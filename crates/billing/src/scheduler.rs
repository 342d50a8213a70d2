//! Billing scheduler: enrolls invoices into recurring billing.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::error::BillingResult;
use crate::invoice::Invoice;
use crate::job::BillingJob;
use crate::schedule::{
    CronSchedule, DEFAULT_BILLING_CRON, JobData, JobKey, SchedulingEngine, TriggerKey,
};

/// Owns the execution context and registers one recurring job per invoice.
pub struct BillingScheduler {
    engine: Arc<dyn SchedulingEngine>,
    context: ExecutionContext,
    default_cron: String,
}

impl BillingScheduler {
    /// Binds a [`BillingJob`] over `context` to the engine, then starts the
    /// engine unless it is already running.
    pub async fn initialize(
        engine: Arc<dyn SchedulingEngine>,
        context: ExecutionContext,
    ) -> BillingResult<Self> {
        engine.bind_handler(Arc::new(BillingJob::new(context.clone())));

        if engine.is_started() {
            debug!("scheduling engine already running");
        } else {
            engine.start().await?;
            info!("scheduling engine started");
        }

        Ok(Self {
            engine,
            context,
            default_cron: DEFAULT_BILLING_CRON.to_string(),
        })
    }

    /// Overrides the cron expression used by [`enroll`](Self::enroll) when the
    /// caller gives none. The expression is validated on first use.
    pub fn with_default_cron(mut self, expression: impl Into<String>) -> Self {
        self.default_cron = expression.into();
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn engine(&self) -> &Arc<dyn SchedulingEngine> {
        &self.engine
    }

    /// Registers `job_invoice_<id>` with a recurring `trigger_invoice_<id>`.
    ///
    /// A malformed expression fails here, before anything is registered. An
    /// invoice that is already enrolled keeps its existing job and budget.
    pub async fn schedule_invoice_payment(
        &self,
        invoice: &Invoice,
        cron_expression: &str,
    ) -> BillingResult<JobKey> {
        let schedule = CronSchedule::parse(cron_expression)?;
        let job = JobKey::for_invoice(invoice.id);
        let trigger = TriggerKey::for_invoice(invoice.id);
        let data = JobData::new(invoice.id, self.context.retry_policy.budget);

        let created = self
            .engine
            .schedule_recurring(&job, &trigger, &schedule, data)
            .await?;

        if created {
            info!(
                job = %job,
                invoice_id = %invoice.id,
                cron = schedule.expression(),
                retries = data.retries_remaining,
                "invoice enrolled for recurring billing"
            );
        } else {
            debug!(job = %job, invoice_id = %invoice.id, "invoice already enrolled");
        }

        Ok(job)
    }

    /// Host entry point; uses the default schedule when `cron_expression` is `None`.
    pub async fn enroll(
        &self,
        invoice: &Invoice,
        cron_expression: Option<&str>,
    ) -> BillingResult<JobKey> {
        let expression = cron_expression.unwrap_or(&self.default_cron);
        self.schedule_invoice_payment(invoice, expression).await
    }

    /// Enrolls every pending invoice with the default schedule.
    ///
    /// Settled invoices are skipped. Stops at the first failure.
    pub async fn enroll_pending<'a>(
        &self,
        invoices: impl IntoIterator<Item = &'a Invoice>,
    ) -> BillingResult<Vec<JobKey>> {
        let mut enrolled = Vec::new();
        for invoice in invoices {
            if !invoice.status.is_collectable() {
                debug!(invoice_id = %invoice.id, status = %invoice.status, "not enrolling settled invoice");
                continue;
            }
            match self.enroll(invoice, None).await {
                Ok(job) => enrolled.push(job),
                Err(err) => {
                    warn!(invoice_id = %invoice.id, error = %err, "enrollment stopped");
                    return Err(err);
                }
            }
        }
        Ok(enrolled)
    }
}

impl core::fmt::Debug for BillingScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BillingScheduler")
            .field("context", &self.context)
            .field("default_cron", &self.default_cron)
            .finish_non_exhaustive()
    }
}

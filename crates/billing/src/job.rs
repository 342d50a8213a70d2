//! Billing job: the per-firing state machine.
//!
//! One firing fetches the bound invoice, re-checks its status, charges it, and
//! on failure picks exactly one recovery action:
//!
//! | charge failure      | recovery                                         |
//! |---------------------|--------------------------------------------------|
//! | `CustomerNotFound`  | delete the job, then deactivate the customer     |
//! | `CurrencyMismatch`  | convert into a new invoice, cancel, re-fire now  |
//! | `Network`/timeout   | one-shot retry while budget remains, else abandon|
//! | `InvoiceNotFound`   | unschedule the job                               |
//!
//! Schedule changes travel back to the engine as a [`FiringOutcome`]. Two things
//! happen before the firing returns instead: job data writes (so the next
//! firing sees them) and the job deletion that must precede a deactivation.
//!
//! A recovery step that cannot finish and would otherwise leave work nobody
//! retries (an active customer without a job, a pending invoice without a job)
//! ends in [`FiringOutcome::Abandon`] so the engine dead-letters it.

use std::future::Future;

use async_trait::async_trait;
use tracing::{Instrument, debug, error, info, info_span, warn};

use recurra_core::{CustomerId, InvoiceId, Money};

use crate::context::ExecutionContext;
use crate::error::{BillingError, BillingResult};
use crate::invoice::{Invoice, InvoiceStatus};
use crate::schedule::{Firing, FiringHandler, FiringOutcome, JobData, JobKey, SchedulingEngine};

/// Outcome of the charge step when nothing was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChargeStep {
    /// The invoice was settled or cancelled elsewhere.
    Skipped(InvoiceStatus),
    /// Insufficient funds; the invoice stays pending until the next cron tick.
    Declined,
    Paid,
}

/// The engine's firing handler for invoice billing.
#[derive(Debug, Clone)]
pub struct BillingJob {
    ctx: ExecutionContext,
}

impl BillingJob {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Runs one firing and returns the schedule change it requires.
    pub async fn execute(&self, firing: Firing, engine: &dyn SchedulingEngine) -> FiringOutcome {
        let mut data = firing.data;

        match self.charge(data.invoice_id).await {
            Ok(ChargeStep::Paid) => {
                info!("invoice charged and marked paid");
                FiringOutcome::Done
            }
            Ok(ChargeStep::Declined) => {
                info!("charge declined for insufficient funds; invoice stays pending");
                FiringOutcome::Done
            }
            Ok(ChargeStep::Skipped(status)) => {
                info!(%status, "invoice is not pending; skipping charge");
                FiringOutcome::Done
            }
            Err(err) => self.recover(&firing.job, &mut data, err, engine).await,
        }
    }

    async fn charge(&self, invoice_id: InvoiceId) -> BillingResult<ChargeStep> {
        // Status is read at firing time: the invoice may have been settled or
        // cancelled through another channel since the job was scheduled.
        let invoice = self
            .bounded("invoice fetch", self.ctx.invoices.fetch(invoice_id))
            .await?;

        if !invoice.status.is_collectable() {
            return Ok(ChargeStep::Skipped(invoice.status));
        }

        let charged = self
            .bounded("charge", self.ctx.payments.charge(&invoice))
            .await?;
        if !charged {
            return Ok(ChargeStep::Declined);
        }

        let paid = invoice.with_status(InvoiceStatus::Paid);
        if let Err(err) = self
            .bounded("invoice update", self.ctx.invoices.update(paid))
            .await
        {
            error!(
                invoice_id = %invoice_id,
                error = %err,
                "invoice was charged but could not be marked paid"
            );
            return Err(err);
        }

        Ok(ChargeStep::Paid)
    }

    async fn recover(
        &self,
        job: &JobKey,
        data: &mut JobData,
        err: BillingError,
        engine: &dyn SchedulingEngine,
    ) -> FiringOutcome {
        match err {
            BillingError::CustomerNotFound(customer_id) => {
                info!(customer_id = %customer_id, "customer not found; purging job and deactivating customer");
                self.deactivate_and_purge(job, customer_id, engine).await
            }
            BillingError::CurrencyMismatch {
                invoice_id,
                customer_id,
            } => {
                info!(
                    customer_id = %customer_id,
                    "currency mismatch; replacing invoice with a converted one"
                );
                match self
                    .convert_and_replace(job, data, invoice_id, customer_id, engine)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(err) => self.recovery_failed(job, data, err, engine).await,
                }
            }
            BillingError::Network(reason) => {
                warn!(%reason, "charge attempt failed with a network error");
                self.retry_with_backoff(job, data, engine).await
            }
            BillingError::InvoiceNotFound(invoice_id) => {
                info!(missing_invoice_id = %invoice_id, "invoice not found; unscheduling job");
                FiringOutcome::Unschedule
            }
            other => {
                error!(error = %other, "billing firing failed; schedule left unchanged");
                FiringOutcome::Done
            }
        }
    }

    /// Failure raised while a recovery action was running.
    async fn recovery_failed(
        &self,
        job: &JobKey,
        data: &mut JobData,
        err: BillingError,
        engine: &dyn SchedulingEngine,
    ) -> FiringOutcome {
        if err.is_transient() {
            warn!(error = %err, "recovery hit a network error");
            return self.retry_with_backoff(job, data, engine).await;
        }

        match err {
            BillingError::InvoiceNotFound(_) | BillingError::CustomerNotFound(_) => {
                warn!(error = %err, "recovery target vanished; unscheduling job");
                FiringOutcome::Unschedule
            }
            other => {
                error!(error = %other, "recovery failed; schedule left unchanged");
                FiringOutcome::Done
            }
        }
    }

    async fn deactivate_and_purge(
        &self,
        job: &JobKey,
        customer_id: CustomerId,
        engine: &dyn SchedulingEngine,
    ) -> FiringOutcome {
        // Unschedule first so no new firing targets a customer mid-deactivation.
        let outcome = match engine.delete_job(job).await {
            Ok(existed) => {
                debug!(existed, "job deleted");
                FiringOutcome::Done
            }
            Err(err) => {
                warn!(error = %err, "could not delete job; asking the engine to unschedule it");
                FiringOutcome::Unschedule
            }
        };

        match self
            .bounded(
                "customer deactivation",
                self.ctx.customers.deactivate(customer_id),
            )
            .await
        {
            Ok(_) => {
                info!(customer_id = %customer_id, "customer deactivated");
                outcome
            }
            Err(BillingError::CustomerNotFound(_)) => {
                info!(customer_id = %customer_id, "customer already gone; nothing to deactivate");
                outcome
            }
            Err(err) => {
                // The job is already deleted, so nothing would retry this.
                error!(
                    customer_id = %customer_id,
                    error = %err,
                    "failed to deactivate customer"
                );
                FiringOutcome::Abandon(BillingError::DeactivationFailed {
                    customer_id,
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn convert_and_replace(
        &self,
        job: &JobKey,
        data: &mut JobData,
        invoice_id: InvoiceId,
        customer_id: CustomerId,
        engine: &dyn SchedulingEngine,
    ) -> BillingResult<FiringOutcome> {
        let original = self
            .bounded("invoice fetch", self.ctx.invoices.fetch(invoice_id))
            .await?;
        let customer = self
            .bounded("customer fetch", self.ctx.customers.fetch(customer_id))
            .await?;

        let from = original.amount.currency();
        let converted = self
            .bounded(
                "currency conversion",
                self.ctx
                    .conversion
                    .convert(from, customer.currency, original.amount.value()),
            )
            .await?;

        // Create before cancelling: a failed create leaves the original pending
        // and still bound to the job.
        let replacement = self
            .bounded(
                "invoice create",
                self.ctx
                    .invoices
                    .create(Money::new(converted, customer.currency), &customer),
            )
            .await?;

        if let Err(err) = self
            .bounded(
                "invoice update",
                self.ctx
                    .invoices
                    .update(original.with_status(InvoiceStatus::Cancelled)),
            )
            .await
        {
            self.withdraw(&replacement).await;
            return Err(err);
        }

        info!(
            cancelled_invoice_id = %original.id,
            replacement_invoice_id = %replacement.id,
            from = %original.amount,
            to = %replacement.amount,
            "invoice replaced in customer currency"
        );

        data.invoice_id = replacement.id;
        if let Err(err) = engine.put_job_data(job, *data).await {
            error!(
                replacement_invoice_id = %replacement.id,
                error = %err,
                "replacement invoice could not be bound to the job"
            );
            return Ok(FiringOutcome::Abandon(BillingError::Unbound {
                invoice_id: replacement.id,
                reason: err.to_string(),
            }));
        }

        Ok(FiringOutcome::RefireNow)
    }

    /// Cancels a replacement whose original could not be cancelled, so at most
    /// one of the two stays collectable.
    async fn withdraw(&self, replacement: &Invoice) {
        let cancelled = replacement.with_status(InvoiceStatus::Cancelled);
        match self
            .bounded("invoice update", self.ctx.invoices.update(cancelled))
            .await
        {
            Ok(_) => debug!(replacement_invoice_id = %replacement.id, "replacement withdrawn"),
            Err(err) => error!(
                replacement_invoice_id = %replacement.id,
                error = %err,
                "original and replacement invoice are both pending"
            ),
        }
    }

    async fn retry_with_backoff(
        &self,
        job: &JobKey,
        data: &mut JobData,
        engine: &dyn SchedulingEngine,
    ) -> FiringOutcome {
        if data.retries_remaining == 0 {
            let err = BillingError::RetriesExhausted {
                invoice_id: data.invoice_id,
                job: job.clone(),
            };
            error!(error = %err, "retries exhausted; unscheduling job");
            return FiringOutcome::Abandon(err);
        }

        data.retries_remaining -= 1;

        // The decremented budget is stored before any retry is scheduled.
        if let Err(err) = engine.put_job_data(job, *data).await {
            error!(
                invoice_id = %data.invoice_id,
                error = %err,
                "failed to persist retry budget; not retrying"
            );
            return FiringOutcome::Done;
        }

        let delay = self.ctx.retry_policy.delay;
        info!(
            retries_remaining = data.retries_remaining,
            delay_secs = delay.as_secs(),
            "scheduling one-shot retry"
        );
        FiringOutcome::RetryAfter(delay)
    }

    /// Runs a remote call under the context's timeout; a timeout is a network error.
    async fn bounded<T, E>(
        &self,
        what: &str,
        call: impl Future<Output = Result<T, E>>,
    ) -> BillingResult<T>
    where
        BillingError: From<E>,
    {
        match tokio::time::timeout(self.ctx.call_timeout, call).await {
            Ok(result) => result.map_err(BillingError::from),
            Err(_) => Err(BillingError::timeout(what, self.ctx.call_timeout)),
        }
    }
}

#[async_trait]
impl FiringHandler for BillingJob {
    async fn fire(&self, firing: Firing, engine: &dyn SchedulingEngine) -> FiringOutcome {
        let span = info_span!(
            "billing_firing",
            job = %firing.job,
            firing_id = %firing.id,
            invoice_id = %firing.data.invoice_id,
            retries_remaining = firing.data.retries_remaining,
        );
        self.execute(firing, engine).instrument(span).await
    }
}

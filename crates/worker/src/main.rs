mod seed;

use std::sync::Arc;

use anyhow::Context;
use rust_decimal::Decimal;

use recurra_billing::{
    BillingScheduler, ExecutionContext, InvoiceDataAccess, SchedulingEngine,
};
use recurra_core::Currency;
use recurra_infra::{
    BillingConfig, InMemoryBillingStore, LedgerPaymentProvider, LocalSchedulingEngine,
    RateTableConversion,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BillingConfig::from_env().context("invalid RECURRA_* configuration")?;
    recurra_observability::init(config.log_format);

    let store = Arc::new(InMemoryBillingStore::new());
    let seeded = seed::seed(&store).context("failed to seed demo data")?;
    tracing::info!(invoices = seeded, "demo data seeded");

    let payments = Arc::new(LedgerPaymentProvider::new(store.clone()));
    let conversion = Arc::new(
        RateTableConversion::new()
            .with_rate(Currency::Eur, Currency::Dkk, Decimal::new(746, 2))
            .with_rate(Currency::Eur, Currency::Sek, Decimal::new(1150, 2))
            .with_rate(Currency::Eur, Currency::Usd, Decimal::new(108, 2))
            .with_rate(Currency::Eur, Currency::Gbp, Decimal::new(85, 2)),
    );
    let ctx = ExecutionContext::new(payments, store.clone(), store.clone(), conversion)
        .with_retry_policy(config.retry_policy())
        .with_call_timeout(config.call_timeout);

    let engine = LocalSchedulingEngine::new(config.engine_config());
    let scheduler = BillingScheduler::initialize(Arc::new(engine.clone()), ctx)
        .await
        .context("failed to start the scheduling engine")?
        .with_default_cron(config.default_cron.clone());

    let invoices = InvoiceDataAccess::fetch_all(store.as_ref())
        .await
        .context("failed to list invoices")?;
    let jobs = scheduler
        .enroll_pending(&invoices)
        .await
        .context("failed to enroll pending invoices")?;
    tracing::info!(
        jobs = jobs.len(),
        cron = %config.default_cron,
        started = engine.is_started(),
        "billing worker running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("shutting down");
    engine.shutdown().await;
    let stats = engine.stats();
    tracing::info!(
        firings = stats.firings,
        refires = stats.refires,
        retries_scheduled = stats.retries_scheduled,
        unscheduled = stats.unscheduled,
        abandoned = stats.abandoned,
        "billing worker stopped"
    );
    Ok(())
}

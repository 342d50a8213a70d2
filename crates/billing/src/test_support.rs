//! Recording fakes for the billing collaborators.
//!
//! All fakes append to one shared call log, so tests can assert ordering across
//! collaborators (e.g. job deletion before customer deactivation).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use recurra_core::{Currency, CustomerId, InvoiceId, Money};

use crate::context::{ExecutionContext, RetryPolicy};
use crate::customer::{Customer, CustomerStatus};
use crate::invoice::{Invoice, InvoiceStatus};
use crate::job::BillingJob;
use crate::ports::{
    ChargeError, ConversionError, CurrencyConversion, CustomerDataAccess, DataAccessError,
    InvoiceDataAccess, PaymentProvider,
};
use crate::schedule::{
    CronSchedule, FiringHandler, JobData, JobKey, SchedulingEngine, SchedulingError, TriggerKey,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    FetchInvoice(InvoiceId),
    UpdateInvoice(Invoice),
    CreateInvoice(Money, CustomerId),
    FetchCustomer(CustomerId),
    Deactivate(CustomerId),
    Charge(InvoiceId),
    Convert(Currency, Currency, Decimal),
    BindHandler,
    Start,
    ScheduleRecurring {
        job: JobKey,
        trigger: TriggerKey,
        expression: String,
        data: JobData,
    },
    ScheduleOneShot(JobKey, Duration),
    RescheduleImmediately(JobKey),
    DeleteJob(JobKey),
    PutJobData(JobKey, JobData),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::UpdateInvoice(_) | Call::CreateInvoice(..) | Call::Deactivate(_)
        )
    }

    pub fn is_engine(&self) -> bool {
        matches!(
            self,
            Call::BindHandler
                | Call::Start
                | Call::ScheduleRecurring { .. }
                | Call::ScheduleOneShot(..)
                | Call::RescheduleImmediately(_)
                | Call::DeleteJob(_)
                | Call::PutJobData(..)
        )
    }
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

fn record(log: &CallLog, call: Call) {
    log.lock().unwrap().push(call);
}

pub fn given_invoice() -> Invoice {
    Invoice::new(
        InvoiceId::new(1),
        CustomerId::new(1),
        Money::new(Decimal::new(12300, 2), Currency::Usd),
        InvoiceStatus::Pending,
    )
}

pub fn given_customer() -> Customer {
    Customer::new(CustomerId::new(1), Currency::Usd, CustomerStatus::Active)
}

pub struct FakeInvoices {
    log: CallLog,
    invoices: Mutex<BTreeMap<InvoiceId, Invoice>>,
    fail_create: AtomicBool,
    fail_update_of: Mutex<Option<InvoiceId>>,
}

impl FakeInvoices {
    /// The next `create` fails with `Unavailable`.
    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Every `update` of `id` fails with `Unavailable`.
    pub fn fail_updates_of(&self, id: InvoiceId) {
        *self.fail_update_of.lock().unwrap() = Some(id);
    }
}

#[async_trait]
impl InvoiceDataAccess for FakeInvoices {
    async fn fetch(&self, id: InvoiceId) -> Result<Invoice, DataAccessError> {
        record(&self.log, Call::FetchInvoice(id));
        self.invoices
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(DataAccessError::InvoiceNotFound(id))
    }

    async fn fetch_all(&self) -> Result<Vec<Invoice>, DataAccessError> {
        Ok(self.invoices.lock().unwrap().values().cloned().collect())
    }

    async fn update(&self, invoice: Invoice) -> Result<Invoice, DataAccessError> {
        record(&self.log, Call::UpdateInvoice(invoice.clone()));
        if *self.fail_update_of.lock().unwrap() == Some(invoice.id) {
            return Err(DataAccessError::Unavailable("invoice store offline".into()));
        }
        let mut invoices = self.invoices.lock().unwrap();
        match invoices.get_mut(&invoice.id) {
            Some(slot) => {
                *slot = invoice.clone();
                Ok(invoice)
            }
            None => Err(DataAccessError::InvoiceNotFound(invoice.id)),
        }
    }

    async fn create(&self, amount: Money, customer: &Customer) -> Result<Invoice, DataAccessError> {
        record(&self.log, Call::CreateInvoice(amount, customer.id));
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(DataAccessError::Unavailable("invoice store offline".into()));
        }
        let mut invoices = self.invoices.lock().unwrap();
        let next = invoices.keys().next_back().map_or(1, |id| id.get() + 1);
        let invoice = Invoice::new(
            InvoiceId::new(next),
            customer.id,
            amount,
            InvoiceStatus::Pending,
        );
        invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }
}

pub struct FakeCustomers {
    log: CallLog,
    customers: Mutex<BTreeMap<CustomerId, Customer>>,
    fail_deactivate: AtomicBool,
}

impl FakeCustomers {
    pub fn fail_deactivations(&self) {
        self.fail_deactivate.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CustomerDataAccess for FakeCustomers {
    async fn fetch(&self, id: CustomerId) -> Result<Customer, DataAccessError> {
        record(&self.log, Call::FetchCustomer(id));
        self.customers
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(DataAccessError::CustomerNotFound(id))
    }

    async fn fetch_all(&self) -> Result<Vec<Customer>, DataAccessError> {
        Ok(self.customers.lock().unwrap().values().cloned().collect())
    }

    async fn deactivate(&self, id: CustomerId) -> Result<Customer, DataAccessError> {
        record(&self.log, Call::Deactivate(id));
        if self.fail_deactivate.load(Ordering::SeqCst) {
            return Err(DataAccessError::Unavailable("customer store offline".into()));
        }
        let mut customers = self.customers.lock().unwrap();
        let customer = customers
            .get_mut(&id)
            .ok_or(DataAccessError::CustomerNotFound(id))?;
        *customer = customer.deactivated();
        Ok(customer.clone())
    }
}

#[derive(Debug, Clone)]
pub enum ChargeScript {
    Respond(Result<bool, ChargeError>),
    /// Never completes; exercises the call timeout.
    Hang,
}

pub struct FakePayments {
    log: CallLog,
    script: Mutex<ChargeScript>,
}

impl FakePayments {
    pub fn script(&self, script: ChargeScript) {
        *self.script.lock().unwrap() = script;
    }
}

#[async_trait]
impl PaymentProvider for FakePayments {
    async fn charge(&self, invoice: &Invoice) -> Result<bool, ChargeError> {
        record(&self.log, Call::Charge(invoice.id));
        let script = self.script.lock().unwrap().clone();
        match script {
            ChargeScript::Respond(result) => result,
            ChargeScript::Hang => std::future::pending().await,
        }
    }
}

pub struct FakeConversion {
    log: CallLog,
    result: Mutex<Option<Result<Decimal, ConversionError>>>,
}

impl FakeConversion {
    pub fn set_result(&self, amount: Decimal) {
        *self.result.lock().unwrap() = Some(Ok(amount));
    }

    pub fn fail_with_network_error(&self) {
        *self.result.lock().unwrap() = Some(Err(ConversionError::Network("rates offline".into())));
    }
}

#[async_trait]
impl CurrencyConversion for FakeConversion {
    async fn convert(
        &self,
        from: Currency,
        to: Currency,
        amount: Decimal,
    ) -> Result<Decimal, ConversionError> {
        record(&self.log, Call::Convert(from, to, amount));
        self.result.lock().unwrap().clone().unwrap_or(Ok(amount))
    }
}

/// Engine fake: records every call and keeps job data in a map.
pub struct FakeEngine {
    log: CallLog,
    data: Mutex<HashMap<JobKey, JobData>>,
    started: AtomicBool,
    fail_put_data: AtomicBool,
    handler: Mutex<Option<Arc<dyn FiringHandler>>>,
}

impl FakeEngine {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            data: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            fail_put_data: AtomicBool::new(false),
            handler: Mutex::new(None),
        }
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }

    pub fn stored_data(&self, job: &JobKey) -> Option<JobData> {
        self.data.lock().unwrap().get(job).copied()
    }

    pub fn fail_put_data(&self) {
        self.fail_put_data.store(true, Ordering::SeqCst);
    }

    pub fn seed_data(&self, job: &JobKey, data: JobData) {
        self.data.lock().unwrap().insert(job.clone(), data);
    }
}

#[async_trait]
impl SchedulingEngine for FakeEngine {
    fn bind_handler(&self, handler: Arc<dyn FiringHandler>) {
        record(&self.log, Call::BindHandler);
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<(), SchedulingError> {
        record(&self.log, Call::Start);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn schedule_recurring(
        &self,
        job: &JobKey,
        trigger: &TriggerKey,
        schedule: &CronSchedule,
        data: JobData,
    ) -> Result<bool, SchedulingError> {
        record(
            &self.log,
            Call::ScheduleRecurring {
                job: job.clone(),
                trigger: trigger.clone(),
                expression: schedule.expression().to_string(),
                data,
            },
        );
        let mut jobs = self.data.lock().unwrap();
        if jobs.contains_key(job) {
            return Ok(false);
        }
        jobs.insert(job.clone(), data);
        Ok(true)
    }

    async fn schedule_one_shot(
        &self,
        job: &JobKey,
        delay: Duration,
    ) -> Result<TriggerKey, SchedulingError> {
        record(&self.log, Call::ScheduleOneShot(job.clone(), delay));
        Ok(TriggerKey::one_shot(job))
    }

    async fn reschedule_immediately(&self, job: &JobKey) -> Result<(), SchedulingError> {
        record(&self.log, Call::RescheduleImmediately(job.clone()));
        Ok(())
    }

    async fn delete_job(&self, job: &JobKey) -> Result<bool, SchedulingError> {
        record(&self.log, Call::DeleteJob(job.clone()));
        Ok(self.data.lock().unwrap().remove(job).is_some())
    }

    async fn job_data(&self, job: &JobKey) -> Result<Option<JobData>, SchedulingError> {
        Ok(self.stored_data(job))
    }

    async fn put_job_data(&self, job: &JobKey, data: JobData) -> Result<(), SchedulingError> {
        record(&self.log, Call::PutJobData(job.clone(), data));
        if self.fail_put_data.load(Ordering::SeqCst) {
            return Err(SchedulingError::Engine("job store offline".into()));
        }
        let mut jobs = self.data.lock().unwrap();
        match jobs.get_mut(job) {
            Some(slot) => {
                *slot = data;
                Ok(())
            }
            None => Err(SchedulingError::JobNotFound(job.clone())),
        }
    }
}

/// Fakes wired into an `ExecutionContext`, seeded with invoice 1 / customer 1.
pub struct Harness {
    pub log: CallLog,
    pub invoices: Arc<FakeInvoices>,
    pub customers: Arc<FakeCustomers>,
    pub payments: Arc<FakePayments>,
    pub conversion: Arc<FakeConversion>,
    pub engine: Arc<FakeEngine>,
    pub ctx: ExecutionContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_invoice(given_invoice())
    }

    pub fn with_invoice(invoice: Invoice) -> Self {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let invoices = Arc::new(FakeInvoices {
            log: log.clone(),
            invoices: Mutex::new(BTreeMap::from([(invoice.id, invoice)])),
            fail_create: AtomicBool::new(false),
            fail_update_of: Mutex::new(None),
        });
        let customer = given_customer();
        let customers = Arc::new(FakeCustomers {
            log: log.clone(),
            customers: Mutex::new(BTreeMap::from([(customer.id, customer)])),
            fail_deactivate: AtomicBool::new(false),
        });
        let payments = Arc::new(FakePayments {
            log: log.clone(),
            script: Mutex::new(ChargeScript::Respond(Ok(true))),
        });
        let conversion = Arc::new(FakeConversion {
            log: log.clone(),
            result: Mutex::new(None),
        });
        let engine = Arc::new(FakeEngine::new(log.clone()));

        let ctx = ExecutionContext::new(
            payments.clone(),
            invoices.clone(),
            customers.clone(),
            conversion.clone(),
        )
        .with_retry_policy(RetryPolicy::fixed(1, Duration::from_secs(300)));

        Self {
            log,
            invoices,
            customers,
            payments,
            conversion,
            engine,
            ctx,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.ctx = self.ctx.with_call_timeout(timeout);
        self
    }

    pub fn job(&self) -> BillingJob {
        BillingJob::new(self.ctx.clone())
    }

    /// Registers job data for invoice `id` (budget 1) with the engine fake.
    pub fn job_data(&self, id: i64) -> JobData {
        let data = JobData::new(InvoiceId::new(id), self.ctx.retry_policy.budget);
        self.engine
            .seed_data(&JobKey::for_invoice(InvoiceId::new(id)), data);
        data
    }

    pub fn invoice(&self, id: i64) -> Invoice {
        self.invoices.invoices.lock().unwrap()[&InvoiceId::new(id)].clone()
    }

    pub fn set_customer_currency(&self, currency: Currency) {
        let mut customers = self.customers.customers.lock().unwrap();
        if let Some(customer) = customers.get_mut(&CustomerId::new(1)) {
            customer.currency = currency;
        }
    }

    pub fn calls_matching(&self, pred: impl Fn(&Call) -> bool) -> Vec<Call> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| pred(c))
            .cloned()
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls_matching(pred).len()
    }

    pub fn engine_calls(&self) -> Vec<Call> {
        self.calls_matching(Call::is_engine)
    }
}

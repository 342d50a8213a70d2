//! Collaborators and policies shared by every firing.

use std::sync::Arc;
use std::time::Duration;

use crate::ports::{CurrencyConversion, CustomerDataAccess, InvoiceDataAccess, PaymentProvider};

/// Retry policy for transient (network) charge failures.
///
/// Retries use a fixed delay; the budget is stored per job and counts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries granted to a newly enrolled job (0 = abandon on first failure).
    pub budget: u32,
    /// Delay before the one-shot re-attempt.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: 5,
            delay: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(budget: u32, delay: Duration) -> Self {
        Self { budget, delay }
    }

    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            budget: 0,
            ..Default::default()
        }
    }
}

/// Process-wide collaborator bag, built once at startup.
///
/// Firings only read it. It is owned by the [`BillingJob`](crate::BillingJob)
/// bound to the engine, never stored globally.
#[derive(Clone)]
pub struct ExecutionContext {
    pub payments: Arc<dyn PaymentProvider>,
    pub invoices: Arc<dyn InvoiceDataAccess>,
    pub customers: Arc<dyn CustomerDataAccess>,
    pub conversion: Arc<dyn CurrencyConversion>,
    pub retry_policy: RetryPolicy,
    /// Upper bound for every remote call made during a firing.
    pub call_timeout: Duration,
}

impl ExecutionContext {
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(
        payments: Arc<dyn PaymentProvider>,
        invoices: Arc<dyn InvoiceDataAccess>,
        customers: Arc<dyn CustomerDataAccess>,
        conversion: Arc<dyn CurrencyConversion>,
    ) -> Self {
        Self {
            payments,
            invoices,
            customers,
            conversion,
            retry_policy: RetryPolicy::default(),
            call_timeout: Self::DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

impl core::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("retry_policy", &self.retry_policy)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

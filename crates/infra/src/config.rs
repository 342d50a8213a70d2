//! Worker configuration, read from `RECURRA_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use recurra_billing::{CronSchedule, DEFAULT_BILLING_CRON, ExecutionContext, RetryPolicy};
use recurra_observability::LogFormat;

use crate::scheduling::EngineConfig;

pub const RETRY_BUDGET: &str = "RECURRA_RETRY_BUDGET";
pub const RETRY_DELAY_SECS: &str = "RECURRA_RETRY_DELAY_SECS";
pub const CALL_TIMEOUT_SECS: &str = "RECURRA_CALL_TIMEOUT_SECS";
pub const DEFAULT_CRON: &str = "RECURRA_DEFAULT_CRON";
pub const POLL_INTERVAL_MS: &str = "RECURRA_POLL_INTERVAL_MS";
pub const LOG_FORMAT: &str = "RECURRA_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingConfig {
    /// Network retries granted to each newly enrolled invoice.
    pub retry_budget: u32,
    pub retry_delay: Duration,
    /// Upper bound for each remote call made by a firing.
    pub call_timeout: Duration,
    /// Validated cron expression used when enrolling without one.
    pub default_cron: String,
    pub poll_interval: Duration,
    pub log_format: LogFormat,
}

impl Default for BillingConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            retry_budget: policy.budget,
            retry_delay: policy.delay,
            call_timeout: ExecutionContext::DEFAULT_CALL_TIMEOUT,
            default_cron: DEFAULT_BILLING_CRON.to_string(),
            poll_interval: EngineConfig::default().poll_interval,
            log_format: LogFormat::default(),
        }
    }
}

impl BillingConfig {
    /// Reads the process environment. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(RETRY_BUDGET) {
            config.retry_budget = parse(RETRY_BUDGET, &raw)?;
        }
        if let Some(raw) = lookup(RETRY_DELAY_SECS) {
            config.retry_delay = Duration::from_secs(parse(RETRY_DELAY_SECS, &raw)?);
        }
        if let Some(raw) = lookup(CALL_TIMEOUT_SECS) {
            let secs: u64 = parse(CALL_TIMEOUT_SECS, &raw)?;
            if secs == 0 {
                return Err(ConfigError::invalid(CALL_TIMEOUT_SECS, &raw, "must be positive"));
            }
            config.call_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup(DEFAULT_CRON) {
            let schedule = CronSchedule::parse(&raw)
                .map_err(|e| ConfigError::invalid(DEFAULT_CRON, &raw, e))?;
            config.default_cron = schedule.expression().to_string();
        }
        if let Some(raw) = lookup(POLL_INTERVAL_MS) {
            let millis: u64 = parse(POLL_INTERVAL_MS, &raw)?;
            if millis == 0 {
                return Err(ConfigError::invalid(POLL_INTERVAL_MS, &raw, "must be positive"));
            }
            config.poll_interval = Duration::from_millis(millis);
        }
        if let Some(raw) = lookup(LOG_FORMAT) {
            config.log_format = parse(LOG_FORMAT, &raw)?;
        }

        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retry_budget, self.retry_delay)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default().with_poll_interval(self.poll_interval)
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, raw, e))
}

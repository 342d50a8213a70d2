//! Currency conversion from a table of exchange rates.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use rust_decimal::Decimal;

use recurra_billing::{ConversionError, CurrencyConversion};
use recurra_core::Currency;

/// Converts with configured rates, rounding to cents.
///
/// A pair without a rate converts one-to-one, unless the table is
/// [`strict`](Self::strict).
#[derive(Debug, Default)]
pub struct RateTableConversion {
    rates: RwLock<HashMap<(Currency, Currency), Decimal>>,
    strict: bool,
}

impl RateTableConversion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Missing rates fail with `ConversionError::RateUnavailable`.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn with_rate(self, from: Currency, to: Currency, rate: Decimal) -> Self {
        self.set_rate(from, to, rate);
        self
    }

    pub fn set_rate(&self, from: Currency, to: Currency, rate: Decimal) {
        if let Ok(mut rates) = self.rates.write() {
            rates.insert((from, to), rate);
        }
    }

    fn rate(&self, from: Currency, to: Currency) -> Result<Option<Decimal>, ConversionError> {
        let rates = self
            .rates
            .read()
            .map_err(|_| ConversionError::Network("rate table unavailable".into()))?;
        Ok(rates.get(&(from, to)).copied())
    }
}

#[async_trait]
impl CurrencyConversion for RateTableConversion {
    async fn convert(
        &self,
        from: Currency,
        to: Currency,
        amount: Decimal,
    ) -> Result<Decimal, ConversionError> {
        if from == to {
            return Ok(amount);
        }
        match self.rate(from, to)? {
            Some(rate) => amount
                .checked_mul(rate)
                .map(|converted| converted.round_dp(2))
                .ok_or(ConversionError::Overflow { from, to, amount }),
            None if self.strict => Err(ConversionError::RateUnavailable { from, to }),
            None => Ok(amount),
        }
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use bursar_expenses::{Conversion, Currency, Money};

use super::{ConversionError, CurrencyConverter};

/// In-memory table of dated exchange rates.
///
/// A rate applies from its effective date until a later rate replaces it.
/// Lookups for a pair fall back to the inverse pair when only that one has
/// been published.
///
/// Intended for tests/dev and for deployments that load the official daily
/// rate into memory.
#[derive(Debug, Default)]
pub struct InMemoryRateTable {
    rates: RwLock<HashMap<(Currency, Currency), BTreeMap<NaiveDate, Decimal>>>,
}

impl InMemoryRateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `rate` units of `to` per unit of `from`, effective from `effective`.
    pub fn set_rate(&self, from: Currency, to: Currency, effective: NaiveDate, rate: Decimal) {
        if let Ok(mut rates) = self.rates.write() {
            rates.entry((from, to)).or_default().insert(effective, rate);
        }
    }

    /// Builder-style `set_rate`.
    pub fn with_rate(
        self,
        from: Currency,
        to: Currency,
        effective: NaiveDate,
        rate: Decimal,
    ) -> Self {
        self.set_rate(from, to, effective, rate);
        self
    }

    fn effective_rate(
        rates: &HashMap<(Currency, Currency), BTreeMap<NaiveDate, Decimal>>,
        from: Currency,
        to: Currency,
        as_of: NaiveDate,
    ) -> Option<Decimal> {
        let latest = |pair: (Currency, Currency)| {
            rates
                .get(&pair)
                .and_then(|by_date| by_date.range(..=as_of).next_back())
                .map(|(_, rate)| *rate)
        };

        latest((from, to)).or_else(|| {
            latest((to, from))
                .filter(|inverse| !inverse.is_zero())
                .and_then(|inverse| Decimal::ONE.checked_div(inverse))
        })
    }
}

impl CurrencyConverter for InMemoryRateTable {
    fn convert(
        &self,
        amount: Money,
        to: Currency,
        as_of: NaiveDate,
    ) -> Result<Conversion, ConversionError> {
        if amount.currency == to {
            return Ok(Conversion::identity(amount, as_of));
        }

        let rates = self
            .rates
            .read()
            .map_err(|_| ConversionError::Backend("rate table lock poisoned".to_string()))?;

        let rate = Self::effective_rate(&rates, amount.currency, to, as_of).ok_or(
            ConversionError::RateUnavailable {
                from: amount.currency,
                to,
                as_of,
            },
        )?;

        Conversion::at_rate(amount, to, rate, as_of)
            .map_err(|e| ConversionError::Backend(e.to_string()))
    }
}

//! Money, currencies, and frozen conversion records.
//!
//! Amounts are always paired with their currency. Moving an amount into
//! another currency is never implicit arithmetic: it produces a `Conversion`
//! that records the source, the result, the rate and the date it applied to.

use core::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use bursar_core::{DomainError, DomainResult, ValueObject};

/// Currencies the ledger knows how to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Ves,
    Eur,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Ves, Currency::Eur];

    /// ISO 4217 code.
    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Ves => "VES",
            Currency::Eur => "EUR",
        }
    }

    /// Number of decimal places in the currency's minor unit.
    pub fn minor_units(self) -> u32 {
        2
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "VES" => Ok(Currency::Ves),
            "EUR" => Ok(Currency::Eur),
            other => Err(DomainError::unsupported_currency(format!("'{other}'"))),
        }
    }
}

/// An amount in a specific currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl ValueObject for Money {}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    /// Build a strictly positive amount, rejecting zero and negatives.
    pub fn positive(amount: Decimal, currency: Currency) -> DomainResult<Self> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::invalid_amount(format!(
                "amount must be positive, got {amount} {currency}"
            )));
        }
        Ok(Self::new(amount, currency))
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Round half away from zero to the currency's minor unit.
    pub fn round_to_minor_units(self) -> Self {
        Self::new(
            self.amount.round_dp_with_strategy(
                self.currency.minor_units(),
                RoundingStrategy::MidpointAwayFromZero,
            ),
            self.currency,
        )
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// A point-in-time conversion, frozen onto the record that needed it.
///
/// `settled == source * rate`, rounded to the settled currency's minor unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    pub source: Money,
    pub settled: Money,
    /// Units of `settled.currency` per unit of `source.currency`.
    pub rate: Decimal,
    pub as_of: NaiveDate,
}

impl ValueObject for Conversion {}

impl Conversion {
    /// Apply `rate` to `source`, landing in `target`.
    ///
    /// Fails with `InvalidAmount` if the product does not fit in a `Decimal`.
    pub fn at_rate(
        source: Money,
        target: Currency,
        rate: Decimal,
        as_of: NaiveDate,
    ) -> DomainResult<Self> {
        let product = source.amount.checked_mul(rate).ok_or_else(|| {
            DomainError::invalid_amount(format!(
                "{source} at rate {rate} exceeds the representable range"
            ))
        })?;
        Ok(Self {
            source,
            settled: Money::new(product, target).round_to_minor_units(),
            rate,
            as_of,
        })
    }

    /// Same-currency conversion (rate 1).
    pub fn identity(source: Money, as_of: NaiveDate) -> Self {
        Self {
            source,
            settled: source.round_to_minor_units(),
            rate: Decimal::ONE,
            as_of,
        }
    }

    pub fn settled_amount(&self) -> Decimal {
        self.settled.amount
    }

    pub fn settlement_currency(&self) -> Currency {
        self.settled.currency
    }
}

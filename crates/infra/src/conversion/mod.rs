//! Currency conversion boundary.
//!
//! The ledger never multiplies by an exchange rate itself; it asks a
//! `CurrencyConverter` and freezes the returned `Conversion` onto the record.

pub mod rate_table;
pub mod timeout;

pub use rate_table::InMemoryRateTable;
pub use timeout::TimeoutConverter;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

use bursar_expenses::{Conversion, Currency, Money};

/// Conversion service failure. Every variant surfaces to callers as
/// `ConversionUnavailable`; the distinction is kept for logs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("no {from}->{to} rate effective on or before {as_of}")]
    RateUnavailable {
        from: Currency,
        to: Currency,
        as_of: NaiveDate,
    },

    #[error("conversion timed out after {0:?}")]
    Timeout(Duration),

    #[error("conversion backend failed: {0}")]
    Backend(String),
}

/// Point-in-time currency conversion service.
///
/// Implementations must be deterministic for a given `(amount, to, as_of)`
/// once a rate is published, and must round the settled amount to the target
/// currency's minor unit (see `Conversion::at_rate`).
pub trait CurrencyConverter: Send + Sync {
    fn convert(
        &self,
        amount: Money,
        to: Currency,
        as_of: NaiveDate,
    ) -> Result<Conversion, ConversionError>;
}

impl<C> CurrencyConverter for Arc<C>
where
    C: CurrencyConverter + ?Sized,
{
    fn convert(
        &self,
        amount: Money,
        to: Currency,
        as_of: NaiveDate,
    ) -> Result<Conversion, ConversionError> {
        (**self).convert(amount, to, as_of)
    }
}

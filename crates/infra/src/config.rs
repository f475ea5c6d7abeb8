//! Ledger configuration loading and representation.
//!
//! Sources, in order of preference:
//! - a JSON document (`LedgerConfig::from_json_str`)
//! - `BURSAR_*` environment variables (`LedgerConfig::from_env`)
//! - built-in defaults
//!
//! Malformed environment values are logged and replaced by the default;
//! a malformed JSON document is an error.

use core::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bursar_expenses::{CancellationPolicy, Currency, PaymentPolicy};
use bursar_observability::LogFormat;

pub const ENV_SETTLEMENT_CURRENCY: &str = "BURSAR_SETTLEMENT_CURRENCY";
pub const ENV_SUPPORTED_CURRENCIES: &str = "BURSAR_SUPPORTED_CURRENCIES";
pub const ENV_PAID_TOLERANCE: &str = "BURSAR_PAID_TOLERANCE";
pub const ENV_CANCELLATION_POLICY: &str = "BURSAR_CANCELLATION_POLICY";
pub const ENV_CONVERSION_TIMEOUT_MS: &str = "BURSAR_CONVERSION_TIMEOUT_MS";
pub const ENV_LOG_FORMAT: &str = "BURSAR_LOG_FORMAT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse ledger config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid ledger config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Currency all balances are reconciled in.
    pub settlement_currency: Currency,
    /// Currencies expenses may be billed in and payments made in.
    pub supported_currencies: Vec<Currency>,
    pub paid_tolerance: Decimal,
    pub cancellation_policy: CancellationPolicy,
    pub conversion_timeout_ms: u64,
    pub log_format: LogFormat,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let policy = PaymentPolicy::default();
        Self {
            settlement_currency: Currency::Ves,
            supported_currencies: Currency::ALL.to_vec(),
            paid_tolerance: policy.paid_tolerance,
            cancellation_policy: policy.cancellation,
            conversion_timeout_ms: 2_000,
            log_format: LogFormat::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `BURSAR_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment, or a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            settlement_currency: parse_or(
                &lookup,
                ENV_SETTLEMENT_CURRENCY,
                defaults.settlement_currency,
            ),
            supported_currencies: lookup(ENV_SUPPORTED_CURRENCIES)
                .map(|raw| parse_currency_list(&raw, &defaults.supported_currencies))
                .unwrap_or(defaults.supported_currencies),
            paid_tolerance: parse_or(&lookup, ENV_PAID_TOLERANCE, defaults.paid_tolerance),
            cancellation_policy: lookup(ENV_CANCELLATION_POLICY)
                .map(|raw| parse_cancellation_policy(&raw, defaults.cancellation_policy))
                .unwrap_or(defaults.cancellation_policy),
            conversion_timeout_ms: parse_or(
                &lookup,
                ENV_CONVERSION_TIMEOUT_MS,
                defaults.conversion_timeout_ms,
            ),
            log_format: parse_or(&lookup, ENV_LOG_FORMAT, defaults.log_format),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supported_currencies.is_empty() {
            return Err(ConfigError::Invalid(
                "supported_currencies must not be empty".to_string(),
            ));
        }
        if self.paid_tolerance < Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "paid_tolerance must not be negative, got {}",
                self.paid_tolerance
            )));
        }
        if self.conversion_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "conversion_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn payment_policy(&self) -> PaymentPolicy {
        PaymentPolicy {
            paid_tolerance: self.paid_tolerance,
            cancellation: self.cancellation_policy,
        }
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_millis(self.conversion_timeout_ms)
    }

    pub fn supports(&self, currency: Currency) -> bool {
        self.supported_currencies.contains(&currency)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + core::fmt::Debug,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            tracing::warn!(key, value = %raw, error = %e, ?default, "ignoring malformed setting");
            default
        }),
    }
}

fn parse_currency_list(raw: &str, default: &[Currency]) -> Vec<Currency> {
    let parsed: Result<Vec<Currency>, _> = raw
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(Currency::from_str)
        .collect();

    match parsed {
        Ok(list) if !list.is_empty() => list,
        Ok(_) => default.to_vec(),
        Err(e) => {
            tracing::warn!(
                key = ENV_SUPPORTED_CURRENCIES,
                value = %raw,
                error = %e,
                "ignoring malformed setting"
            );
            default.to_vec()
        }
    }
}

fn parse_cancellation_policy(raw: &str, default: CancellationPolicy) -> CancellationPolicy {
    match raw.trim().to_ascii_lowercase().as_str() {
        "allow_partially_paid" => CancellationPolicy::AllowPartiallyPaid,
        "unpaid_only" => CancellationPolicy::UnpaidOnly,
        other => {
            tracing::warn!(
                key = ENV_CANCELLATION_POLICY,
                value = other,
                ?default,
                "ignoring malformed setting"
            );
            default
        }
    }
}

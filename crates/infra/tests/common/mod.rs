#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value as JsonValue;

use bursar_core::ExpenseId;
use bursar_events::{EventEnvelope, InMemoryEventBus};
use bursar_expenses::{Currency, ExpenseMetadata, PaymentDetails};
use bursar_infra::{
    CurrencyConverter, ExpenseLedger, InMemoryLedgerStore, InMemoryRateTable, LedgerConfig,
    LedgerStore, NewExpense, NewPayment,
};

pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type TestLedger<S = Arc<InMemoryLedgerStore>, C = Arc<InMemoryRateTable>> =
    ExpenseLedger<S, C, Bus>;

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

/// USD settlement, every currency enabled, default policy.
pub fn usd_config() -> LedgerConfig {
    LedgerConfig {
        settlement_currency: Currency::Usd,
        ..LedgerConfig::default()
    }
}

/// EUR→USD at 1.10 and USD→VES at 36.20, both effective from Jan 1st.
pub fn rates() -> Arc<InMemoryRateTable> {
    Arc::new(
        InMemoryRateTable::new()
            .with_rate(Currency::Eur, Currency::Usd, date(1), dec!(1.10))
            .with_rate(Currency::Usd, Currency::Ves, date(1), dec!(36.20)),
    )
}

pub fn ledger_with<S, C>(
    store: S,
    converter: C,
    config: LedgerConfig,
) -> (ExpenseLedger<S, C, Bus>, Bus)
where
    S: LedgerStore,
    C: CurrencyConverter + 'static,
{
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let ledger = ExpenseLedger::new(store, converter, Arc::clone(&bus), config);
    (ledger, bus)
}

pub fn usd_ledger() -> (TestLedger, Bus, Arc<InMemoryRateTable>) {
    let rates = rates();
    let (ledger, bus) = ledger_with(
        Arc::new(InMemoryLedgerStore::new()),
        Arc::clone(&rates),
        usd_config(),
    );
    (ledger, bus, rates)
}

pub fn new_expense(amount: Decimal, currency: Currency) -> NewExpense {
    NewExpense {
        amount,
        currency,
        reference_date: date(1),
        metadata: ExpenseMetadata {
            description: "classroom supplies".to_string(),
            ..ExpenseMetadata::default()
        },
    }
}

pub fn payment(amount: Decimal, currency: Currency) -> NewPayment {
    NewPayment {
        amount,
        currency,
        payment_date: date(10),
        details: PaymentDetails::default(),
    }
}

pub fn create_usd<S, C>(ledger: &ExpenseLedger<S, C, Bus>, amount: Decimal) -> ExpenseId
where
    S: LedgerStore,
    C: CurrencyConverter + 'static,
{
    ledger
        .create_expense(new_expense(amount, Currency::Usd))
        .unwrap()
        .id_typed()
}

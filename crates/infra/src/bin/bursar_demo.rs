//! Walks a small school-expense scenario through the ledger and logs each step.
//!
//! Configuration comes from `BURSAR_*` environment variables; the settlement
//! currency defaults to USD here so the amounts read naturally.

use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::NaiveDate;
use rust_decimal::Decimal;

use bursar_events::{EventBus, EventEnvelope, InMemoryEventBus};
use bursar_expenses::{Currency, ExpenseMetadata, PaymentDetails, PaymentMethod};
use bursar_infra::{
    ExpenseLedger, InMemoryLedgerStore, InMemoryRateTable, LedgerConfig, LedgerError, NewExpense,
    NewPayment, config::ENV_SETTLEMENT_CURRENCY,
};

fn main() -> anyhow::Result<()> {
    let config = LedgerConfig::from_lookup(|key| match key {
        ENV_SETTLEMENT_CURRENCY => std::env::var(key).ok().or_else(|| Some("USD".to_string())),
        _ => std::env::var(key).ok(),
    })
    .context("loading ledger configuration")?;
    bursar_observability::init_with(config.log_format);

    let day = |d: u32| NaiveDate::from_ymd_opt(2024, 3, d).context("invalid demo date");

    let rates = InMemoryRateTable::new()
        .with_rate(Currency::Eur, Currency::Usd, day(1)?, Decimal::new(110, 2))
        .with_rate(Currency::Usd, Currency::Ves, day(1)?, Decimal::new(3620, 2));
    let bus = Arc::new(InMemoryEventBus::<EventEnvelope<serde_json::Value>>::new());
    let events = bus.subscribe();
    let ledger = ExpenseLedger::new(InMemoryLedgerStore::new(), rates, Arc::clone(&bus), config);

    let books = ledger.create_expense(NewExpense {
        amount: Decimal::new(100, 0),
        currency: Currency::Usd,
        reference_date: day(1)?,
        metadata: ExpenseMetadata {
            description: "Library books".to_string(),
            ..ExpenseMetadata::default()
        },
    })?;
    let books_id = books.id_typed();

    for (amount, d) in [(Decimal::new(60, 0), 5), (Decimal::new(50, 0), 12)] {
        let receipt = ledger.record_payment(
            books_id,
            NewPayment {
                amount,
                currency: Currency::Usd,
                payment_date: day(d)?,
                details: PaymentDetails {
                    method: PaymentMethod::BankTransfer,
                    ..PaymentDetails::default()
                },
            },
        )?;
        let pending = ledger.compute_pending_balance(books_id)?;
        tracing::info!(
            expense_id = %books_id,
            status = %receipt.expense.status(),
            pending = %pending,
            "books expense after payment"
        );
    }

    let uniforms = ledger.create_expense(NewExpense {
        amount: Decimal::new(50, 0),
        currency: Currency::Eur,
        reference_date: day(1)?,
        metadata: ExpenseMetadata {
            description: "Sports uniforms".to_string(),
            ..ExpenseMetadata::default()
        },
    })?;
    let uniforms_id = uniforms.id_typed();
    ledger.cancel_expense(uniforms_id, Some("order withdrawn".to_string()))?;

    match ledger.record_payment(
        uniforms_id,
        NewPayment {
            amount: Decimal::new(10, 0),
            currency: Currency::Eur,
            payment_date: day(2)?,
            details: PaymentDetails::default(),
        },
    ) {
        Err(LedgerError::InvalidState(reason)) => {
            tracing::info!(
                expense_id = %uniforms_id,
                %reason,
                "payment on cancelled expense rejected"
            )
        }
        Ok(_) => bail!("payment on a cancelled expense was accepted"),
        Err(other) => return Err(other.into()),
    }

    tracing::info!(published = events.drain().len(), "demo finished");
    Ok(())
}

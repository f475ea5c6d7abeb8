//! End-to-end tests for the ledger engine:
//! request → conversion → aggregate → store → bus.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal_macros::dec;

use bursar_core::{ExpectedVersion, ExpenseId, SupplierId};
use bursar_events::EventBus;
use bursar_expenses::{
    CancellationPolicy, Conversion, Currency, Expense, ExpenseMetadata, Money, Payment,
    PaymentStatus,
};
use bursar_infra::{
    ConversionError, CurrencyConverter, ExpenseFilter, ExpenseRevision, InMemoryLedgerStore,
    InMemoryRateTable, LedgerConfig, LedgerError, LedgerStore, LedgerStoreError,
};

use common::*;

#[test]
fn created_expense_is_pending_with_nothing_paid() {
    let (ledger, _bus, _rates) = usd_ledger();

    let expense = ledger
        .create_expense(new_expense(dec!(100), Currency::Usd))
        .unwrap();

    assert_eq!(expense.status(), PaymentStatus::Pending);
    assert_eq!(expense.total_paid_settlement(), dec!(0));
    assert_eq!(expense.settlement_equivalent_at_creation(), dec!(100));
    assert_eq!(
        ledger.compute_pending_balance(expense.id_typed()).unwrap(),
        Money::new(dec!(100), Currency::Usd)
    );
    assert_eq!(ledger.get_expense(expense.id_typed()).unwrap(), expense);
}

#[test]
fn partial_then_covering_payment() {
    let (ledger, _bus, _rates) = usd_ledger();
    let id = create_usd(&ledger, dec!(100));

    let first = ledger.record_payment(id, payment(dec!(60), Currency::Usd)).unwrap();
    assert_eq!(first.expense.status(), PaymentStatus::PartiallyPaid);
    assert_eq!(first.payment.amount_settlement_equivalent(), dec!(60));
    assert_eq!(ledger.compute_pending_balance(id).unwrap().amount, dec!(40));

    let second = ledger.record_payment(id, payment(dec!(50), Currency::Usd)).unwrap();
    assert_eq!(second.expense.status(), PaymentStatus::Paid);
    assert_eq!(second.expense.total_paid_settlement(), dec!(110));
    assert_eq!(second.expense.overpaid_by(), dec!(10));
    assert_eq!(ledger.compute_pending_balance(id).unwrap().amount, dec!(0));

    let payments = ledger.list_payments(id).unwrap();
    assert_eq!(
        payments.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![first.payment.id, second.payment.id]
    );
}

#[test]
fn exact_split_reaches_paid() {
    let (ledger, _bus, _rates) = usd_ledger();
    let id = create_usd(&ledger, dec!(100));

    for amount in [dec!(33.33), dec!(33.33)] {
        let receipt = ledger.record_payment(id, payment(amount, Currency::Usd)).unwrap();
        assert_eq!(receipt.expense.status(), PaymentStatus::PartiallyPaid);
    }
    let last = ledger.record_payment(id, payment(dec!(33.34), Currency::Usd)).unwrap();

    assert_eq!(last.expense.status(), PaymentStatus::Paid);
    assert_eq!(last.expense.payment_count(), 3);
    assert_eq!(ledger.compute_pending_balance(id).unwrap().amount, dec!(0));
}

#[test]
fn shortfall_within_tolerance_counts_as_paid() {
    let (ledger, _bus, _rates) = usd_ledger();
    let id = create_usd(&ledger, dec!(100));

    let receipt = ledger.record_payment(id, payment(dec!(99.99), Currency::Usd)).unwrap();

    assert_eq!(receipt.expense.status(), PaymentStatus::Paid);
    assert_eq!(ledger.compute_pending_balance(id).unwrap().amount, dec!(0.01));
}

#[test]
fn foreign_currency_expense_cancelled_then_paid_is_rejected() {
    let (ledger, _bus, _rates) = usd_ledger();

    let expense = ledger
        .create_expense(new_expense(dec!(50), Currency::Eur))
        .unwrap();
    let id = expense.id_typed();
    assert_eq!(expense.settlement_equivalent_at_creation(), dec!(55.00));
    assert_eq!(expense.settlement().unwrap().rate, dec!(1.10));

    let cancelled = ledger.cancel_expense(id, Some("trip called off".into())).unwrap();
    assert_eq!(cancelled.status(), PaymentStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason(), Some("trip called off"));

    let err = ledger.record_payment(id, payment(dec!(10), Currency::Eur)).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));

    let stored = ledger.get_expense(id).unwrap();
    assert_eq!(stored.total_paid_settlement(), dec!(0));
    assert!(ledger.list_payments(id).unwrap().is_empty());
}

#[test]
fn payment_converts_at_its_own_date_and_stays_frozen() {
    let (ledger, _bus, rates) = usd_ledger();
    let id = create_usd(&ledger, dec!(200));

    let first = ledger.record_payment(id, payment(dec!(100), Currency::Eur)).unwrap();
    assert_eq!(first.payment.settlement.settled, Money::new(dec!(110.00), Currency::Usd));
    assert_eq!(first.payment.settlement.as_of, date(10));

    // A later rate applies to later payments only.
    rates.set_rate(Currency::Eur, Currency::Usd, date(15), dec!(1.20));
    let mut later = payment(dec!(50), Currency::Eur);
    later.payment_date = date(20);
    let second = ledger.record_payment(id, later).unwrap();
    assert_eq!(second.payment.amount_settlement_equivalent(), dec!(60.00));

    let payments = ledger.list_payments(id).unwrap();
    assert_eq!(payments[0].amount_settlement_equivalent(), dec!(110.00));
    assert_eq!(ledger.get_expense(id).unwrap().total_paid_settlement(), dec!(170.00));
}

#[test]
fn payments_on_paid_expense_are_rejected_without_change() {
    let (ledger, _bus, _rates) = usd_ledger();
    let id = create_usd(&ledger, dec!(100));
    ledger.record_payment(id, payment(dec!(100), Currency::Usd)).unwrap();

    let err = ledger.record_payment(id, payment(dec!(5), Currency::Usd)).unwrap_err();

    assert!(matches!(err, LedgerError::InvalidState(_)));
    let expense = ledger.get_expense(id).unwrap();
    assert_eq!(expense.total_paid_settlement(), dec!(100));
    assert_eq!(ledger.list_payments(id).unwrap().len(), 1);
}

#[test]
fn paid_and_cancelled_expenses_cannot_be_cancelled() {
    let (ledger, _bus, _rates) = usd_ledger();

    let paid = create_usd(&ledger, dec!(10));
    ledger.record_payment(paid, payment(dec!(10), Currency::Usd)).unwrap();
    assert!(matches!(
        ledger.cancel_expense(paid, None),
        Err(LedgerError::InvalidState(_))
    ));

    let once = create_usd(&ledger, dec!(10));
    ledger.cancel_expense(once, None).unwrap();
    assert!(matches!(
        ledger.cancel_expense(once, None),
        Err(LedgerError::InvalidState(_))
    ));
}

#[test]
fn partially_paid_cancellation_follows_policy() {
    let (ledger, _bus, _rates) = usd_ledger();
    let id = create_usd(&ledger, dec!(100));
    ledger.record_payment(id, payment(dec!(30), Currency::Usd)).unwrap();

    let cancelled = ledger.cancel_expense(id, None).unwrap();
    assert_eq!(cancelled.status(), PaymentStatus::Cancelled);
    assert_eq!(cancelled.total_paid_settlement(), dec!(30));
    assert_eq!(ledger.list_payments(id).unwrap().len(), 1);

    let strict = LedgerConfig {
        cancellation_policy: CancellationPolicy::UnpaidOnly,
        ..usd_config()
    };
    let (ledger, _bus) = ledger_with(InMemoryLedgerStore::new(), rates(), strict);
    let id = create_usd(&ledger, dec!(100));
    ledger.record_payment(id, payment(dec!(30), Currency::Usd)).unwrap();

    let err = ledger.cancel_expense(id, None).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));
    assert_eq!(ledger.get_expense(id).unwrap().status(), PaymentStatus::PartiallyPaid);
}

#[test]
fn amounts_and_currencies_are_validated_before_anything_is_written() {
    let config = LedgerConfig {
        supported_currencies: vec![Currency::Usd, Currency::Ves],
        ..usd_config()
    };
    let (ledger, _bus) = ledger_with(InMemoryLedgerStore::new(), rates(), config);

    for amount in [dec!(0), dec!(-5)] {
        assert!(matches!(
            ledger.create_expense(new_expense(amount, Currency::Usd)),
            Err(LedgerError::InvalidAmount(_))
        ));
    }
    assert!(matches!(
        ledger.create_expense(new_expense(dec!(10), Currency::Eur)),
        Err(LedgerError::UnsupportedCurrency(_))
    ));
    assert!(ledger.list_expenses(&ExpenseFilter::default()).unwrap().is_empty());

    let id = create_usd(&ledger, dec!(100));
    assert!(matches!(
        ledger.record_payment(id, payment(dec!(0), Currency::Usd)),
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        ledger.record_payment(id, payment(dec!(10), Currency::Eur)),
        Err(LedgerError::UnsupportedCurrency(_))
    ));
    assert_eq!(ledger.get_expense(id).unwrap().total_paid_settlement(), dec!(0));
}

#[test]
fn missing_rate_is_conversion_unavailable_and_writes_nothing() {
    let (ledger, bus) =
        ledger_with(InMemoryLedgerStore::new(), InMemoryRateTable::new(), usd_config());
    let events = bus.subscribe();

    let err = ledger
        .create_expense(new_expense(dec!(20), Currency::Eur))
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::ConversionUnavailable(ConversionError::RateUnavailable { .. })
    ));
    assert!(ledger.list_expenses(&ExpenseFilter::default()).unwrap().is_empty());

    let id = create_usd(&ledger, dec!(100));
    events.drain();
    let err = ledger.record_payment(id, payment(dec!(20), Currency::Eur)).unwrap_err();
    assert!(matches!(err, LedgerError::ConversionUnavailable(_)));

    let expense = ledger.get_expense(id).unwrap();
    assert_eq!(expense.status(), PaymentStatus::Pending);
    assert_eq!(expense.total_paid_settlement(), dec!(0));
    assert!(ledger.list_payments(id).unwrap().is_empty());
    assert!(events.drain().is_empty());
}

struct StalledConverter;

impl CurrencyConverter for StalledConverter {
    fn convert(
        &self,
        amount: Money,
        _to: Currency,
        as_of: NaiveDate,
    ) -> Result<Conversion, ConversionError> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(Conversion::identity(amount, as_of))
    }
}

#[test]
fn slow_conversion_times_out() {
    let config = LedgerConfig {
        conversion_timeout_ms: 20,
        ..usd_config()
    };
    let (ledger, _bus) = ledger_with(InMemoryLedgerStore::new(), StalledConverter, config);

    let err = ledger
        .create_expense(new_expense(dec!(20), Currency::Usd))
        .unwrap_err();

    assert!(matches!(
        err,
        LedgerError::ConversionUnavailable(ConversionError::Timeout(_))
    ));
    assert!(ledger.list_expenses(&ExpenseFilter::default()).unwrap().is_empty());
}

#[test]
fn unknown_expense_is_not_found_everywhere() {
    let (ledger, _bus, _rates) = usd_ledger();
    let missing = ExpenseId::new();

    assert!(matches!(ledger.get_expense(missing), Err(LedgerError::NotFound)));
    assert!(matches!(ledger.list_payments(missing), Err(LedgerError::NotFound)));
    assert!(matches!(ledger.compute_pending_balance(missing), Err(LedgerError::NotFound)));
    assert!(matches!(ledger.cancel_expense(missing, None), Err(LedgerError::NotFound)));
    assert!(matches!(
        ledger.record_payment(missing, payment(dec!(1), Currency::Usd)),
        Err(LedgerError::NotFound)
    ));
}

#[test]
fn revision_reconverts_until_the_first_payment() {
    let (ledger, _bus, _rates) = usd_ledger();
    let id = create_usd(&ledger, dec!(100));

    let revised = ledger
        .revise_expense(
            id,
            ExpenseRevision {
                amount: dec!(80),
                currency: Currency::Eur,
                reference_date: date(3),
            },
        )
        .unwrap();
    assert_eq!(revised.amount(), Money::new(dec!(80), Currency::Eur));
    assert_eq!(revised.settlement_equivalent_at_creation(), dec!(88.00));
    assert_eq!(revised.status(), PaymentStatus::Pending);

    ledger.record_payment(id, payment(dec!(10), Currency::Usd)).unwrap();
    let err = ledger
        .revise_expense(
            id,
            ExpenseRevision {
                amount: dec!(70),
                currency: Currency::Usd,
                reference_date: date(3),
            },
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));
    assert_eq!(ledger.get_expense(id).unwrap().amount(), Money::new(dec!(80), Currency::Eur));
}

#[test]
fn committed_mutations_are_published_in_sequence() {
    let (ledger, bus, _rates) = usd_ledger();
    let events = bus.subscribe();

    let id = create_usd(&ledger, dec!(100));
    ledger.record_payment(id, payment(dec!(40), Currency::Usd)).unwrap();
    ledger.cancel_expense(id, None).unwrap();

    let published = events.drain();
    let summary: Vec<(&str, u64)> = published
        .iter()
        .map(|e| (e.event_type(), e.sequence_number()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("ledger.expense.created", 1),
            ("ledger.expense.payment_recorded", 2),
            ("ledger.expense.cancelled", 3),
        ]
    );
    assert!(published.iter().all(|e| e.aggregate_id() == id));
    assert!(published.iter().all(|e| e.aggregate_type() == "ledger.expense"));
    assert_eq!(published[1].payload()["PaymentRecorded"]["new_status"], "partially_paid");
}

/// Delegates to an in-memory store but can be switched to fail every write.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryLedgerStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<(), LedgerStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerStoreError::Unavailable("disk full".to_string()));
        }
        Ok(())
    }
}

impl LedgerStore for FlakyStore {
    fn get_expense(&self, id: ExpenseId) -> Result<Option<Expense>, LedgerStoreError> {
        self.inner.get_expense(id)
    }

    fn save_expense(
        &self,
        expense: &Expense,
        expected: ExpectedVersion,
    ) -> Result<(), LedgerStoreError> {
        self.check()?;
        self.inner.save_expense(expense, expected)
    }

    fn save_expense_and_payment(
        &self,
        expense: &Expense,
        payment: &Payment,
        expected: ExpectedVersion,
    ) -> Result<(), LedgerStoreError> {
        self.check()?;
        self.inner.save_expense_and_payment(expense, payment, expected)
    }

    fn list_expenses(&self) -> Result<Vec<Expense>, LedgerStoreError> {
        self.inner.list_expenses()
    }

    fn list_payments(&self, expense_id: ExpenseId) -> Result<Vec<Payment>, LedgerStoreError> {
        self.inner.list_payments(expense_id)
    }
}

#[test]
fn store_failure_surfaces_and_publishes_nothing() {
    let store = Arc::new(FlakyStore::default());
    let (ledger, bus) = ledger_with(Arc::clone(&store), rates(), usd_config());
    let events = bus.subscribe();

    let id = create_usd(&ledger, dec!(100));
    events.drain();
    store.fail_writes.store(true, Ordering::SeqCst);

    let err = ledger.record_payment(id, payment(dec!(25), Currency::Usd)).unwrap_err();
    assert!(matches!(err, LedgerError::Store(LedgerStoreError::Unavailable(_))));
    assert!(matches!(ledger.cancel_expense(id, None), Err(LedgerError::Store(_))));

    assert!(events.drain().is_empty());
    let expense = ledger.get_expense(id).unwrap();
    assert_eq!(expense.status(), PaymentStatus::Pending);
    assert_eq!(expense.total_paid_settlement(), dec!(0));
    assert!(ledger.list_payments(id).unwrap().is_empty());
}

#[test]
fn list_filters_by_status_and_supplier() {
    let (ledger, _bus, _rates) = usd_ledger();
    let supplier = SupplierId::new();

    let mut tagged = new_expense(dec!(40), Currency::Usd);
    tagged.metadata = ExpenseMetadata {
        description: "bus rental".to_string(),
        supplier_id: Some(supplier),
        ..ExpenseMetadata::default()
    };
    let tagged = ledger.create_expense(tagged).unwrap().id_typed();
    let paid = create_usd(&ledger, dec!(10));
    ledger.record_payment(paid, payment(dec!(10), Currency::Usd)).unwrap();
    let _pending = create_usd(&ledger, dec!(30));

    let all = ledger.list_expenses(&ExpenseFilter::default()).unwrap();
    assert_eq!(all.len(), 3);

    let by_supplier = ledger
        .list_expenses(&ExpenseFilter {
            supplier_id: Some(supplier),
            ..ExpenseFilter::default()
        })
        .unwrap();
    assert_eq!(by_supplier.iter().map(|e| e.id_typed()).collect::<Vec<_>>(), vec![tagged]);

    let pending = ledger
        .list_expenses(&ExpenseFilter {
            status: Some(PaymentStatus::Pending),
            ..ExpenseFilter::default()
        })
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|e| e.id_typed() != paid));
}

mod properties {
    use super::*;
    use bursar_expenses::derive_status;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Whatever the payment sequence, the stored total is the sum of the
        /// accepted payments and the status is the one those totals imply.
        #[test]
        fn totals_and_status_follow_accepted_payments(
            cents in prop::collection::vec(1_i64..5_000, 1..12),
            eur_mask in prop::collection::vec(any::<bool>(), 12),
        ) {
            let (ledger, _bus, _rates) = usd_ledger();
            let id = create_usd(&ledger, dec!(200));

            for (i, c) in cents.iter().enumerate() {
                let currency = if eur_mask[i] { Currency::Eur } else { Currency::Usd };
                match ledger.record_payment(id, payment(Decimal::new(*c, 2), currency)) {
                    Ok(_) | Err(LedgerError::InvalidState(_)) => {}
                    Err(other) => prop_assert!(false, "unexpected error: {other}"),
                }
            }

            let expense = ledger.get_expense(id).unwrap();
            let paid: Decimal = ledger
                .list_payments(id)
                .unwrap()
                .iter()
                .map(Payment::amount_settlement_equivalent)
                .sum();
            prop_assert_eq!(expense.total_paid_settlement(), paid);
            prop_assert_eq!(
                expense.status(),
                derive_status(dec!(200), paid, dec!(0.01))
            );
            prop_assert_eq!(
                ledger.compute_pending_balance(id).unwrap().amount,
                (dec!(200) - paid).max(Decimal::ZERO)
            );
        }
    }
}

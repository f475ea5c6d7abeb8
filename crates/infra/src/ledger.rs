//! Expense ledger engine (application-level orchestration).
//!
//! The single authority for an expense's `payment_status` and
//! `total_paid_settlement`. Every mutation runs the same pipeline:
//!
//! ```text
//! request
//!   ↓
//! 1. Pre-checks (amount, currency, lifecycle state)
//!   ↓
//! 2. Take the expense lock (existing expenses only)
//!   ↓
//! 3. Load the expense from the store
//!   ↓
//! 4. Convert to the settlement currency (bounded by a timeout)
//!   ↓
//! 5. Decide + evolve (`execute`, pure)
//!   ↓
//! 6. Persist (atomic, version-checked)
//!   ↓
//! 7. Publish events to the bus (best effort)
//! ```
//!
//! A failure at any step before 6 writes nothing. A failure at step 7 is
//! logged; the committed state stands.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

use bursar_core::{
    AggregateRoot, CategoryId, DomainError, ExpectedVersion, ExpenseId, PaymentId, SupplierId,
};
use bursar_events::{Event, EventBus, EventEnvelope, execute};
use bursar_expenses::{
    CancelExpense, Conversion, CreateExpense, Currency, Expense, ExpenseCommand, ExpenseEvent,
    ExpenseMetadata, Money, Payment, PaymentDetails, PaymentStatus, RecordPayment, ReviseExpense,
};

use crate::config::LedgerConfig;
use crate::conversion::{ConversionError, CurrencyConverter, TimeoutConverter};
use crate::ledger_store::{LedgerStore, LedgerStoreError};
use crate::locks::ExpenseLocks;

/// `aggregate_type` stamped on every published envelope.
pub const AGGREGATE_TYPE: &str = "ledger.expense";

/// Error returned by every engine operation.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("expense not found")]
    NotFound,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// The conversion service failed, timed out, or had no rate.
    #[error("currency conversion unavailable: {0}")]
    ConversionUnavailable(#[source] ConversionError),

    /// Another writer committed first. The caller decides whether to retry.
    #[error("concurrent update conflict: {0}")]
    ConcurrentUpdateConflict(String),

    #[error("ledger store failure: {0}")]
    Store(#[source] LedgerStoreError),
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidAmount(msg) => LedgerError::InvalidAmount(msg),
            DomainError::UnsupportedCurrency(msg) => LedgerError::UnsupportedCurrency(msg),
            DomainError::InvalidState(msg) => LedgerError::InvalidState(msg),
            DomainError::Validation(msg) => LedgerError::Validation(msg),
            DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::NotFound => LedgerError::NotFound,
            DomainError::Conflict(msg) => LedgerError::ConcurrentUpdateConflict(msg),
        }
    }
}

impl From<LedgerStoreError> for LedgerError {
    fn from(value: LedgerStoreError) -> Self {
        match value {
            LedgerStoreError::Concurrency(msg) => LedgerError::ConcurrentUpdateConflict(msg),
            other => LedgerError::Store(other),
        }
    }
}

impl From<ConversionError> for LedgerError {
    fn from(value: ConversionError) -> Self {
        LedgerError::ConversionUnavailable(value)
    }
}

/// Input for `create_expense`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpense {
    pub amount: Decimal,
    pub currency: Currency,
    /// Date whose exchange rate fixes the settlement equivalent.
    pub reference_date: NaiveDate,
    pub metadata: ExpenseMetadata,
}

/// Input for `revise_expense`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseRevision {
    pub amount: Decimal,
    pub currency: Currency,
    pub reference_date: NaiveDate,
}

/// Input for `record_payment`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub amount: Decimal,
    pub currency: Currency,
    pub payment_date: NaiveDate,
    pub details: PaymentDetails,
}

/// Narrows `list_expenses`. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpenseFilter {
    pub status: Option<PaymentStatus>,
    pub category_id: Option<CategoryId>,
    pub supplier_id: Option<SupplierId>,
}

impl ExpenseFilter {
    pub fn matches(&self, expense: &Expense) -> bool {
        let metadata = expense.metadata();
        self.status.is_none_or(|s| expense.status() == s)
            && self.category_id.is_none_or(|c| metadata.category_id == Some(c))
            && self.supplier_id.is_none_or(|s| metadata.supplier_id == Some(s))
    }
}

/// Result of a successful `record_payment`.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    pub expense: Expense,
    pub payment: Payment,
}

/// The expense ledger engine.
///
/// Holds its collaborators explicitly: a `LedgerStore`, a `CurrencyConverter`
/// (wrapped in the configured timeout), an `EventBus`, and the configuration.
///
/// ## Concurrency
///
/// Mutations of one expense are serialized by an expense-scoped lock held
/// from load to persist, so two payments on the same expense both land.
/// The store's optimistic version check backs this up for writers outside
/// this engine; a lost race surfaces as `ConcurrentUpdateConflict` and is
/// never retried here.
#[derive(Debug)]
pub struct ExpenseLedger<S, C, B> {
    store: S,
    converter: TimeoutConverter<C>,
    bus: B,
    config: LedgerConfig,
    locks: ExpenseLocks,
}

impl<S, C, B> ExpenseLedger<S, C, B> {
    pub fn new(store: S, converter: C, bus: B, config: LedgerConfig) -> Self {
        let converter = TimeoutConverter::new(converter, config.conversion_timeout());
        Self {
            store,
            converter,
            bus,
            config,
            locks: ExpenseLocks::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, C, B> ExpenseLedger<S, C, B>
where
    S: LedgerStore,
    C: CurrencyConverter + 'static,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Register a new expense, freezing its settlement equivalent at
    /// `reference_date`.
    pub fn create_expense(&self, request: NewExpense) -> Result<Expense, LedgerError> {
        let amount = self.accepted_amount(request.amount, request.currency)?;
        let settlement =
            self.convert(amount, self.config.settlement_currency, request.reference_date)?;

        let expense_id = ExpenseId::new();
        let mut expense = Expense::empty(expense_id);
        let command = ExpenseCommand::CreateExpense(CreateExpense {
            expense_id,
            amount,
            reference_date: request.reference_date,
            settlement,
            metadata: request.metadata,
            occurred_at: Utc::now(),
        });

        let events = execute(&mut expense, &command)?;
        self.persist(expense_id, self.store.save_expense(&expense, ExpectedVersion::Exact(0)))?;

        info!(
            %expense_id,
            amount = %expense.amount(),
            settlement_equivalent = %expense.settlement_equivalent_at_creation(),
            status = %expense.status(),
            "expense created"
        );
        self.publish(expense_id, 0, &events);
        Ok(expense)
    }

    /// Replace the billed amount of an expense that has no payments yet,
    /// re-running the conversion at the new reference date.
    pub fn revise_expense(
        &self,
        expense_id: ExpenseId,
        revision: ExpenseRevision,
    ) -> Result<Expense, LedgerError> {
        self.locks.with_expense(expense_id, || {
            let mut expense = self.load(expense_id)?;
            if !expense.can_revise() {
                return Err(LedgerError::InvalidState(format!(
                    "expense is {} with {} paid; only unpaid pending expenses can be revised",
                    expense.status(),
                    expense.total_paid_settlement()
                )));
            }

            let amount = self.accepted_amount(revision.amount, revision.currency)?;
            let settlement = self.convert(
                amount,
                self.settlement_currency_of(&expense),
                revision.reference_date,
            )?;

            let expected = expense.version();
            let command = ExpenseCommand::ReviseExpense(ReviseExpense {
                expense_id,
                amount,
                reference_date: revision.reference_date,
                settlement,
                occurred_at: Utc::now(),
            });

            let events = execute(&mut expense, &command)?;
            self.persist(
                expense_id,
                self.store
                    .save_expense(&expense, ExpectedVersion::Exact(expected)),
            )?;

            info!(
                %expense_id,
                amount = %expense.amount(),
                settlement_equivalent = %expense.settlement_equivalent_at_creation(),
                "expense revised"
            );
            self.publish(expense_id, expected, &events);
            Ok(expense)
        })
    }

    /// Record a payment against an expense and recompute its status.
    ///
    /// The payment and the updated expense are stored in one atomic write.
    pub fn record_payment(
        &self,
        expense_id: ExpenseId,
        request: NewPayment,
    ) -> Result<PaymentReceipt, LedgerError> {
        self.locks.with_expense(expense_id, || {
            let mut expense = self.load(expense_id)?;
            if !expense.can_accept_payment() {
                return Err(LedgerError::InvalidState(format!(
                    "expense is {} and accepts no further payments",
                    expense.status()
                )));
            }

            let amount = self.accepted_amount(request.amount, request.currency)?;
            let settlement = self.convert(
                amount,
                self.settlement_currency_of(&expense),
                request.payment_date,
            )?;

            let expected = expense.version();
            let command = ExpenseCommand::RecordPayment(RecordPayment {
                expense_id,
                payment_id: PaymentId::new(),
                amount_paid: amount,
                payment_date: request.payment_date,
                settlement,
                details: request.details,
                policy: self.config.payment_policy(),
                occurred_at: Utc::now(),
            });

            let events = execute(&mut expense, &command)?;
            let payment = events
                .iter()
                .find_map(ExpenseEvent::recorded_payment)
                .cloned()
                .ok_or_else(|| LedgerError::InvalidState("no payment was recorded".to_string()))?;

            self.persist(
                expense_id,
                self.store
                    .save_expense_and_payment(&expense, &payment, ExpectedVersion::Exact(expected)),
            )?;

            info!(
                %expense_id,
                payment_id = %payment.id,
                amount_paid = %payment.amount_paid,
                settled = %payment.amount_settlement_equivalent(),
                total_paid = %expense.total_paid_settlement(),
                status = %expense.status(),
                "payment recorded"
            );
            self.publish(expense_id, expected, &events);
            Ok(PaymentReceipt { expense, payment })
        })
    }

    /// Move an expense to the terminal `cancelled` state. Payments and
    /// totals are kept as they are.
    pub fn cancel_expense(
        &self,
        expense_id: ExpenseId,
        reason: Option<String>,
    ) -> Result<Expense, LedgerError> {
        self.locks.with_expense(expense_id, || {
            let mut expense = self.load(expense_id)?;

            let expected = expense.version();
            let command = ExpenseCommand::CancelExpense(CancelExpense {
                expense_id,
                reason,
                policy: self.config.payment_policy(),
                occurred_at: Utc::now(),
            });

            let events = execute(&mut expense, &command)?;
            self.persist(
                expense_id,
                self.store
                    .save_expense(&expense, ExpectedVersion::Exact(expected)),
            )?;

            info!(
                %expense_id,
                total_paid = %expense.total_paid_settlement(),
                status = %expense.status(),
                "expense cancelled"
            );
            self.publish(expense_id, expected, &events);
            Ok(expense)
        })
    }

    pub fn get_expense(&self, expense_id: ExpenseId) -> Result<Expense, LedgerError> {
        self.load(expense_id)
    }

    /// Expenses matching `filter`, oldest first.
    pub fn list_expenses(&self, filter: &ExpenseFilter) -> Result<Vec<Expense>, LedgerError> {
        Ok(self
            .store
            .list_expenses()?
            .into_iter()
            .filter(|e| e.is_created() && filter.matches(e))
            .collect())
    }

    /// Payments of one expense in recording order.
    pub fn list_payments(&self, expense_id: ExpenseId) -> Result<Vec<Payment>, LedgerError> {
        self.load(expense_id)?;
        Ok(self.store.list_payments(expense_id)?)
    }

    /// `max(0, settlement equivalent - total paid)` in the settlement currency.
    pub fn compute_pending_balance(&self, expense_id: ExpenseId) -> Result<Money, LedgerError> {
        let expense = self.load(expense_id)?;
        Ok(Money::new(
            expense.pending_balance(),
            self.settlement_currency_of(&expense),
        ))
    }

    fn load(&self, expense_id: ExpenseId) -> Result<Expense, LedgerError> {
        self.store
            .get_expense(expense_id)?
            .filter(Expense::is_created)
            .ok_or(LedgerError::NotFound)
    }

    fn accepted_amount(&self, amount: Decimal, currency: Currency) -> Result<Money, LedgerError> {
        let money = Money::positive(amount, currency)?;
        if !self.config.supports(currency) {
            return Err(LedgerError::UnsupportedCurrency(format!(
                "{currency} is not enabled for this ledger"
            )));
        }
        Ok(money)
    }

    /// An expense keeps settling in the currency it was created with, even
    /// if the configured settlement currency changes later.
    fn settlement_currency_of(&self, expense: &Expense) -> Currency {
        expense
            .settlement_currency()
            .unwrap_or(self.config.settlement_currency)
    }

    fn convert(
        &self,
        amount: Money,
        to: Currency,
        as_of: NaiveDate,
    ) -> Result<Conversion, LedgerError> {
        self.converter.convert(amount, to, as_of).map_err(|e| {
            warn!(%amount, %to, %as_of, error = %e, "currency conversion failed");
            LedgerError::from(e)
        })
    }

    fn persist(
        &self,
        expense_id: ExpenseId,
        result: Result<(), LedgerStoreError>,
    ) -> Result<(), LedgerError> {
        result.map_err(|e| {
            let err = LedgerError::from(e);
            match &err {
                LedgerError::ConcurrentUpdateConflict(msg) => {
                    warn!(%expense_id, reason = %msg, "stale write rejected")
                }
                other => warn!(%expense_id, error = %other, "ledger store write failed"),
            }
            err
        })
    }

    /// Publish committed events. Sequence numbers continue from the version
    /// the expense had before this mutation.
    fn publish(&self, expense_id: ExpenseId, prior_version: u64, events: &[ExpenseEvent]) {
        for (idx, event) in events.iter().enumerate() {
            let sequence_number = prior_version + idx as u64 + 1;
            let encoded =
                EventEnvelope::from_typed(expense_id, AGGREGATE_TYPE, sequence_number, event);
            let envelope = match encoded {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(
                        %expense_id,
                        event_type = event.event_type(),
                        error = %e,
                        "failed to encode event"
                    );
                    continue;
                }
                };

            if let Err(e) = self.bus.publish(envelope) {
                warn!(
                    %expense_id,
                    event_type = event.event_type(),
                    sequence_number,
                    error = ?e,
                    "event publication failed after commit"
                );
            }
        }
    }
}

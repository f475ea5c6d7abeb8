use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bursar_core::{
    Aggregate, AggregateRoot, CategoryId, DomainError, ExpenseId, PaymentId, SupplierId,
};
use bursar_events::Event;

use crate::money::{Conversion, Currency, Money};
use crate::payment::{Payment, PaymentDetails};
use crate::status::{CancellationPolicy, PaymentPolicy, PaymentStatus, derive_status};

/// Descriptive fields attached to an expense at creation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExpenseMetadata {
    pub description: String,
    pub category_id: Option<CategoryId>,
    pub supplier_id: Option<SupplierId>,
    /// Supplier's invoice or receipt number.
    pub document_number: Option<String>,
    pub notes: Option<String>,
}

/// Aggregate root: Expense.
///
/// Owns the settlement arithmetic for its payments. `payment_status` and
/// `total_paid_settlement` are never set directly; they move only through
/// `PaymentRecorded` and `ExpenseCancelled` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    id: ExpenseId,
    amount: Money,
    reference_date: Option<NaiveDate>,
    settlement: Option<Conversion>,
    status: PaymentStatus,
    total_paid_settlement: Decimal,
    payment_count: u32,
    metadata: ExpenseMetadata,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    version: u64,
    created: bool,
}

impl Expense {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: ExpenseId) -> Self {
        Self {
            id,
            amount: Money::zero(Currency::Ves),
            reference_date: None,
            settlement: None,
            status: PaymentStatus::Pending,
            total_paid_settlement: Decimal::ZERO,
            payment_count: 0,
            metadata: ExpenseMetadata::default(),
            created_at: None,
            updated_at: None,
            cancellation_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ExpenseId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Original billed amount.
    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.amount.currency
    }

    pub fn reference_date(&self) -> Option<NaiveDate> {
        self.reference_date
    }

    /// The frozen conversion taken when the expense was created (or last revised).
    pub fn settlement(&self) -> Option<&Conversion> {
        self.settlement.as_ref()
    }

    pub fn settlement_currency(&self) -> Option<Currency> {
        self.settlement.as_ref().map(Conversion::settlement_currency)
    }

    pub fn settlement_equivalent_at_creation(&self) -> Decimal {
        self.settlement
            .as_ref()
            .map(Conversion::settled_amount)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn total_paid_settlement(&self) -> Decimal {
        self.total_paid_settlement
    }

    pub fn payment_count(&self) -> u32 {
        self.payment_count
    }

    pub fn metadata(&self) -> &ExpenseMetadata {
        &self.metadata
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    /// Unpaid remainder in settlement currency. Never negative.
    pub fn pending_balance(&self) -> Decimal {
        (self.settlement_equivalent_at_creation() - self.total_paid_settlement).max(Decimal::ZERO)
    }

    /// Amount excess over the settlement equivalent, if any.
    pub fn overpaid_by(&self) -> Decimal {
        (self.total_paid_settlement - self.settlement_equivalent_at_creation()).max(Decimal::ZERO)
    }

    /// Invariant: cannot pay a paid or cancelled expense.
    pub fn can_accept_payment(&self) -> bool {
        self.created && self.status.accepts_payments()
    }

    /// Invariant: amount and currency are editable only before the first payment.
    pub fn can_revise(&self) -> bool {
        self.created
            && self.status == PaymentStatus::Pending
            && self.total_paid_settlement == Decimal::ZERO
    }

    pub fn can_cancel(&self, policy: CancellationPolicy) -> bool {
        match (self.status, policy) {
            (PaymentStatus::Pending, _) => self.created,
            (PaymentStatus::PartiallyPaid, CancellationPolicy::AllowPartiallyPaid) => true,
            _ => false,
        }
    }
}

impl AggregateRoot for Expense {
    type Id = ExpenseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateExpense.
///
/// `settlement` is the conversion of `amount` at `reference_date`, obtained by
/// the caller before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateExpense {
    pub expense_id: ExpenseId,
    pub amount: Money,
    pub reference_date: NaiveDate,
    pub settlement: Conversion,
    pub metadata: ExpenseMetadata,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseExpense (amount/currency correction before any payment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseExpense {
    pub expense_id: ExpenseId,
    pub amount: Money,
    pub reference_date: NaiveDate,
    pub settlement: Conversion,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub expense_id: ExpenseId,
    pub payment_id: PaymentId,
    pub amount_paid: Money,
    pub payment_date: NaiveDate,
    /// Conversion of `amount_paid` at `payment_date` into the expense's settlement currency.
    pub settlement: Conversion,
    pub details: PaymentDetails,
    pub policy: PaymentPolicy,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelExpense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelExpense {
    pub expense_id: ExpenseId,
    pub reason: Option<String>,
    pub policy: PaymentPolicy,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseCommand {
    CreateExpense(CreateExpense),
    ReviseExpense(ReviseExpense),
    RecordPayment(RecordPayment),
    CancelExpense(CancelExpense),
}

/// Event: ExpenseCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseCreated {
    pub expense_id: ExpenseId,
    pub amount: Money,
    pub reference_date: NaiveDate,
    pub settlement: Conversion,
    pub metadata: ExpenseMetadata,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExpenseRevised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRevised {
    pub expense_id: ExpenseId,
    pub previous_amount: Money,
    pub amount: Money,
    pub reference_date: NaiveDate,
    pub settlement: Conversion,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub expense_id: ExpenseId,
    pub payment: Payment,
    pub new_total_paid: Decimal,
    pub new_status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExpenseCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseCancelled {
    pub expense_id: ExpenseId,
    pub previous_status: PaymentStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseEvent {
    ExpenseCreated(ExpenseCreated),
    ExpenseRevised(ExpenseRevised),
    PaymentRecorded(PaymentRecorded),
    ExpenseCancelled(ExpenseCancelled),
}

impl ExpenseEvent {
    /// The payment carried by this event, if it recorded one.
    pub fn recorded_payment(&self) -> Option<&Payment> {
        match self {
            ExpenseEvent::PaymentRecorded(e) => Some(&e.payment),
            _ => None,
        }
    }
}

impl Event for ExpenseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ExpenseEvent::ExpenseCreated(_) => "ledger.expense.created",
            ExpenseEvent::ExpenseRevised(_) => "ledger.expense.revised",
            ExpenseEvent::PaymentRecorded(_) => "ledger.expense.payment_recorded",
            ExpenseEvent::ExpenseCancelled(_) => "ledger.expense.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ExpenseEvent::ExpenseCreated(e) => e.occurred_at,
            ExpenseEvent::ExpenseRevised(e) => e.occurred_at,
            ExpenseEvent::PaymentRecorded(e) => e.occurred_at,
            ExpenseEvent::ExpenseCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Expense {
    type Command = ExpenseCommand;
    type Event = ExpenseEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ExpenseEvent::ExpenseCreated(e) => {
                self.id = e.expense_id;
                self.amount = e.amount;
                self.reference_date = Some(e.reference_date);
                self.settlement = Some(e.settlement.clone());
                self.metadata = e.metadata.clone();
                self.status = PaymentStatus::Pending;
                self.total_paid_settlement = Decimal::ZERO;
                self.payment_count = 0;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ExpenseEvent::ExpenseRevised(e) => {
                self.amount = e.amount;
                self.reference_date = Some(e.reference_date);
                self.settlement = Some(e.settlement.clone());
            }
            ExpenseEvent::PaymentRecorded(e) => {
                self.total_paid_settlement = e.new_total_paid;
                self.status = e.new_status;
                self.payment_count += 1;
            }
            ExpenseEvent::ExpenseCancelled(e) => {
                self.status = PaymentStatus::Cancelled;
                self.cancellation_reason = e.reason.clone();
            }
        }

        self.updated_at = Some(event.occurred_at());
        // +1 per applied event; doubles as the optimistic concurrency token.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ExpenseCommand::CreateExpense(cmd) => self.handle_create(cmd),
            ExpenseCommand::ReviseExpense(cmd) => self.handle_revise(cmd),
            ExpenseCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
            ExpenseCommand::CancelExpense(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Expense {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_expense_id(&self, expense_id: ExpenseId) -> Result<(), DomainError> {
        if self.id != expense_id {
            return Err(DomainError::validation("expense_id mismatch"));
        }
        Ok(())
    }

    fn validate_billed_amount(amount: Money, settlement: &Conversion) -> Result<(), DomainError> {
        if !amount.is_positive() {
            return Err(DomainError::invalid_amount(format!(
                "expense amount must be positive, got {amount}"
            )));
        }
        if settlement.source != amount {
            return Err(DomainError::validation(
                "settlement conversion does not match the billed amount",
            ));
        }
        if !settlement.settled.is_positive() {
            return Err(DomainError::invalid_amount(format!(
                "{amount} converts to {} which is not a positive settlement amount",
                settlement.settled
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateExpense) -> Result<Vec<ExpenseEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("expense already exists"));
        }
        self.ensure_expense_id(cmd.expense_id)?;
        Self::validate_billed_amount(cmd.amount, &cmd.settlement)?;

        Ok(vec![ExpenseEvent::ExpenseCreated(ExpenseCreated {
            expense_id: cmd.expense_id,
            amount: cmd.amount,
            reference_date: cmd.reference_date,
            settlement: cmd.settlement.clone(),
            metadata: cmd.metadata.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revise(&self, cmd: &ReviseExpense) -> Result<Vec<ExpenseEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_expense_id(cmd.expense_id)?;

        if !self.can_revise() {
            return Err(DomainError::invalid_state(format!(
                "expense amount is locked once payments exist or it is closed (status: {})",
                self.status
            )));
        }
        Self::validate_billed_amount(cmd.amount, &cmd.settlement)?;

        Ok(vec![ExpenseEvent::ExpenseRevised(ExpenseRevised {
            expense_id: cmd.expense_id,
            previous_amount: self.amount,
            amount: cmd.amount,
            reference_date: cmd.reference_date,
            settlement: cmd.settlement.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_payment(
        &self,
        cmd: &RecordPayment,
    ) -> Result<Vec<ExpenseEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_expense_id(cmd.expense_id)?;

        if !self.can_accept_payment() {
            return Err(DomainError::invalid_state(format!(
                "cannot record payment on {} expense",
                self.status
            )));
        }

        if !cmd.amount_paid.is_positive() {
            return Err(DomainError::invalid_amount(format!(
                "payment amount must be positive, got {}",
                cmd.amount_paid
            )));
        }

        if cmd.settlement.source != cmd.amount_paid {
            return Err(DomainError::validation(
                "settlement conversion does not match the payment amount",
            ));
        }

        if Some(cmd.settlement.settlement_currency()) != self.settlement_currency() {
            return Err(DomainError::validation(format!(
                "payment settled in {} but expense settles in {}",
                cmd.settlement.settlement_currency(),
                self.settlement_currency()
                    .map(Currency::code)
                    .unwrap_or("<none>")
            )));
        }

        if !cmd.settlement.settled.is_positive() {
            return Err(DomainError::invalid_amount(format!(
                "{} is too small to settle",
                cmd.amount_paid
            )));
        }

        let new_total_paid = self
            .total_paid_settlement
            .checked_add(cmd.settlement.settled_amount())
            .ok_or_else(|| {
                DomainError::invalid_amount(format!(
                    "{} would push the paid total past the representable range",
                    cmd.amount_paid
                ))
            })?;
        let new_status = derive_status(
            self.settlement_equivalent_at_creation(),
            new_total_paid,
            cmd.policy.paid_tolerance,
        );

        let payment = Payment {
            id: cmd.payment_id,
            expense_id: cmd.expense_id,
            amount_paid: cmd.amount_paid,
            payment_date: cmd.payment_date,
            settlement: cmd.settlement.clone(),
            details: cmd.details.clone(),
            recorded_at: cmd.occurred_at,
        };

        Ok(vec![ExpenseEvent::PaymentRecorded(PaymentRecorded {
            expense_id: cmd.expense_id,
            payment,
            new_total_paid,
            new_status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelExpense) -> Result<Vec<ExpenseEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_expense_id(cmd.expense_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "expense is already {}",
                self.status
            )));
        }

        if !self.can_cancel(cmd.policy.cancellation) {
            return Err(DomainError::invalid_state(
                "cancellation policy forbids cancelling a partially paid expense",
            ));
        }

        Ok(vec![ExpenseEvent::ExpenseCancelled(ExpenseCancelled {
            expense_id: cmd.expense_id,
            previous_status: self.status,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

use std::sync::Arc;

use thiserror::Error;

use bursar_core::{ExpectedVersion, ExpenseId, PaymentId};
use bursar_expenses::{Expense, Payment};

/// Ledger store operation error.
///
/// Infrastructure failures (storage, concurrency, ownership) as opposed to
/// domain failures (validation, lifecycle rules).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("payment {0} already recorded")]
    DuplicatePayment(PaymentId),

    #[error("ownership violation: {0}")]
    Ownership(String),

    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for expenses and their payments.
///
/// ## Write semantics
///
/// - Writes carry an `ExpectedVersion`: the version the writer loaded.
///   `Exact(0)` means "the expense must not exist yet". A mismatch fails with
///   `Concurrency` and writes nothing.
/// - `save_expense_and_payment` is atomic: either the payment is stored and
///   the expense reflects it, or neither changes.
/// - Payments are append-only and owned by exactly one expense.
///
/// ## Read semantics
///
/// - `get_expense` returns `None` for unknown ids.
/// - `list_payments` returns payments in recording order.
pub trait LedgerStore: Send + Sync {
    fn get_expense(&self, id: ExpenseId) -> Result<Option<Expense>, LedgerStoreError>;

    /// Insert or update an expense without touching its payments.
    fn save_expense(
        &self,
        expense: &Expense,
        expected_version: ExpectedVersion,
    ) -> Result<(), LedgerStoreError>;

    /// Append `payment` and store the updated `expense` in one transaction.
    fn save_expense_and_payment(
        &self,
        expense: &Expense,
        payment: &Payment,
        expected_version: ExpectedVersion,
    ) -> Result<(), LedgerStoreError>;

    /// All expenses, oldest first.
    fn list_expenses(&self) -> Result<Vec<Expense>, LedgerStoreError>;

    fn list_payments(&self, expense_id: ExpenseId) -> Result<Vec<Payment>, LedgerStoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn get_expense(&self, id: ExpenseId) -> Result<Option<Expense>, LedgerStoreError> {
        (**self).get_expense(id)
    }

    fn save_expense(
        &self,
        expense: &Expense,
        expected_version: ExpectedVersion,
    ) -> Result<(), LedgerStoreError> {
        (**self).save_expense(expense, expected_version)
    }

    fn save_expense_and_payment(
        &self,
        expense: &Expense,
        payment: &Payment,
        expected_version: ExpectedVersion,
    ) -> Result<(), LedgerStoreError> {
        (**self).save_expense_and_payment(expense, payment, expected_version)
    }

    fn list_expenses(&self) -> Result<Vec<Expense>, LedgerStoreError> {
        (**self).list_expenses()
    }

    fn list_payments(&self, expense_id: ExpenseId) -> Result<Vec<Payment>, LedgerStoreError> {
        (**self).list_payments(expense_id)
    }
}

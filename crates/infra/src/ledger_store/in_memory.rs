use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use bursar_core::{AggregateRoot, ExpectedVersion, ExpenseId, PaymentId};
use bursar_expenses::{Expense, Payment};

use super::r#trait::{LedgerStore, LedgerStoreError};

#[derive(Debug, Default)]
struct Tables {
    expenses: HashMap<ExpenseId, Expense>,
    payments: HashMap<ExpenseId, Vec<Payment>>,
    payment_ids: HashSet<PaymentId>,
}

impl Tables {
    fn current_version(&self, id: ExpenseId) -> u64 {
        self.expenses.get(&id).map(|e| e.version()).unwrap_or(0)
    }

    fn check_version(
        &self,
        expense: &Expense,
        expected_version: ExpectedVersion,
    ) -> Result<(), LedgerStoreError> {
        let current = self.current_version(expense.id_typed());
        if !expected_version.matches(current) {
            return Err(LedgerStoreError::Concurrency(format!(
                "expense {}: expected {expected_version:?}, found {current}",
                expense.id_typed()
            )));
        }
        if expense.version() <= current {
            return Err(LedgerStoreError::Concurrency(format!(
                "expense {}: write does not advance version (stored {current}, write {})",
                expense.id_typed(),
                expense.version()
            )));
        }
        Ok(())
    }
}

/// In-memory ledger store.
///
/// One lock guards every table, so each write is trivially atomic.
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, LedgerStoreError> {
        self.tables
            .read()
            .map_err(|_| LedgerStoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, LedgerStoreError> {
        self.tables
            .write()
            .map_err(|_| LedgerStoreError::Unavailable("lock poisoned".to_string()))
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn get_expense(&self, id: ExpenseId) -> Result<Option<Expense>, LedgerStoreError> {
        Ok(self.read()?.expenses.get(&id).cloned())
    }

    fn save_expense(
        &self,
        expense: &Expense,
        expected_version: ExpectedVersion,
    ) -> Result<(), LedgerStoreError> {
        let mut tables = self.write()?;
        tables.check_version(expense, expected_version)?;
        tables.expenses.insert(expense.id_typed(), expense.clone());
        Ok(())
    }

    fn save_expense_and_payment(
        &self,
        expense: &Expense,
        payment: &Payment,
        expected_version: ExpectedVersion,
    ) -> Result<(), LedgerStoreError> {
        if payment.expense_id != expense.id_typed() {
            return Err(LedgerStoreError::Ownership(format!(
                "payment {} belongs to expense {}, not {}",
                payment.id,
                payment.expense_id,
                expense.id_typed()
            )));
        }

        let mut tables = self.write()?;
        tables.check_version(expense, expected_version)?;
        if tables.payment_ids.contains(&payment.id) {
            return Err(LedgerStoreError::DuplicatePayment(payment.id));
        }

        // All checks passed; nothing below can fail.
        tables.payment_ids.insert(payment.id);
        tables
            .payments
            .entry(expense.id_typed())
            .or_default()
            .push(payment.clone());
        tables.expenses.insert(expense.id_typed(), expense.clone());
        Ok(())
    }

    fn list_expenses(&self) -> Result<Vec<Expense>, LedgerStoreError> {
        let tables = self.read()?;
        let mut expenses: Vec<Expense> = tables.expenses.values().cloned().collect();
        // UUIDv7 ids sort by creation time.
        expenses.sort_by_key(|e| e.id_typed());
        Ok(expenses)
    }

    fn list_payments(&self, expense_id: ExpenseId) -> Result<Vec<Payment>, LedgerStoreError> {
        Ok(self
            .read()?
            .payments
            .get(&expense_id)
            .cloned()
            .unwrap_or_default())
    }
}

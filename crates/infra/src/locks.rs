//! Expense-scoped serialization.
//!
//! Every mutation of one expense runs while holding that expense's lock, so
//! read-modify-write cycles on `total_paid_settlement` cannot interleave.
//! Different expenses never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bursar_core::ExpenseId;

/// Registry of per-expense locks, created on demand and dropped when idle.
#[derive(Debug, Default)]
pub struct ExpenseLocks {
    slots: Mutex<HashMap<ExpenseId, Arc<Mutex<()>>>>,
}

impl ExpenseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `expense_id`.
    pub fn with_expense<T>(&self, expense_id: ExpenseId, f: impl FnOnce() -> T) -> T {
        let slot = SlotLease {
            locks: self,
            expense_id,
            slot: Some(Arc::clone(self.registry().entry(expense_id).or_default())),
        };

        // The mutex guards no data, so a panic in a previous holder leaves
        // nothing inconsistent behind.
        let _guard = slot.lock();
        f()
    }

    /// Number of expenses with a live lock slot.
    pub fn active(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<ExpenseId, Arc<Mutex<()>>>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release_if_idle(&self, expense_id: ExpenseId) {
        let mut slots = self.registry();
        // Clones are only handed out under the registry lock, so a count of 1
        // means no caller holds or waits on this slot.
        if slots
            .get(&expense_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&expense_id);
        }
    }
}

/// A caller's claim on one registry slot. Dropping it, on return or on
/// unwind, hands the slot back so idle entries never linger.
struct SlotLease<'a> {
    locks: &'a ExpenseLocks,
    expense_id: ExpenseId,
    slot: Option<Arc<Mutex<()>>>,
}

impl SlotLease<'_> {
    fn lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.slot
            .as_ref()
            .map(|slot| slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        drop(self.slot.take());
        self.locks.release_if_idle(self.expense_id);
    }
}

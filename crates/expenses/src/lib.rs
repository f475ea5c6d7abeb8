//! Expenses domain module.
//!
//! Business rules for school expenses and the payments recorded against them:
//! money and currency values, frozen conversion records, the payment-status
//! state machine, and the `Expense` aggregate. Pure, deterministic domain
//! logic (no IO, no conversion service, no storage).

pub mod expense;
pub mod money;
pub mod payment;
pub mod status;

pub use expense::{
    CancelExpense, CreateExpense, Expense, ExpenseCancelled, ExpenseCommand, ExpenseCreated,
    ExpenseEvent, ExpenseMetadata, ExpenseRevised, PaymentRecorded, RecordPayment, ReviseExpense,
};
pub use money::{Conversion, Currency, Money};
pub use payment::{Payment, PaymentDetails, PaymentMethod};
pub use status::{CancellationPolicy, PaymentPolicy, PaymentStatus, derive_status};

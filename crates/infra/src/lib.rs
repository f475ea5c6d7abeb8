//! Infrastructure layer: the ledger engine and its collaborators
//! (storage, currency conversion, locking, configuration).

/// Configuration loading and representation.
pub mod config;
/// Currency conversion boundary and adapters.
pub mod conversion;
pub mod ledger;
pub mod ledger_store;
pub mod locks;

pub use config::{ConfigError, LedgerConfig};
pub use conversion::{ConversionError, CurrencyConverter, InMemoryRateTable, TimeoutConverter};
pub use ledger::{
    ExpenseFilter, ExpenseLedger, ExpenseRevision, LedgerError, NewExpense, NewPayment,
    PaymentReceipt,
};
pub use ledger_store::{InMemoryLedgerStore, LedgerStore, LedgerStoreError};
pub use locks::ExpenseLocks;

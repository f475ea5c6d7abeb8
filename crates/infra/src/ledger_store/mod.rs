//! Ledger store boundary.
//!
//! Defines how expenses and payments are persisted (versioned, atomic,
//! append-only for payments) without making storage assumptions.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use r#trait::{LedgerStore, LedgerStoreError};

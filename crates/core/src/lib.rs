//! `bursar-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the ledger crates
//! (no storage, no conversion service, no logging setup).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CategoryId, ExpenseId, PaymentId, SupplierId};
pub use value_object::ValueObject;

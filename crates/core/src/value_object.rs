//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. In the ledger,
/// `Money { amount: 100.00, currency: USD }` and a frozen `Conversion` record
/// are value objects; an `Expense` or a `Payment` is an entity.
///
/// To "modify" a value object, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

//! Payment-status state machine and the policies that parameterize it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Expense payment status lifecycle.
///
/// ```text
/// pending ──► partially_paid ──► paid
///    │  └──────────────────────► paid
///    └──────────┴──► cancelled
/// ```
///
/// `paid` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::PartiallyPaid => "partially_paid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Cancelled)
    }

    /// Only non-terminal expenses accept payments.
    pub fn accepts_payments(self) -> bool {
        !self.is_terminal()
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an expense that already has payments may still be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// `pending` and `partially_paid` expenses can be cancelled.
    #[default]
    AllowPartiallyPaid,
    /// Only `pending` expenses (no payments yet) can be cancelled.
    UnpaidOnly,
}

/// Knobs for status derivation and cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPolicy {
    /// Shortfall (in settlement units) still considered fully paid.
    /// Absorbs rounding from converting each payment separately.
    pub paid_tolerance: Decimal,
    pub cancellation: CancellationPolicy,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self {
            paid_tolerance: Decimal::new(1, 2),
            cancellation: CancellationPolicy::default(),
        }
    }
}

/// Status implied by the settlement totals of a live (non-cancelled) expense.
///
/// - nothing paid → `pending`
/// - paid within `tolerance` of the equivalent, or beyond it → `paid`
/// - anything in between → `partially_paid`
///
/// Overpayment is not an error; it simply lands on `paid`.
pub fn derive_status(
    equivalent: Decimal,
    total_paid: Decimal,
    tolerance: Decimal,
) -> PaymentStatus {
    if total_paid <= Decimal::ZERO {
        PaymentStatus::Pending
    } else if total_paid >= equivalent - tolerance {
        PaymentStatus::Paid
    } else {
        PaymentStatus::PartiallyPaid
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bursar_core::{Entity, ExpenseId, PaymentId};

use crate::money::{Conversion, Money};

/// How a payment was made. Descriptive only; never affects balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    #[default]
    BankTransfer,
    MobilePayment,
    Zelle,
    Card,
    Other,
}

/// Non-authoritative fields supplied with a payment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// A payment recorded against exactly one expense.
///
/// Immutable once recorded: corrections are new entries, never edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub expense_id: ExpenseId,
    pub amount_paid: Money,
    pub payment_date: NaiveDate,
    /// Frozen at recording time using `payment_date`.
    pub settlement: Conversion,
    pub details: PaymentDetails,
    pub recorded_at: DateTime<Utc>,
}

impl Payment {
    pub fn amount_settlement_equivalent(&self) -> Decimal {
        self.settlement.settled_amount()
    }
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

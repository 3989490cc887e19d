// 🧾 Invoice Entity - a billable obligation issued to a member
//
// Lifecycle: created UNPAID; afterwards the status is written only by the
// reconciler or by an explicit administrative override.

use super::money::{round_currency, sum_amounts};
use super::{InvoiceId, MemberId, StatusCode};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// INVOICE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub member_id: MemberId,

    /// Human-readable number, globally unique (e.g. "INV-2025-0042")
    pub number: String,

    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,

    /// Σ quantity × unit price over the line items
    pub total_amount: Decimal,

    pub status: StatusCode,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Strictly past due on the calendar (same day is not overdue)
    pub fn is_past_due(&self, today: NaiveDate) -> bool {
        self.due_date < today
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == StatusCode::Cancelled
    }
}

/// Input for creating an invoice.
///
/// When `lines` is non-empty the total is derived from them and `total_amount`
/// is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub member_id: MemberId,
    pub number: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: Decimal,
    #[serde(default)]
    pub lines: Vec<NewInvoiceLine>,
}

impl NewInvoice {
    pub fn effective_total(&self) -> Decimal {
        if self.lines.is_empty() {
            round_currency(self.total_amount)
        } else {
            compute_total(&self.lines)
        }
    }
}

// ============================================================================
// LINE ITEMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: i64,
    pub invoice_id: InvoiceId,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl InvoiceLine {
    pub fn line_total(&self) -> Decimal {
        round_currency(self.quantity * self.unit_price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoiceLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl NewInvoiceLine {
    pub fn new(description: &str, quantity: Decimal, unit_price: Decimal) -> Self {
        NewInvoiceLine {
            description: description.to_string(),
            quantity,
            unit_price,
        }
    }

    pub fn line_total(&self) -> Decimal {
        round_currency(self.quantity * self.unit_price)
    }

    /// Quantity must be positive and price non-negative
    pub fn validate(&self) -> Result<(), String> {
        if self.quantity <= Decimal::ZERO {
            return Err(format!(
                "quantity for '{}' must be positive, got {}",
                self.description, self.quantity
            ));
        }
        if self.unit_price < Decimal::ZERO {
            return Err(format!(
                "unit price for '{}' must not be negative, got {}",
                self.description, self.unit_price
            ));
        }
        Ok(())
    }
}

/// Invoice total derived from line items, each rounded to currency precision.
pub fn compute_total(lines: &[NewInvoiceLine]) -> Decimal {
    sum_amounts(lines.iter().map(NewInvoiceLine::line_total))
}

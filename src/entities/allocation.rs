// 🔗 Allocation Entity - a portion of a payment applied to an invoice
//
// Rows are written only by the allocation ledger.

use super::{AllocationId, InvoiceId, PaymentId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub amount: Decimal,
}

/// One requested line of a replace-allocations batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub invoice_id: InvoiceId,
    pub amount: Decimal,
}

impl AllocationLine {
    pub fn new(invoice_id: InvoiceId, amount: Decimal) -> Self {
        AllocationLine { invoice_id, amount }
    }
}

impl From<&Allocation> for AllocationLine {
    fn from(allocation: &Allocation) -> Self {
        AllocationLine {
            invoice_id: allocation.invoice_id,
            amount: allocation.amount,
        }
    }
}

// 🚨 Ledger errors - caller-input problems vs fatal persistence faults
//
// Nothing here is retried. Caller errors (NotFound, OverAllocation, ...) are
// reported synchronously; Storage wraps whatever SQLite gave us.

use rust_decimal::Decimal;

/// Errors produced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("payment {payment_id} is already allocated to invoice {invoice_id}")]
    DuplicateAllocation { payment_id: i64, invoice_id: i64 },

    /// `remaining` is the unallocated headroom left on the payment.
    #[error("over-allocation: requested {requested}, only {remaining} remaining on payment")]
    OverAllocation {
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("invalid amount {amount}: allocation amounts must be greater than zero")]
    InvalidAmount { amount: Decimal },

    #[error("invoice {invoice_id} referenced by allocation batch does not exist")]
    InvalidInvoice { invoice_id: i64 },

    #[error("invoice {invoice_id} is locked ({status})")]
    InvoiceLocked { invoice_id: i64, status: String },

    #[error("payment {payment_id} was modified concurrently (expected version {expected})")]
    ConcurrentModification { payment_id: i64, expected: i64 },

    #[error("invalid line item: {0}")]
    InvalidLineItem(String),

    #[error("audit sink rejected entry: {0}")]
    Audit(String),

    #[error("corrupt value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        LedgerError::NotFound { entity, id }
    }

    /// True for errors caused by the request itself rather than the store.
    pub fn is_caller_error(&self) -> bool {
        !matches!(
            self,
            LedgerError::Storage(_)
                | LedgerError::Serialization(_)
                | LedgerError::Corrupt { .. }
                | LedgerError::Audit(_)
        )
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_over_allocation_message_carries_headroom() {
        let err = LedgerError::OverAllocation {
            requested: dec!(500.00),
            remaining: dec!(120.50),
        };

        let msg = err.to_string();
        assert!(msg.contains("500.00"));
        assert!(msg.contains("120.50"));
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_storage_errors_are_fatal() {
        let err = LedgerError::from(rusqlite::Error::InvalidQuery);
        assert!(!err.is_caller_error());

        let err = LedgerError::Audit("disk full".to_string());
        assert!(!err.is_caller_error());
    }
}

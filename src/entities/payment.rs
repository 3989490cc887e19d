// 💳 Payment Entity - money received from a member
//
// The amount is immutable once recorded; corrections happen through
// allocation changes. `version` is the optimistic-concurrency token bumped by
// every allocation mutation on the payment.

use super::{MemberId, PaymentId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub member_id: MemberId,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub payer_name: Option<String>,
    pub method: Option<String>,

    /// Import batch this payment came from (None = manual entry)
    pub import_batch: Option<String>,

    pub version: i64,
}

impl Payment {
    pub fn is_imported(&self) -> bool {
        self.import_batch.is_some()
    }
}

/// Input for recording a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub member_id: MemberId,
    pub date: NaiveDate,
    pub amount: Decimal,
    #[serde(default)]
    pub payer_name: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub import_batch: Option<String>,

    /// How many earlier rows of the same export carry the same
    /// member/date/amount/payer/method (0 for the first)
    #[serde(default)]
    pub import_occurrence: u32,
}

impl NewPayment {
    pub fn manual(member_id: MemberId, date: NaiveDate, amount: Decimal) -> Self {
        NewPayment {
            member_id,
            date,
            amount,
            payer_name: None,
            method: None,
            import_batch: None,
            import_occurrence: 0,
        }
    }

    /// Fields that make two export rows look alike
    pub fn import_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.member_id,
            self.date,
            self.amount.normalize(),
            self.payer_name.as_deref().unwrap_or_default(),
            self.method.as_deref().unwrap_or_default()
        )
    }

    /// Idempotency hash used to skip re-imported rows.
    /// NOTE: deduplication only, the row id stays the identity. Identical
    /// rows inside one export are told apart by `import_occurrence`.
    pub fn compute_import_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}#{}", self.import_key(), self.import_occurrence));
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_import_hash_is_stable() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let a = NewPayment::manual(MemberId(3), date, dec!(120.00));
        let b = NewPayment::manual(MemberId(3), date, dec!(120));

        assert_eq!(a.compute_import_hash(), b.compute_import_hash());
        assert_eq!(a.compute_import_hash().len(), 64);
    }

    #[test]
    fn test_import_hash_differs_by_amount() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let a = NewPayment::manual(MemberId(3), date, dec!(120.00));
        let b = NewPayment::manual(MemberId(3), date, dec!(120.01));

        assert_ne!(a.compute_import_hash(), b.compute_import_hash());
    }

    #[test]
    fn test_import_hash_differs_by_method_and_occurrence() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let mut transfer = NewPayment::manual(MemberId(1), date, dec!(50.00));
        transfer.method = Some("transfer".to_string());
        let mut card = transfer.clone();
        card.method = Some("card".to_string());
        let mut second_transfer = transfer.clone();
        second_transfer.import_occurrence = 1;

        assert_ne!(transfer.compute_import_hash(), card.compute_import_hash());
        assert_ne!(
            transfer.compute_import_hash(),
            second_transfer.compute_import_hash()
        );
    }
}

// ⚖️ Status Reconciler - derives invoice status from allocations and the date
//
// Rule (CANCELLED is never touched):
//   paid >= total          -> PAID      (overpayment is still just PAID)
//   0 < paid < total       -> PARTIAL
//   paid == 0, due < today -> OVERDUE   (calendar dates, same day is not overdue)
//   otherwise              -> UNPAID
//
// The derivation is a pure function; `reconcile` only writes when the
// derived status differs from the stored one, which makes it idempotent.

use crate::db;
use crate::entities::{Invoice, InvoiceId, StatusCode};
use crate::error::LedgerResult;
use crate::temporal::Clock;
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// DUNNING POLICY
// ============================================================================

/// What the reconciler does with an invoice an administrator put in collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DunningPolicy {
    /// DUNNING is only ever left by another manual override
    Sticky,

    /// DUNNING holds while money is owed, becomes PAID once fully covered
    #[default]
    ReleaseOnPaid,

    /// DUNNING is overwritten by the next reconciliation like any derived state
    Transient,
}

// ============================================================================
// INPUT / DECISION
// ============================================================================

/// Everything the status depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusInput {
    pub total: Decimal,
    pub paid: Decimal,
    pub due_date: NaiveDate,
    pub today: NaiveDate,
    pub current: StatusCode,
}

impl StatusInput {
    pub fn for_invoice(invoice: &Invoice, paid: Decimal, today: NaiveDate) -> Self {
        StatusInput {
            total: invoice.total_amount,
            paid,
            due_date: invoice.due_date,
            today,
            current: invoice.status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileOutcome {
    /// Derived status equals the stored one; nothing written
    Unchanged { status: StatusCode },

    /// Status column rewritten
    Updated { from: StatusCode, to: StatusCode },

    /// Manual state protected from automatic transition
    Frozen { status: StatusCode },

    /// Invoice no longer exists; treated as a no-op
    Missing,
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, ReconcileOutcome::Updated { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ReconcileOutcome::Unchanged { status } | ReconcileOutcome::Frozen { status } => {
                Some(*status)
            }
            ReconcileOutcome::Updated { to, .. } => Some(*to),
            ReconcileOutcome::Missing => None,
        }
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusReconciler {
    pub dunning_policy: DunningPolicy,
}

impl StatusReconciler {
    pub fn new(dunning_policy: DunningPolicy) -> Self {
        StatusReconciler { dunning_policy }
    }

    /// Status implied by payments and the calendar, ignoring manual states
    pub fn derived_status(input: &StatusInput) -> StatusCode {
        if input.paid >= input.total {
            StatusCode::Paid
        } else if input.paid > Decimal::ZERO {
            StatusCode::Partial
        } else if input.due_date < input.today {
            StatusCode::Overdue
        } else {
            StatusCode::Unpaid
        }
    }

    /// Status the invoice should carry, or None when the current manual state
    /// must be left alone.
    pub fn target_status(&self, input: &StatusInput) -> Option<StatusCode> {
        let derived = Self::derived_status(input);

        match input.current {
            StatusCode::Cancelled => None,
            StatusCode::Dunning => match self.dunning_policy {
                DunningPolicy::Sticky => None,
                DunningPolicy::ReleaseOnPaid if derived == StatusCode::Paid => Some(derived),
                DunningPolicy::ReleaseOnPaid => None,
                DunningPolicy::Transient => Some(derived),
            },
            StatusCode::Unpaid | StatusCode::Partial | StatusCode::Paid | StatusCode::Overdue => {
                Some(derived)
            }
        }
    }

    /// Pure decision for a given input (no I/O)
    pub fn decide(&self, input: &StatusInput) -> ReconcileOutcome {
        match self.target_status(input) {
            None => ReconcileOutcome::Frozen {
                status: input.current,
            },
            Some(target) if target == input.current => {
                ReconcileOutcome::Unchanged { status: target }
            }
            Some(target) => ReconcileOutcome::Updated {
                from: input.current,
                to: target,
            },
        }
    }

    /// Recompute and, if needed, persist the status of one invoice.
    ///
    /// Runs on the caller's connection so it joins the caller's transaction.
    pub fn reconcile(
        &self,
        conn: &Connection,
        invoice_id: InvoiceId,
        clock: &dyn Clock,
    ) -> LedgerResult<ReconcileOutcome> {
        let invoice = match db::get_invoice(conn, invoice_id)? {
            Some(invoice) => invoice,
            None => {
                debug!(invoice_id = %invoice_id, "reconcile skipped: invoice missing");
                return Ok(ReconcileOutcome::Missing);
            }
        };

        let paid = db::allocated_to_invoice(conn, invoice_id)?;
        let input = StatusInput::for_invoice(&invoice, paid, clock.today());
        let outcome = self.decide(&input);

        if let ReconcileOutcome::Updated { from, to } = outcome {
            if db::update_invoice_status(conn, invoice_id, to, clock.now())? == 0 {
                return Ok(ReconcileOutcome::Missing);
            }
            debug!(
                invoice_id = %invoice_id,
                from = %from,
                to = %to,
                paid = %paid,
                total = %invoice.total_amount,
                "invoice status reconciled"
            );
        }

        Ok(outcome)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_allocation, insert_invoice, insert_payment, setup_database};
    use crate::entities::{MemberId, NewInvoice, NewPayment};
    use crate::temporal::FixedClock;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
    }

    fn input(total: Decimal, paid: Decimal, due_in_days: i64, current: StatusCode) -> StatusInput {
        StatusInput {
            total,
            paid,
            due_date: today() + Duration::days(due_in_days),
            today: today(),
            current,
        }
    }

    #[test]
    fn test_derived_status_table() {
        let cases = [
            (dec!(1000), dec!(1000), 10, StatusCode::Paid),
            (dec!(1000), dec!(1200), -5, StatusCode::Paid),
            (dec!(1000), dec!(200), 10, StatusCode::Partial),
            (dec!(1000), dec!(200), -10, StatusCode::Partial),
            (dec!(1000), dec!(0), -1, StatusCode::Overdue),
            (dec!(1000), dec!(0), 0, StatusCode::Unpaid),
            (dec!(1000), dec!(0), 3, StatusCode::Unpaid),
        ];

        for (total, paid, due, expected) in cases {
            let got = StatusReconciler::derived_status(&input(total, paid, due, StatusCode::Unpaid));
            assert_eq!(got, expected, "total={} paid={} due={:+}d", total, paid, due);
        }
    }

    #[test]
    fn test_zero_total_invoice_is_paid() {
        let got = StatusReconciler::derived_status(&input(dec!(0), dec!(0), -3, StatusCode::Unpaid));
        assert_eq!(got, StatusCode::Paid);
    }

    #[test]
    fn test_cancelled_is_frozen() {
        let reconciler = StatusReconciler::new(DunningPolicy::Transient);
        let outcome = reconciler.decide(&input(dec!(100), dec!(100), 1, StatusCode::Cancelled));

        assert_eq!(
            outcome,
            ReconcileOutcome::Frozen {
                status: StatusCode::Cancelled
            }
        );
    }

    #[test]
    fn test_dunning_policies() {
        let owed = input(dec!(100), dec!(40), -30, StatusCode::Dunning);
        let settled = input(dec!(100), dec!(100), -30, StatusCode::Dunning);

        let sticky = StatusReconciler::new(DunningPolicy::Sticky);
        assert_eq!(sticky.target_status(&owed), None);
        assert_eq!(sticky.target_status(&settled), None);

        let release = StatusReconciler::new(DunningPolicy::ReleaseOnPaid);
        assert_eq!(release.target_status(&owed), None);
        assert_eq!(release.target_status(&settled), Some(StatusCode::Paid));

        let transient = StatusReconciler::new(DunningPolicy::Transient);
        assert_eq!(transient.target_status(&owed), Some(StatusCode::Partial));
    }

    #[test]
    fn test_reconcile_writes_once() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let clock = FixedClock::on_date(today());

        let invoice = insert_invoice(
            &conn,
            &NewInvoice {
                member_id: MemberId(1),
                number: "INV-100".to_string(),
                issue_date: today(),
                due_date: today() + Duration::days(10),
                total_amount: dec!(1000),
                lines: Vec::new(),
            },
            clock.now(),
        )
        .unwrap();
        let payment =
            insert_payment(&conn, &NewPayment::manual(MemberId(1), today(), dec!(1000))).unwrap();
        insert_allocation(&conn, payment.id, invoice.id, dec!(200)).unwrap();

        let reconciler = StatusReconciler::default();

        clock.advance(Duration::minutes(5));
        let first = reconciler.reconcile(&conn, invoice.id, &clock).unwrap();
        assert_eq!(
            first,
            ReconcileOutcome::Updated {
                from: StatusCode::Unpaid,
                to: StatusCode::Partial
            }
        );
        let stamped = db::require_invoice(&conn, invoice.id).unwrap().updated_at;
        assert_eq!(stamped, clock.now());

        clock.advance(Duration::minutes(5));
        let second = reconciler.reconcile(&conn, invoice.id, &clock).unwrap();
        assert_eq!(
            second,
            ReconcileOutcome::Unchanged {
                status: StatusCode::Partial
            }
        );
        // no second write: timestamp untouched
        assert_eq!(db::require_invoice(&conn, invoice.id).unwrap().updated_at, stamped);
    }

    #[test]
    fn test_reconcile_missing_invoice_is_noop() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let clock = FixedClock::on_date(today());

        let outcome = StatusReconciler::default()
            .reconcile(&conn, InvoiceId(404), &clock)
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Missing);
        assert!(!outcome.changed());
        assert_eq!(outcome.status(), None);
    }
}

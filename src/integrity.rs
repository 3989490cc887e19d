// 🩺 Integrity Checker - audits the store against the ledger invariants
//
// Read-only. Finds what the ledger should have made impossible (money spent
// twice, dangling allocations) and what can drift over time (stale status
// because the calendar moved, totals out of line with their line items).

use crate::db;
use crate::entities::{sum_amounts, InvoiceId, PaymentId, StatusCode};
use crate::error::LedgerResult;
use crate::reconciliation::{DunningPolicy, ReconcileOutcome, StatusInput, StatusReconciler};
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // An invariant is broken, money figures cannot be trusted
    Warning,  // Fixable by a reconcile or line-item edit
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub severity: Severity,
    pub check: String,
    pub entity: String,
    pub message: String,
}

impl IntegrityIssue {
    fn critical(check: &str, entity: String, message: String) -> Self {
        IntegrityIssue {
            severity: Severity::Critical,
            check: check.to_string(),
            entity,
            message,
        }
    }

    fn warning(check: &str, entity: String, message: String) -> Self {
        IntegrityIssue {
            severity: Severity::Warning,
            check: check.to_string(),
            entity,
            message,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub invoices_checked: usize,
    pub payments_checked: usize,
    pub allocations_checked: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn critical_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Checked {} invoices, {} payments, {} allocations: {} issue(s) ({} critical)",
            self.invoices_checked,
            self.payments_checked,
            self.allocations_checked,
            self.issues.len(),
            self.critical_count()
        )
    }
}

// ============================================================================
// CHECKER
// ============================================================================

pub struct IntegrityChecker {
    reconciler: StatusReconciler,
}

impl IntegrityChecker {
    pub fn new(dunning_policy: DunningPolicy) -> Self {
        IntegrityChecker {
            reconciler: StatusReconciler::new(dunning_policy),
        }
    }

    /// Run every check. `today` decides which invoices should be OVERDUE.
    pub fn check(&self, conn: &Connection, today: NaiveDate) -> LedgerResult<IntegrityReport> {
        let invoices = db::get_all_invoices(conn)?;
        let payments = db::get_all_payments(conn)?;
        let allocations = db::get_all_allocations(conn)?;

        let mut report = IntegrityReport {
            invoices_checked: invoices.len(),
            payments_checked: payments.len(),
            allocations_checked: allocations.len(),
            issues: Vec::new(),
        };

        let invoice_ids: HashSet<InvoiceId> = invoices.iter().map(|i| i.id).collect();
        let payment_ids: HashSet<PaymentId> = payments.iter().map(|p| p.id).collect();

        let mut per_payment: HashMap<PaymentId, Vec<Decimal>> = HashMap::new();
        let mut per_invoice: HashMap<InvoiceId, Vec<Decimal>> = HashMap::new();
        let mut pairs = HashSet::new();

        for allocation in &allocations {
            let entity = format!("allocation {}", allocation.id);

            if allocation.amount <= Decimal::ZERO {
                report.issues.push(IntegrityIssue::critical(
                    "non_positive_allocation",
                    entity.clone(),
                    format!("amount is {}", allocation.amount),
                ));
            }
            if !payment_ids.contains(&allocation.payment_id) {
                report.issues.push(IntegrityIssue::critical(
                    "dangling_allocation",
                    entity.clone(),
                    format!("payment {} does not exist", allocation.payment_id),
                ));
            }
            if !invoice_ids.contains(&allocation.invoice_id) {
                report.issues.push(IntegrityIssue::critical(
                    "dangling_allocation",
                    entity.clone(),
                    format!("invoice {} does not exist", allocation.invoice_id),
                ));
            }
            if !pairs.insert((allocation.payment_id, allocation.invoice_id)) {
                report.issues.push(IntegrityIssue::critical(
                    "duplicate_allocation",
                    entity,
                    format!(
                        "payment {} allocated to invoice {} more than once",
                        allocation.payment_id, allocation.invoice_id
                    ),
                ));
            }

            per_payment
                .entry(allocation.payment_id)
                .or_default()
                .push(allocation.amount);
            per_invoice
                .entry(allocation.invoice_id)
                .or_default()
                .push(allocation.amount);
        }

        for payment in &payments {
            let allocated = sum_amounts(
                per_payment
                    .get(&payment.id)
                    .into_iter()
                    .flatten()
                    .copied(),
            );
            if allocated > payment.amount {
                report.issues.push(IntegrityIssue::critical(
                    "overallocated_payment",
                    format!("payment {}", payment.id),
                    format!("allocated {} exceeds amount {}", allocated, payment.amount),
                ));
            }
        }

        for invoice in &invoices {
            let entity = format!("invoice {}", invoice.id);

            let lines = db::get_invoice_lines(conn, invoice.id)?;
            if !lines.is_empty() {
                let from_lines = sum_amounts(lines.iter().map(|l| l.line_total()));
                if from_lines != invoice.total_amount {
                    report.issues.push(IntegrityIssue::warning(
                        "total_mismatch",
                        entity.clone(),
                        format!(
                            "total {} but line items sum to {}",
                            invoice.total_amount, from_lines
                        ),
                    ));
                }
            }

            let paid = sum_amounts(
                per_invoice
                    .get(&invoice.id)
                    .into_iter()
                    .flatten()
                    .copied(),
            );
            let input = StatusInput::for_invoice(invoice, paid, today);
            if let ReconcileOutcome::Updated { from, to } = self.reconciler.decide(&input) {
                report.issues.push(IntegrityIssue::warning(
                    "stale_status",
                    entity,
                    format!("stored {} but should be {}", from, to),
                ));
            }
        }

        Ok(report)
    }
}

impl Default for IntegrityChecker {
    fn default() -> Self {
        Self::new(DunningPolicy::default())
    }
}

/// Count of invoices per stored status, for reporting
pub fn status_breakdown(conn: &Connection) -> LedgerResult<Vec<(StatusCode, usize)>> {
    let invoices = db::get_all_invoices(conn)?;
    Ok(StatusCode::ALL
        .iter()
        .map(|code| {
            let n = invoices.iter().filter(|i| i.status == *code).count();
            (*code, n)
        })
        .collect())
}

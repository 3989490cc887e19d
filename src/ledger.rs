// 📒 Allocation Ledger - the only way allocation rows are created or removed
//
// Every mutating call is one unit of work:
//   1. take the per-payment lock
//   2. open an IMMEDIATE transaction
//   3. validate (nothing written yet, so any error leaves the store untouched)
//   4. write allocation rows
//   5. reconcile each affected invoice
//   6. bump the payment version token (fails if it moved under us)
//   7. record the audit entry
//   8. commit
//
// Conservation: for every payment, Σ allocations <= payment.amount.
// Invoices are NOT capped - overpayment simply reconciles to PAID.

use crate::audit::{AuditEntry, AuditSink, SqliteAuditSink};
use crate::config::LedgerConfig;
use crate::db;
use crate::entities::{
    round_currency, sum_amounts, Allocation, AllocationId, AllocationLine, InvoiceId, Payment,
    PaymentId, StatusCode,
};
use crate::error::{LedgerError, LedgerResult};
use crate::locks::PaymentLocks;
use crate::reconciliation::{DunningPolicy, ReconcileOutcome, StatusInput, StatusReconciler};
use crate::temporal::{Clock, SystemClock};
use chrono::NaiveDate;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) const PAYMENT_ENTITY: &str = "payment";

// ============================================================================
// READ MODELS
// ============================================================================

/// Derived balance of one invoice, always recomputed from allocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceBalance {
    pub invoice_id: InvoiceId,
    pub total: Decimal,
    pub paid: Decimal,

    /// total - paid, never below zero
    pub remaining: Decimal,

    /// paid - total, never below zero
    pub overpaid: Decimal,

    /// Stored status. Lags behind the calendar until the next reconcile or
    /// sweep (an unpaid invoice stays UNPAID after its due date passes).
    pub status: StatusCode,

    /// Status the reconciler would write today
    pub effective_status: StatusCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentBalance {
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub allocated: Decimal,
    pub unallocated: Decimal,
}

/// Result of a successful replace_allocations call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceOutcome {
    pub allocation_ids: Vec<AllocationId>,

    /// One entry per invoice in before ∪ after
    pub reconciled: Vec<(InvoiceId, ReconcileOutcome)>,
}

// ============================================================================
// LEDGER
// ============================================================================

pub struct AllocationLedger {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) reconciler: StatusReconciler,
    pub(crate) locks: PaymentLocks,
}

impl AllocationLedger {
    pub fn new(clock: Arc<dyn Clock>, audit: Arc<dyn AuditSink>) -> Self {
        AllocationLedger {
            clock,
            audit,
            reconciler: StatusReconciler::default(),
            locks: PaymentLocks::new(),
        }
    }

    /// Wall clock + events-table audit sink, policy from config
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(SqliteAuditSink))
            .with_dunning_policy(config.dunning_policy)
    }

    pub fn with_dunning_policy(mut self, policy: DunningPolicy) -> Self {
        self.reconciler = StatusReconciler::new(policy);
        self
    }

    pub fn dunning_policy(&self) -> DunningPolicy {
        self.reconciler.dunning_policy
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn begin<'c>(&self, conn: &'c mut Connection) -> LedgerResult<Transaction<'c>> {
        Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    pub(crate) fn reconcile_in(
        &self,
        conn: &Connection,
        invoice_id: InvoiceId,
    ) -> LedgerResult<ReconcileOutcome> {
        self.reconciler.reconcile(conn, invoice_id, self.clock.as_ref())
    }

    pub(crate) fn record_audit(&self, conn: &Connection, entry: &AuditEntry) -> LedgerResult<()> {
        self.audit.record(conn, entry).map_err(|e| match e {
            LedgerError::Audit(msg) => LedgerError::Audit(msg),
            other => LedgerError::Audit(other.to_string()),
        })
    }

    // ========================================================================
    // ADD
    // ========================================================================

    /// Apply `amount` of a payment to an invoice.
    pub fn add_allocation(
        &self,
        conn: &mut Connection,
        actor: &str,
        payment_id: PaymentId,
        invoice_id: InvoiceId,
        amount: Decimal,
    ) -> LedgerResult<AllocationId> {
        let amount = round_currency(amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount { amount });
        }

        let _guard = self.locks.acquire(payment_id);
        let tx = self.begin(conn)?;

        let payment = db::require_payment(&tx, payment_id)?;
        db::require_invoice(&tx, invoice_id)?;

        let existing = db::allocations_for_payment(&tx, payment_id)?;
        if existing.iter().any(|a| a.invoice_id == invoice_id) {
            return Err(LedgerError::DuplicateAllocation {
                payment_id: payment_id.get(),
                invoice_id: invoice_id.get(),
            });
        }

        let allocated = sum_amounts(existing.iter().map(|a| a.amount));
        let remaining = payment.amount - allocated;
        if amount > remaining {
            return Err(LedgerError::OverAllocation {
                requested: amount,
                remaining,
            });
        }

        let allocation_id = db::insert_allocation(&tx, payment_id, invoice_id, amount)?;
        let outcome = self.reconcile_in(&tx, invoice_id)?;
        db::bump_payment_version(&tx, payment_id, payment.version)?;

        let before = snapshot(&existing);
        let mut after = before.clone();
        after.push(AllocationLine::new(invoice_id, amount));

        let entry = AuditEntry::new(
            actor,
            "allocation_added",
            PAYMENT_ENTITY,
            payment_id,
            format!(
                "Allocated {} of payment {} to invoice {}",
                amount, payment_id, invoice_id
            ),
            serde_json::to_value(&before)?,
            serde_json::to_value(&after)?,
            self.clock.now(),
        );
        self.record_audit(&tx, &entry)?;

        tx.commit()?;

        info!(
            payment_id = %payment_id,
            invoice_id = %invoice_id,
            allocation_id = %allocation_id,
            amount = %amount,
            status = ?outcome.status(),
            "allocation added"
        );
        Ok(allocation_id)
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    /// Remove one allocation of a payment.
    pub fn delete_allocation(
        &self,
        conn: &mut Connection,
        actor: &str,
        payment_id: PaymentId,
        allocation_id: AllocationId,
    ) -> LedgerResult<()> {
        let _guard = self.locks.acquire(payment_id);
        let tx = self.begin(conn)?;

        let payment = db::require_payment(&tx, payment_id)?;
        let allocation = db::get_allocation(&tx, allocation_id)?
            .filter(|a| a.payment_id == payment_id)
            .ok_or_else(|| LedgerError::not_found(AllocationId::ENTITY, allocation_id.get()))?;

        let existing = db::allocations_for_payment(&tx, payment_id)?;

        db::delete_allocation_row(&tx, allocation_id)?;
        let outcome = self.reconcile_in(&tx, allocation.invoice_id)?;
        db::bump_payment_version(&tx, payment_id, payment.version)?;

        let before = snapshot(&existing);
        let after: Vec<AllocationLine> = existing
            .iter()
            .filter(|a| a.id != allocation_id)
            .map(AllocationLine::from)
            .collect();

        let entry = AuditEntry::new(
            actor,
            "allocation_deleted",
            PAYMENT_ENTITY,
            payment_id,
            format!(
                "Removed allocation {} ({} to invoice {}) from payment {}",
                allocation_id, allocation.amount, allocation.invoice_id, payment_id
            ),
            serde_json::json!({
                "allocations": before,
                "removed": allocation,
            }),
            serde_json::to_value(&after)?,
            self.clock.now(),
        );
        self.record_audit(&tx, &entry)?;

        tx.commit()?;

        info!(
            payment_id = %payment_id,
            invoice_id = %allocation.invoice_id,
            allocation_id = %allocation_id,
            amount = %allocation.amount,
            status = ?outcome.status(),
            "allocation deleted"
        );
        Ok(())
    }

    // ========================================================================
    // REPLACE
    // ========================================================================

    /// Re-specify the complete allocation set of a payment (empty = clear).
    pub fn replace_allocations(
        &self,
        conn: &mut Connection,
        actor: &str,
        payment_id: PaymentId,
        lines: &[AllocationLine],
    ) -> LedgerResult<ReplaceOutcome> {
        let _guard = self.locks.acquire(payment_id);
        let tx = self.begin(conn)?;

        let payment = db::require_payment(&tx, payment_id)?;
        let lines = validate_batch(&tx, &payment, lines)?;

        let existing = db::allocations_for_payment(&tx, payment_id)?;
        let before_ids: BTreeSet<InvoiceId> = existing.iter().map(|a| a.invoice_id).collect();
        let after_ids: BTreeSet<InvoiceId> = lines.iter().map(|l| l.invoice_id).collect();

        db::delete_allocations_for_payment(&tx, payment_id)?;

        let mut allocation_ids = Vec::with_capacity(lines.len());
        for line in &lines {
            allocation_ids.push(db::insert_allocation(
                &tx,
                payment_id,
                line.invoice_id,
                line.amount,
            )?);
        }

        let mut reconciled = Vec::new();
        for invoice_id in before_ids.union(&after_ids) {
            let outcome = self.reconcile_in(&tx, *invoice_id)?;
            reconciled.push((*invoice_id, outcome));
        }

        db::bump_payment_version(&tx, payment_id, payment.version)?;

        let before = snapshot(&existing);
        let total = sum_amounts(lines.iter().map(|l| l.amount));
        let entry = AuditEntry::new(
            actor,
            "allocations_replaced",
            PAYMENT_ENTITY,
            payment_id,
            format!(
                "Replaced {} allocation(s) of payment {} with {} line(s) totalling {}",
                before.len(),
                payment_id,
                lines.len(),
                total
            ),
            serde_json::to_value(&before)?,
            serde_json::to_value(&lines)?,
            self.clock.now(),
        );
        self.record_audit(&tx, &entry)?;

        tx.commit()?;

        info!(
            payment_id = %payment_id,
            before = before_ids.len(),
            after = after_ids.len(),
            allocated = %total,
            "allocations replaced"
        );
        Ok(ReplaceOutcome {
            allocation_ids,
            reconciled,
        })
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Balance of an invoice from its current allocations (never cached).
    pub fn invoice_balance(
        &self,
        conn: &Connection,
        invoice_id: InvoiceId,
    ) -> LedgerResult<InvoiceBalance> {
        invoice_balance(conn, invoice_id, &self.reconciler, self.clock.today())
    }

    pub fn payment_balance(
        &self,
        conn: &Connection,
        payment_id: PaymentId,
    ) -> LedgerResult<PaymentBalance> {
        payment_balance(conn, payment_id)
    }
}

/// Balance of an invoice as of `today`. Read-only: the effective status is
/// reported, not written.
pub fn invoice_balance(
    conn: &Connection,
    invoice_id: InvoiceId,
    reconciler: &StatusReconciler,
    today: NaiveDate,
) -> LedgerResult<InvoiceBalance> {
    let invoice = db::require_invoice(conn, invoice_id)?;
    let paid = db::allocated_to_invoice(conn, invoice_id)?;
    let input = StatusInput::for_invoice(&invoice, paid, today);
    let effective_status = reconciler.target_status(&input).unwrap_or(invoice.status);

    Ok(InvoiceBalance {
        invoice_id,
        total: invoice.total_amount,
        paid,
        remaining: (invoice.total_amount - paid).max(Decimal::ZERO),
        overpaid: (paid - invoice.total_amount).max(Decimal::ZERO),
        status: invoice.status,
        effective_status,
    })
}

pub fn payment_balance(conn: &Connection, payment_id: PaymentId) -> LedgerResult<PaymentBalance> {
    let payment = db::require_payment(conn, payment_id)?;
    let allocated = db::allocated_from_payment(conn, payment_id)?;

    if allocated > payment.amount {
        warn!(payment_id = %payment_id, allocated = %allocated, amount = %payment.amount,
            "payment is over-allocated");
    }

    Ok(PaymentBalance {
        payment_id,
        amount: payment.amount,
        allocated,
        unallocated: payment.amount - allocated,
    })
}

fn snapshot(allocations: &[Allocation]) -> Vec<AllocationLine> {
    allocations.iter().map(AllocationLine::from).collect()
}

/// Whole-batch validation for replace_allocations. Returns the lines with
/// amounts rounded to currency precision.
fn validate_batch(
    conn: &Connection,
    payment: &Payment,
    lines: &[AllocationLine],
) -> LedgerResult<Vec<AllocationLine>> {
    let lines: Vec<AllocationLine> = lines
        .iter()
        .map(|l| AllocationLine::new(l.invoice_id, round_currency(l.amount)))
        .collect();

    if let Some(bad) = lines.iter().find(|l| l.amount <= Decimal::ZERO) {
        return Err(LedgerError::InvalidAmount { amount: bad.amount });
    }

    let mut seen = HashSet::new();
    for line in &lines {
        if !seen.insert(line.invoice_id) {
            return Err(LedgerError::DuplicateAllocation {
                payment_id: payment.id.get(),
                invoice_id: line.invoice_id.get(),
            });
        }
    }

    for line in &lines {
        if !db::invoice_exists(conn, line.invoice_id)? {
            return Err(LedgerError::InvalidInvoice {
                invoice_id: line.invoice_id.get(),
            });
        }
    }

    let requested = sum_amounts(lines.iter().map(|l| l.amount));
    if requested > payment.amount {
        return Err(LedgerError::OverAllocation {
            requested,
            remaining: payment.amount,
        });
    }

    Ok(lines)
}

// 🛠️ Administrative operations - invoice-side writes around the ledger
//
// Recording invoices and payments, manual status overrides (collections,
// cancellation), line-item replacement and the overdue sweep. Same unit of
// work rules as the allocation operations: one transaction, audited.

use crate::audit::AuditEntry;
use crate::db::{self, ImportSummary};
use crate::entities::invoice::compute_total;
use crate::entities::{Invoice, InvoiceId, NewInvoice, NewInvoiceLine, NewPayment, Payment, StatusCode};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{AllocationLedger, PAYMENT_ENTITY};
use crate::reconciliation::ReconcileOutcome;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

const INVOICE_ENTITY: &str = "invoice";

/// Result of a manual status override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub invoice_id: InvoiceId,
    pub from: StatusCode,
    pub to: StatusCode,
}

impl StatusChange {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinesReplaced {
    pub invoice_id: InvoiceId,
    pub total: Decimal,
    pub reconciled: ReconcileOutcome,
}

/// What a sweep over open invoices did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub examined: usize,
    pub unchanged: usize,
    pub frozen: usize,
    pub transitions: Vec<StatusChange>,
}

impl SweepSummary {
    pub fn updated(&self) -> usize {
        self.transitions.len()
    }
}

impl AllocationLedger {
    // ========================================================================
    // RECORDING
    // ========================================================================

    /// Create an invoice (status UNPAID), audited.
    pub fn create_invoice(
        &self,
        conn: &mut Connection,
        actor: &str,
        invoice: &NewInvoice,
    ) -> LedgerResult<Invoice> {
        let tx = self.begin(conn)?;
        let created = db::insert_invoice(&tx, invoice, self.clock.now())?;

        let entry = AuditEntry::new(
            actor,
            "invoice_created",
            INVOICE_ENTITY,
            created.id,
            format!(
                "Issued invoice {} for member {} totalling {}",
                created.number, created.member_id, created.total_amount
            ),
            serde_json::Value::Null,
            serde_json::to_value(&created)?,
            self.clock.now(),
        );
        self.record_audit(&tx, &entry)?;
        tx.commit()?;

        info!(invoice_id = %created.id, number = %created.number, "invoice created");
        Ok(created)
    }

    /// Record money received. The amount is fixed from here on.
    pub fn record_payment(
        &self,
        conn: &mut Connection,
        actor: &str,
        payment: &NewPayment,
    ) -> LedgerResult<Payment> {
        let tx = self.begin(conn)?;
        let recorded = db::insert_payment(&tx, payment)?;

        let entry = AuditEntry::new(
            actor,
            "payment_recorded",
            PAYMENT_ENTITY,
            recorded.id,
            format!(
                "Recorded payment of {} from member {}",
                recorded.amount, recorded.member_id
            ),
            serde_json::Value::Null,
            serde_json::to_value(&recorded)?,
            self.clock.now(),
        );
        self.record_audit(&tx, &entry)?;
        tx.commit()?;

        info!(payment_id = %recorded.id, amount = %recorded.amount, "payment recorded");
        Ok(recorded)
    }

    /// Bulk import; rows already imported (same hash) are skipped.
    pub fn import_payments(
        &self,
        conn: &mut Connection,
        actor: &str,
        batch: &str,
        payments: &[NewPayment],
    ) -> LedgerResult<ImportSummary> {
        let tx = self.begin(conn)?;
        let summary = db::insert_payments(&tx, payments)?;

        let entry = AuditEntry::new(
            actor,
            "payments_imported",
            "import_batch",
            batch,
            format!(
                "Imported {} payment(s), skipped {} duplicate(s)",
                summary.inserted, summary.duplicates
            ),
            serde_json::Value::Null,
            serde_json::json!({
                "inserted": summary.inserted,
                "duplicates": summary.duplicates,
            }),
            self.clock.now(),
        );
        self.record_audit(&tx, &entry)?;
        tx.commit()?;

        Ok(summary)
    }

    // ========================================================================
    // MANUAL STATUS
    // ========================================================================

    /// Administrative override, e.g. moving an invoice into collections.
    /// CANCELLED is terminal.
    pub fn set_invoice_status(
        &self,
        conn: &mut Connection,
        actor: &str,
        invoice_id: InvoiceId,
        status: StatusCode,
    ) -> LedgerResult<StatusChange> {
        let tx = self.begin(conn)?;
        let invoice = db::require_invoice(&tx, invoice_id)?;

        let change = StatusChange {
            invoice_id,
            from: invoice.status,
            to: status,
        };
        if !change.changed() {
            return Ok(change);
        }
        if invoice.status.is_terminal() {
            return Err(LedgerError::InvoiceLocked {
                invoice_id: invoice_id.get(),
                status: invoice.status.to_string(),
            });
        }

        db::update_invoice_status(&tx, invoice_id, status, self.clock.now())?;

        let entry = AuditEntry::new(
            actor,
            "invoice_status_set",
            INVOICE_ENTITY,
            invoice_id,
            format!("Invoice {} set from {} to {}", invoice.number, change.from, status),
            serde_json::json!({ "status": change.from }),
            serde_json::json!({ "status": status }),
            self.clock.now(),
        );
        self.record_audit(&tx, &entry)?;
        tx.commit()?;

        info!(invoice_id = %invoice_id, from = %change.from, to = %status, "invoice status overridden");
        Ok(change)
    }

    // ========================================================================
    // LINE ITEMS
    // ========================================================================

    /// Replace the line items of an invoice and recompute its total.
    pub fn replace_invoice_lines(
        &self,
        conn: &mut Connection,
        actor: &str,
        invoice_id: InvoiceId,
        lines: &[NewInvoiceLine],
    ) -> LedgerResult<LinesReplaced> {
        if lines.is_empty() {
            return Err(LedgerError::InvalidLineItem(
                "an invoice needs at least one line item".to_string(),
            ));
        }
        for line in lines {
            line.validate().map_err(LedgerError::InvalidLineItem)?;
        }

        let tx = self.begin(conn)?;
        let invoice = db::require_invoice(&tx, invoice_id)?;
        if invoice.status.locks_line_items() {
            return Err(LedgerError::InvoiceLocked {
                invoice_id: invoice_id.get(),
                status: invoice.status.to_string(),
            });
        }

        let before = db::get_invoice_lines(&tx, invoice_id)?;
        let total = compute_total(lines);
        db::write_invoice_lines(&tx, invoice_id, lines, total, self.clock.now())?;
        let reconciled = self.reconcile_in(&tx, invoice_id)?;

        let entry = AuditEntry::new(
            actor,
            "invoice_lines_replaced",
            INVOICE_ENTITY,
            invoice_id,
            format!(
                "Invoice {} total changed from {} to {}",
                invoice.number, invoice.total_amount, total
            ),
            serde_json::json!({ "total": invoice.total_amount, "lines": before }),
            serde_json::json!({ "total": total, "lines": lines }),
            self.clock.now(),
        );
        self.record_audit(&tx, &entry)?;
        tx.commit()?;

        Ok(LinesReplaced {
            invoice_id,
            total,
            reconciled,
        })
    }

    // ========================================================================
    // RECONCILIATION ON DEMAND
    // ========================================================================

    /// Run the reconciler for one invoice in its own unit of work.
    pub fn reconcile_invoice(
        &self,
        conn: &mut Connection,
        actor: &str,
        invoice_id: InvoiceId,
    ) -> LedgerResult<ReconcileOutcome> {
        let tx = self.begin(conn)?;
        let outcome = self.reconcile_in(&tx, invoice_id)?;

        if let ReconcileOutcome::Updated { from, to } = outcome {
            self.record_status_transition(&tx, actor, StatusChange { invoice_id, from, to })?;
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Reconcile every non-cancelled invoice, e.g. once a day so unpaid
    /// invoices cross into OVERDUE without waiting for an allocation change.
    pub fn reconcile_open_invoices(
        &self,
        conn: &mut Connection,
        actor: &str,
    ) -> LedgerResult<SweepSummary> {
        let tx = self.begin(conn)?;
        let mut summary = SweepSummary::default();

        for invoice_id in db::open_invoice_ids(&tx)? {
            summary.examined += 1;
            match self.reconcile_in(&tx, invoice_id)? {
                ReconcileOutcome::Updated { from, to } => {
                    let change = StatusChange { invoice_id, from, to };
                    self.record_status_transition(&tx, actor, change)?;
                    summary.transitions.push(change);
                }
                ReconcileOutcome::Frozen { .. } => summary.frozen += 1,
                ReconcileOutcome::Unchanged { .. } | ReconcileOutcome::Missing => {
                    summary.unchanged += 1
                }
            }
        }

        tx.commit()?;

        info!(
            examined = summary.examined,
            updated = summary.updated(),
            frozen = summary.frozen,
            "status sweep finished"
        );
        Ok(summary)
    }

    fn record_status_transition(
        &self,
        conn: &Connection,
        actor: &str,
        change: StatusChange,
    ) -> LedgerResult<()> {
        let entry = AuditEntry::new(
            actor,
            "invoice_status_reconciled",
            INVOICE_ENTITY,
            change.invoice_id,
            format!(
                "Invoice {} moved from {} to {}",
                change.invoice_id, change.from, change.to
            ),
            serde_json::json!({ "status": change.from }),
            serde_json::json!({ "status": change.to }),
            self.clock.now(),
        );
        self.record_audit(conn, &entry)
    }
}

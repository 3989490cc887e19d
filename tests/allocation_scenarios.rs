// End-to-end ledger behavior through the public API

use billing_ledger::{
    db, AllocationLedger, AllocationLine, AuditEntry, AuditSink, FixedClock, IntegrityChecker,
    Invoice, LedgerError, LedgerResult, MemberId, NewInvoice, NewPayment, Payment, PaymentId,
    SqliteAuditSink, StatusCode,
};
use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 4, 10).unwrap()
}

fn setup() -> (Connection, AllocationLedger) {
    let conn = Connection::open_in_memory().unwrap();
    db::setup_database(&conn).unwrap();
    let ledger = AllocationLedger::new(
        Arc::new(FixedClock::on_date(today())),
        Arc::new(SqliteAuditSink),
    );
    (conn, ledger)
}

fn invoice(
    conn: &mut Connection,
    ledger: &AllocationLedger,
    number: &str,
    total: Decimal,
    due_in_days: i64,
) -> Invoice {
    ledger
        .create_invoice(
            conn,
            "test",
            &NewInvoice {
                member_id: MemberId(1),
                number: number.to_string(),
                issue_date: today() - Duration::days(30),
                due_date: today() + Duration::days(due_in_days),
                total_amount: total,
                lines: Vec::new(),
            },
        )
        .unwrap()
}

fn payment(conn: &mut Connection, ledger: &AllocationLedger, amount: Decimal) -> Payment {
    ledger
        .record_payment(conn, "test", &NewPayment::manual(MemberId(1), today(), amount))
        .unwrap()
}

fn status(conn: &Connection, invoice: &Invoice) -> StatusCode {
    db::require_invoice(conn, invoice.id).unwrap().status
}

#[test]
fn test_partial_then_paid() {
    let (mut conn, ledger) = setup();
    let inv = invoice(&mut conn, &ledger, "INV-A", dec!(1000), 10);
    let pay = payment(&mut conn, &ledger, dec!(1000));

    ledger
        .add_allocation(&mut conn, "test", pay.id, inv.id, dec!(200))
        .unwrap();
    assert_eq!(status(&conn, &inv), StatusCode::Partial);

    ledger
        .replace_allocations(
            &mut conn,
            "test",
            pay.id,
            &[AllocationLine::new(inv.id, dec!(1000))],
        )
        .unwrap();
    assert_eq!(status(&conn, &inv), StatusCode::Paid);

    let balance = ledger.invoice_balance(&conn, inv.id).unwrap();
    assert_eq!(balance.paid, dec!(1000));
    assert_eq!(balance.remaining, Decimal::ZERO);

    println!("✅ partial then paid passed");
}

#[test]
fn test_clearing_allocations_on_past_due_invoice_gives_overdue() {
    let (mut conn, ledger) = setup();
    let inv = invoice(&mut conn, &ledger, "INV-B", dec!(1000), -1);
    let pay = payment(&mut conn, &ledger, dec!(1000));

    ledger
        .add_allocation(&mut conn, "test", pay.id, inv.id, dec!(100))
        .unwrap();
    assert_eq!(status(&conn, &inv), StatusCode::Partial);

    let outcome = ledger
        .replace_allocations(&mut conn, "test", pay.id, &[])
        .unwrap();
    assert!(outcome.allocation_ids.is_empty());
    assert_eq!(outcome.reconciled.len(), 1);

    assert_eq!(ledger.invoice_balance(&conn, inv.id).unwrap().paid, Decimal::ZERO);
    assert_eq!(status(&conn, &inv), StatusCode::Overdue);
}

#[test]
fn test_over_allocation_writes_nothing() {
    let (mut conn, ledger) = setup();
    let a = invoice(&mut conn, &ledger, "INV-C1", dec!(500), 10);
    let b = invoice(&mut conn, &ledger, "INV-C2", dec!(500), 10);
    let pay = payment(&mut conn, &ledger, dec!(300));

    ledger
        .add_allocation(&mut conn, "test", pay.id, a.id, dec!(250))
        .unwrap();
    let events_before = db::verify_counts(&conn).unwrap().events;

    let err = ledger
        .add_allocation(&mut conn, "test", pay.id, b.id, dec!(100))
        .unwrap_err();
    match err {
        LedgerError::OverAllocation {
            requested,
            remaining,
        } => {
            assert_eq!(requested, dec!(100));
            assert_eq!(remaining, dec!(50));
        }
        other => panic!("expected OverAllocation, got {:?}", other),
    }

    assert!(db::allocations_for_invoice(&conn, b.id).unwrap().is_empty());
    assert_eq!(status(&conn, &b), StatusCode::Unpaid);
    assert_eq!(db::verify_counts(&conn).unwrap().events, events_before);

    // exactly the remaining headroom is fine
    ledger
        .add_allocation(&mut conn, "test", pay.id, b.id, dec!(50))
        .unwrap();
    assert_eq!(
        ledger.payment_balance(&conn, pay.id).unwrap().unallocated,
        Decimal::ZERO
    );
}

#[test]
fn test_batch_with_unknown_invoice_is_rejected_whole() {
    let (mut conn, ledger) = setup();
    let a = invoice(&mut conn, &ledger, "INV-D1", dec!(400), 10);
    let b = invoice(&mut conn, &ledger, "INV-D2", dec!(400), 10);
    let pay = payment(&mut conn, &ledger, dec!(800));

    ledger
        .add_allocation(&mut conn, "test", pay.id, a.id, dec!(400))
        .unwrap();
    let before = db::allocations_for_payment(&conn, pay.id).unwrap();
    let version_before = db::require_payment(&conn, pay.id).unwrap().version;

    let err = ledger
        .replace_allocations(
            &mut conn,
            "test",
            pay.id,
            &[
                AllocationLine::new(b.id, dec!(100)),
                AllocationLine::new(billing_ledger::InvoiceId(9_999), dec!(100)),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInvoice { invoice_id: 9_999 }));

    assert_eq!(db::allocations_for_payment(&conn, pay.id).unwrap(), before);
    assert_eq!(status(&conn, &a), StatusCode::Paid);
    assert_eq!(status(&conn, &b), StatusCode::Unpaid);
    assert_eq!(
        db::require_payment(&conn, pay.id).unwrap().version,
        version_before
    );
}

#[test]
fn test_overpayment_across_payments_is_paid() {
    let (mut conn, ledger) = setup();
    let inv = invoice(&mut conn, &ledger, "INV-E", dec!(100), 10);
    let p1 = payment(&mut conn, &ledger, dec!(80));
    let p2 = payment(&mut conn, &ledger, dec!(80));

    ledger
        .add_allocation(&mut conn, "test", p1.id, inv.id, dec!(80))
        .unwrap();
    ledger
        .add_allocation(&mut conn, "test", p2.id, inv.id, dec!(80))
        .unwrap();

    let balance = ledger.invoice_balance(&conn, inv.id).unwrap();
    assert_eq!(balance.status, StatusCode::Paid);
    assert_eq!(balance.paid, dec!(160));
    assert_eq!(balance.remaining, Decimal::ZERO);
    assert_eq!(balance.overpaid, dec!(60));
}

#[test]
fn test_duplicate_pair_is_rejected() {
    let (mut conn, ledger) = setup();
    let inv = invoice(&mut conn, &ledger, "INV-F", dec!(100), 10);
    let pay = payment(&mut conn, &ledger, dec!(100));

    ledger
        .add_allocation(&mut conn, "test", pay.id, inv.id, dec!(10))
        .unwrap();
    let err = ledger
        .add_allocation(&mut conn, "test", pay.id, inv.id, dec!(10))
        .unwrap_err();

    assert!(matches!(err, LedgerError::DuplicateAllocation { .. }));
    assert_eq!(db::allocations_for_payment(&conn, pay.id).unwrap().len(), 1);
}

#[test]
fn test_cancelled_invoice_keeps_status() {
    let (mut conn, ledger) = setup();
    let inv = invoice(&mut conn, &ledger, "INV-G", dec!(100), -5);
    let pay = payment(&mut conn, &ledger, dec!(100));

    ledger
        .set_invoice_status(&mut conn, "admin", inv.id, StatusCode::Cancelled)
        .unwrap();
    ledger
        .add_allocation(&mut conn, "test", pay.id, inv.id, dec!(100))
        .unwrap();
    assert_eq!(status(&conn, &inv), StatusCode::Cancelled);

    let alloc_id = db::allocations_for_payment(&conn, pay.id).unwrap()[0].id;
    ledger
        .delete_allocation(&mut conn, "test", pay.id, alloc_id)
        .unwrap();
    assert_eq!(status(&conn, &inv), StatusCode::Cancelled);

    let swept = ledger.reconcile_open_invoices(&mut conn, "cron").unwrap();
    assert_eq!(swept.examined, 0);
}

#[test]
fn test_due_today_is_not_overdue() {
    let (mut conn, ledger) = setup();
    let inv = invoice(&mut conn, &ledger, "INV-H", dec!(100), 0);
    let pay = payment(&mut conn, &ledger, dec!(100));

    let id = ledger
        .add_allocation(&mut conn, "test", pay.id, inv.id, dec!(10))
        .unwrap();
    ledger.delete_allocation(&mut conn, "test", pay.id, id).unwrap();

    assert_eq!(status(&conn, &inv), StatusCode::Unpaid);
}

#[test]
fn test_every_mutation_is_audited() {
    let (mut conn, ledger) = setup();
    let inv = invoice(&mut conn, &ledger, "INV-I", dec!(100), 10);
    let pay = payment(&mut conn, &ledger, dec!(100));

    let id = ledger
        .add_allocation(&mut conn, "alice", pay.id, inv.id, dec!(40))
        .unwrap();
    ledger
        .replace_allocations(
            &mut conn,
            "bob",
            pay.id,
            &[AllocationLine::new(inv.id, dec!(60))],
        )
        .unwrap();
    assert!(db::get_allocation(&conn, id).unwrap().is_none());

    let events =
        billing_ledger::events_for_entity(&conn, "payment", &pay.id.to_string()).unwrap();
    let actions: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        actions,
        vec!["allocations_replaced", "allocation_added", "payment_recorded"]
    );
    assert_eq!(events[0].actor, "bob");

    let amount = |v: &serde_json::Value| -> Decimal { v.as_str().unwrap().parse().unwrap() };
    assert_eq!(amount(&events[0].data["before"][0]["amount"]), dec!(40));
    assert_eq!(amount(&events[0].data["after"][0]["amount"]), dec!(60));

    let report = IntegrityChecker::default().check(&conn, today()).unwrap();
    assert!(report.is_clean(), "{:?}", report.issues);
}

// ============================================================================
// AUDIT FAILURE
// ============================================================================

struct BrokenSink;

impl AuditSink for BrokenSink {
    fn record(&self, _conn: &Connection, _entry: &AuditEntry) -> LedgerResult<()> {
        Err(LedgerError::Audit("sink offline".to_string()))
    }
}

#[test]
fn test_audit_failure_rolls_back_mutation() {
    let (mut conn, ledger) = setup();
    let inv = invoice(&mut conn, &ledger, "INV-J", dec!(100), 10);
    let pay = payment(&mut conn, &ledger, dec!(100));

    let broken = AllocationLedger::new(
        Arc::new(FixedClock::on_date(today())),
        Arc::new(BrokenSink),
    );

    let err = broken
        .add_allocation(&mut conn, "test", pay.id, inv.id, dec!(50))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Audit(_)));

    assert!(db::allocations_for_payment(&conn, pay.id).unwrap().is_empty());
    assert_eq!(status(&conn, &inv), StatusCode::Unpaid);
    assert_eq!(db::require_payment(&conn, pay.id).unwrap().version, 1);

    let err = broken
        .replace_allocations(
            &mut conn,
            "test",
            pay.id,
            &[AllocationLine::new(inv.id, dec!(100))],
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::Audit(_)));
    assert_eq!(status(&conn, &inv), StatusCode::Unpaid);
}

#[test]
fn test_unknown_payment_is_not_found() {
    let (mut conn, ledger) = setup();
    let inv = invoice(&mut conn, &ledger, "INV-K", dec!(100), 10);

    let err = ledger
        .add_allocation(&mut conn, "test", PaymentId(77), inv.id, dec!(1))
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "payment", id: 77 }));
    assert!(err.is_caller_error());
}

#[test]
fn test_unknown_invoice_is_not_found() {
    let (mut conn, ledger) = setup();
    let pay = payment(&mut conn, &ledger, dec!(100));

    let err = ledger
        .add_allocation(&mut conn, "test", pay.id, billing_ledger::InvoiceId(404), dec!(10))
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "invoice", id: 404 }));
    assert!(db::allocations_for_payment(&conn, pay.id).unwrap().is_empty());
    assert_eq!(db::require_payment(&conn, pay.id).unwrap().version, 1);
}

#[test]
fn test_deleting_another_payments_allocation_is_not_found() {
    let (mut conn, ledger) = setup();
    let inv = invoice(&mut conn, &ledger, "INV-L", dec!(100), 10);
    let pay_a = payment(&mut conn, &ledger, dec!(100));
    let pay_b = payment(&mut conn, &ledger, dec!(100));

    let b_allocation = ledger
        .add_allocation(&mut conn, "test", pay_b.id, inv.id, dec!(40))
        .unwrap();
    let version_a = db::require_payment(&conn, pay_a.id).unwrap().version;

    let err = ledger
        .delete_allocation(&mut conn, "test", pay_a.id, b_allocation)
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "allocation", .. }));

    let row = db::get_allocation(&conn, b_allocation).unwrap().unwrap();
    assert_eq!(row.payment_id, pay_b.id);
    assert_eq!(row.amount, dec!(40));
    assert_eq!(status(&conn, &inv), StatusCode::Partial);
    assert_eq!(db::require_payment(&conn, pay_a.id).unwrap().version, version_a);
}

#[test]
fn test_delete_audit_records_removed_amount() {
    let (mut conn, ledger) = setup();
    let inv = invoice(&mut conn, &ledger, "INV-M", dec!(100), 10);
    let pay = payment(&mut conn, &ledger, dec!(100));

    let id = ledger
        .add_allocation(&mut conn, "alice", pay.id, inv.id, dec!(25.50))
        .unwrap();
    ledger.delete_allocation(&mut conn, "carol", pay.id, id).unwrap();

    let events =
        billing_ledger::events_for_entity(&conn, "payment", &pay.id.to_string()).unwrap();
    assert_eq!(events[0].event_type, "allocation_deleted");
    assert_eq!(events[0].actor, "carol");

    let removed = &events[0].data["before"]["removed"];
    assert_eq!(removed["id"], id.get());
    assert_eq!(removed["invoice_id"], inv.id.get());
    let amount: Decimal = removed["amount"].as_str().unwrap().parse().unwrap();
    assert_eq!(amount, dec!(25.50));
    assert_eq!(events[0].data["after"], serde_json::json!([]));
}

#[test]
fn test_sub_cent_payment_is_refused() {
    let (mut conn, ledger) = setup();

    let err = ledger
        .record_payment(
            &mut conn,
            "test",
            &NewPayment::manual(MemberId(1), today(), dec!(0.004)),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount { .. }));
    assert_eq!(db::verify_counts(&conn).unwrap().payments, 0);
    assert_eq!(db::verify_counts(&conn).unwrap().events, 0);
}

// Concurrent writers on one payment, each thread with its own connection

use billing_ledger::{
    db, open_database, AllocationLedger, AllocationLine, FixedClock, IntegrityChecker, InvoiceId,
    LedgerError, MemberId, NewInvoice, NewPayment, PaymentId, SqliteAuditSink, StoreOptions,
};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
}

struct Fixture {
    _dir: tempfile::TempDir,
    path: PathBuf,
    ledger: Arc<AllocationLedger>,
    payment: PaymentId,
    invoices: Vec<InvoiceId>,
}

fn fixture(payment_amount: Decimal, invoice_count: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let mut conn = open_database(&path, &StoreOptions::default()).unwrap();

    let ledger = Arc::new(AllocationLedger::new(
        Arc::new(FixedClock::on_date(today())),
        Arc::new(SqliteAuditSink),
    ));

    let invoices = (0..invoice_count)
        .map(|n| {
            ledger
                .create_invoice(
                    &mut conn,
                    "setup",
                    &NewInvoice {
                        member_id: MemberId(3),
                        number: format!("INV-{:03}", n),
                        issue_date: today(),
                        due_date: today() + Duration::days(14),
                        total_amount: dec!(100),
                        lines: Vec::new(),
                    },
                )
                .unwrap()
                .id
        })
        .collect();

    let payment = ledger
        .record_payment(
            &mut conn,
            "setup",
            &NewPayment::manual(MemberId(3), today(), payment_amount),
        )
        .unwrap()
        .id;

    Fixture {
        _dir: dir,
        path,
        ledger,
        payment,
        invoices,
    }
}

fn connect(path: &Path) -> rusqlite::Connection {
    open_database(path, &StoreOptions::default()).unwrap()
}

#[test]
fn test_racing_adds_never_overspend_payment() {
    let fx = fixture(dec!(100), 8);

    let handles: Vec<_> = fx
        .invoices
        .iter()
        .map(|&invoice_id| {
            let ledger = Arc::clone(&fx.ledger);
            let path = fx.path.clone();
            let payment = fx.payment;
            thread::spawn(move || {
                let mut conn = connect(&path);
                ledger.add_allocation(&mut conn, "worker", payment, invoice_id, dec!(30))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 3);
    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(e, LedgerError::OverAllocation { .. }),
                "unexpected error {:?}",
                e
            );
        }
    }

    let conn = connect(&fx.path);
    let balance = fx.ledger.payment_balance(&conn, fx.payment).unwrap();
    assert_eq!(balance.allocated, dec!(90));
    assert_eq!(
        db::require_payment(&conn, fx.payment).unwrap().version,
        1 + succeeded as i64
    );
    assert!(IntegrityChecker::default()
        .check(&conn, today())
        .unwrap()
        .is_clean());
}

#[test]
fn test_racing_replaces_leave_one_complete_set() {
    let fx = fixture(dec!(100), 4);

    // each worker wants a different full allocation of the payment
    let requests: Vec<Vec<AllocationLine>> = fx
        .invoices
        .iter()
        .map(|&target| {
            fx.invoices
                .iter()
                .map(|&id| {
                    let amount = if id == target { dec!(70) } else { dec!(10) };
                    AllocationLine::new(id, amount)
                })
                .collect()
        })
        .collect();

    let handles: Vec<_> = requests
        .iter()
        .cloned()
        .map(|lines| {
            let ledger = Arc::clone(&fx.ledger);
            let path = fx.path.clone();
            let payment = fx.payment;
            thread::spawn(move || {
                let mut conn = connect(&path);
                for _ in 0..5 {
                    ledger
                        .replace_allocations(&mut conn, "worker", payment, &lines)
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let conn = connect(&fx.path);
    let mut current: Vec<AllocationLine> = db::allocations_for_payment(&conn, fx.payment)
        .unwrap()
        .iter()
        .map(AllocationLine::from)
        .collect();
    current.sort_by_key(|l| l.invoice_id);

    assert!(
        requests.iter().any(|r| {
            let mut r = r.clone();
            r.sort_by_key(|l| l.invoice_id);
            r == current
        }),
        "final allocations {:?} are a mix of requests",
        current
    );

    let balance = fx.ledger.payment_balance(&conn, fx.payment).unwrap();
    assert_eq!(balance.allocated, dec!(100));
    assert_eq!(
        db::require_payment(&conn, fx.payment).unwrap().version,
        1 + 4 * 5
    );

    let report = IntegrityChecker::default().check(&conn, today()).unwrap();
    assert!(report.is_clean(), "{:?}", report.issues);
}

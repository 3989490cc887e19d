// 🗄️ Ledger Store - SQLite relations for invoices, payments and allocations
//
// Pure data: schema, row mapping and queries. No reconciliation logic lives
// here; the ledger and reconciler call these inside their own transactions
// (every function takes &Connection, and a rusqlite Transaction derefs to one).

use crate::entities::{
    format_amount, parse_amount, round_currency, sum_amounts, Allocation, AllocationId, Invoice,
    InvoiceId, InvoiceLine, MemberId, NewInvoice, NewInvoiceLine, NewPayment, Payment, PaymentId,
    StatusCode,
};
use crate::error::{LedgerError, LedgerResult};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// SCHEMA
// ============================================================================

/// Connection-level settings applied by `open_database`.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub wal: bool,
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            wal: true,
            busy_timeout: Duration::from_millis(5_000),
        }
    }
}

/// Open (or create) a ledger database and make sure the schema exists.
pub fn open_database(path: &Path, options: &StoreOptions) -> LedgerResult<Connection> {
    let conn = Connection::open(path)?;
    configure_connection(&conn, options)?;
    setup_database(&conn)?;
    info!(path = %path.display(), wal = options.wal, "ledger store opened");
    Ok(conn)
}

pub fn configure_connection(conn: &Connection, options: &StoreOptions) -> LedgerResult<()> {
    conn.busy_timeout(options.busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    if options.wal {
        // WAL for crash recovery; in-memory databases answer "memory"
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "journal mode set");
    }

    Ok(())
}

pub fn setup_database(conn: &Connection) -> LedgerResult<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Status code lookup (closed set, seeded once)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS status_codes (
            code TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            is_terminal INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    // ==========================================================================
    // Invoices + line items
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS invoices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_id INTEGER NOT NULL,
            number TEXT NOT NULL UNIQUE,
            issue_date TEXT NOT NULL,
            due_date TEXT NOT NULL,
            total_amount TEXT NOT NULL,
            status_code TEXT NOT NULL DEFAULT 'UNPAID' REFERENCES status_codes(code),
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS invoice_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            invoice_id INTEGER NOT NULL REFERENCES invoices(id),
            position INTEGER NOT NULL,
            description TEXT NOT NULL,
            quantity TEXT NOT NULL,
            unit_price TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Payments (amount immutable, version = optimistic-concurrency token)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            amount TEXT NOT NULL,
            payer_name TEXT,
            method TEXT,
            import_batch TEXT,
            import_hash TEXT UNIQUE,
            version INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Allocations (owned by the allocation ledger)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS allocations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payment_id INTEGER NOT NULL REFERENCES payments(id),
            invoice_id INTEGER NOT NULL REFERENCES invoices(id),
            amount TEXT NOT NULL,
            UNIQUE(payment_id, invoice_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            summary TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_allocations_invoice ON allocations(invoice_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_invoices_status ON invoices(status_code)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_invoice_lines_invoice ON invoice_lines(invoice_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    seed_status_codes(conn)?;

    Ok(())
}

fn seed_status_codes(conn: &Connection) -> LedgerResult<()> {
    for code in StatusCode::ALL {
        conn.execute(
            "INSERT OR IGNORE INTO status_codes (code, label, is_terminal) VALUES (?1, ?2, ?3)",
            params![code.as_str(), code.label(), code.is_terminal()],
        )?;
    }
    Ok(())
}

/// Status codes as seeded in the lookup table
pub fn load_status_codes(conn: &Connection) -> LedgerResult<Vec<StatusCode>> {
    let mut stmt = conn.prepare("SELECT code FROM status_codes ORDER BY code")?;
    let raw = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    raw.iter().map(|code| parse_status(code)).collect()
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn parse_date(column: &'static str, raw: &str) -> LedgerResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| LedgerError::Corrupt {
        column,
        value: raw.to_string(),
    })
}

fn parse_timestamp(column: &'static str, raw: &str) -> LedgerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| LedgerError::Corrupt {
            column,
            value: raw.to_string(),
        })
}

fn parse_status(raw: &str) -> LedgerResult<StatusCode> {
    raw.parse::<StatusCode>().map_err(|_| LedgerError::Corrupt {
        column: "status_code",
        value: raw.to_string(),
    })
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

const INVOICE_COLUMNS: &str =
    "id, member_id, number, issue_date, due_date, total_amount, status_code, updated_at";

struct InvoiceRow {
    id: i64,
    member_id: i64,
    number: String,
    issue_date: String,
    due_date: String,
    total_amount: String,
    status_code: String,
    updated_at: String,
}

impl InvoiceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(InvoiceRow {
            id: row.get(0)?,
            member_id: row.get(1)?,
            number: row.get(2)?,
            issue_date: row.get(3)?,
            due_date: row.get(4)?,
            total_amount: row.get(5)?,
            status_code: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_invoice(self) -> LedgerResult<Invoice> {
        Ok(Invoice {
            id: InvoiceId(self.id),
            member_id: MemberId(self.member_id),
            number: self.number,
            issue_date: parse_date("issue_date", &self.issue_date)?,
            due_date: parse_date("due_date", &self.due_date)?,
            total_amount: parse_amount("total_amount", &self.total_amount)?,
            status: parse_status(&self.status_code)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

const PAYMENT_COLUMNS: &str =
    "id, member_id, date, amount, payer_name, method, import_batch, version";

struct PaymentRow {
    id: i64,
    member_id: i64,
    date: String,
    amount: String,
    payer_name: Option<String>,
    method: Option<String>,
    import_batch: Option<String>,
    version: i64,
}

impl PaymentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(PaymentRow {
            id: row.get(0)?,
            member_id: row.get(1)?,
            date: row.get(2)?,
            amount: row.get(3)?,
            payer_name: row.get(4)?,
            method: row.get(5)?,
            import_batch: row.get(6)?,
            version: row.get(7)?,
        })
    }

    fn into_payment(self) -> LedgerResult<Payment> {
        Ok(Payment {
            id: PaymentId(self.id),
            member_id: MemberId(self.member_id),
            date: parse_date("date", &self.date)?,
            amount: parse_amount("amount", &self.amount)?,
            payer_name: self.payer_name,
            method: self.method,
            import_batch: self.import_batch,
            version: self.version,
        })
    }
}

type RawAllocation = (i64, i64, i64, String);

fn raw_allocation(row: &Row<'_>) -> rusqlite::Result<RawAllocation> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn allocation_from_raw(raw: RawAllocation) -> LedgerResult<Allocation> {
    let (id, payment_id, invoice_id, amount) = raw;
    Ok(Allocation {
        id: AllocationId(id),
        payment_id: PaymentId(payment_id),
        invoice_id: InvoiceId(invoice_id),
        amount: parse_amount("allocations.amount", &amount)?,
    })
}

fn query_allocations(
    conn: &Connection,
    sql: &str,
    key: i64,
) -> LedgerResult<Vec<Allocation>> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map([key], raw_allocation)?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter().map(allocation_from_raw).collect()
}

/// UNIQUE violations only; foreign-key failures stay fatal storage errors
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

// ============================================================================
// INVOICES
// ============================================================================

/// Insert a new invoice (status UNPAID) together with its line items.
pub fn insert_invoice(
    conn: &Connection,
    invoice: &NewInvoice,
    now: DateTime<Utc>,
) -> LedgerResult<Invoice> {
    for line in &invoice.lines {
        line.validate().map_err(LedgerError::InvalidLineItem)?;
    }

    let total = invoice.effective_total();
    if total < Decimal::ZERO {
        return Err(LedgerError::InvalidAmount { amount: total });
    }
    conn.execute(
        "INSERT INTO invoices (
            member_id, number, issue_date, due_date, total_amount, status_code, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            invoice.member_id.get(),
            invoice.number,
            format_date(invoice.issue_date),
            format_date(invoice.due_date),
            format_amount(total),
            StatusCode::Unpaid.as_str(),
            now.to_rfc3339(),
        ],
    )?;

    let id = InvoiceId(conn.last_insert_rowid());
    insert_invoice_lines(conn, id, &invoice.lines)?;
    debug!(invoice_id = %id, number = %invoice.number, total = %total, "invoice inserted");

    require_invoice(conn, id)
}

pub fn get_invoice(conn: &Connection, id: InvoiceId) -> LedgerResult<Option<Invoice>> {
    let sql = format!("SELECT {} FROM invoices WHERE id = ?1", INVOICE_COLUMNS);
    let row = conn
        .query_row(&sql, [id.get()], InvoiceRow::from_row)
        .optional()?;

    row.map(InvoiceRow::into_invoice).transpose()
}

pub fn require_invoice(conn: &Connection, id: InvoiceId) -> LedgerResult<Invoice> {
    get_invoice(conn, id)?.ok_or_else(|| LedgerError::not_found(InvoiceId::ENTITY, id.get()))
}

pub fn get_invoice_by_number(conn: &Connection, number: &str) -> LedgerResult<Option<Invoice>> {
    let sql = format!("SELECT {} FROM invoices WHERE number = ?1", INVOICE_COLUMNS);
    let row = conn
        .query_row(&sql, [number], InvoiceRow::from_row)
        .optional()?;

    row.map(InvoiceRow::into_invoice).transpose()
}

pub fn invoice_exists(conn: &Connection, id: InvoiceId) -> LedgerResult<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM invoices WHERE id = ?1", [id.get()], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub fn get_all_invoices(conn: &Connection) -> LedgerResult<Vec<Invoice>> {
    let sql = format!("SELECT {} FROM invoices ORDER BY id", INVOICE_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], InvoiceRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(InvoiceRow::into_invoice).collect()
}

/// Ids of every invoice the reconciler may still touch
pub fn open_invoice_ids(conn: &Connection) -> LedgerResult<Vec<InvoiceId>> {
    let mut stmt = conn.prepare("SELECT id FROM invoices WHERE status_code != ?1 ORDER BY id")?;
    let ids = stmt
        .query_map([StatusCode::Cancelled.as_str()], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ids.into_iter().map(InvoiceId).collect())
}

/// Write the status column; returns rows touched (0 if the invoice vanished)
pub fn update_invoice_status(
    conn: &Connection,
    id: InvoiceId,
    status: StatusCode,
    now: DateTime<Utc>,
) -> LedgerResult<usize> {
    let changed = conn.execute(
        "UPDATE invoices SET status_code = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now.to_rfc3339(), id.get()],
    )?;
    Ok(changed)
}

pub fn get_invoice_lines(conn: &Connection, id: InvoiceId) -> LedgerResult<Vec<InvoiceLine>> {
    let mut stmt = conn.prepare(
        "SELECT id, invoice_id, description, quantity, unit_price
         FROM invoice_lines
         WHERE invoice_id = ?1
         ORDER BY position, id",
    )?;

    let raw = stmt
        .query_map([id.get()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(line_id, invoice_id, description, quantity, unit_price)| {
            Ok(InvoiceLine {
                id: line_id,
                invoice_id: InvoiceId(invoice_id),
                description,
                quantity: parse_amount("quantity", &quantity)?,
                unit_price: parse_amount("unit_price", &unit_price)?,
            })
        })
        .collect()
}

fn insert_invoice_lines(
    conn: &Connection,
    id: InvoiceId,
    lines: &[NewInvoiceLine],
) -> LedgerResult<()> {
    for (position, line) in lines.iter().enumerate() {
        conn.execute(
            "INSERT INTO invoice_lines (invoice_id, position, description, quantity, unit_price)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.get(),
                position as i64,
                line.description,
                line.quantity.normalize().to_string(),
                line.unit_price.normalize().to_string(),
            ],
        )?;
    }
    Ok(())
}

/// Replace all line items and rewrite the derived total.
pub fn write_invoice_lines(
    conn: &Connection,
    id: InvoiceId,
    lines: &[NewInvoiceLine],
    total: Decimal,
    now: DateTime<Utc>,
) -> LedgerResult<()> {
    conn.execute("DELETE FROM invoice_lines WHERE invoice_id = ?1", [id.get()])?;
    insert_invoice_lines(conn, id, lines)?;
    conn.execute(
        "UPDATE invoices SET total_amount = ?1, updated_at = ?2 WHERE id = ?3",
        params![format_amount(total), now.to_rfc3339(), id.get()],
    )?;
    Ok(())
}

// ============================================================================
// PAYMENTS
// ============================================================================

pub fn insert_payment(conn: &Connection, payment: &NewPayment) -> LedgerResult<Payment> {
    let amount = round_currency(payment.amount);
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount { amount });
    }

    let import_hash = payment
        .import_batch
        .as_ref()
        .map(|_| payment.compute_import_hash());

    conn.execute(
        "INSERT INTO payments (
            member_id, date, amount, payer_name, method, import_batch, import_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            payment.member_id.get(),
            format_date(payment.date),
            format_amount(amount),
            payment.payer_name,
            payment.method,
            payment.import_batch,
            import_hash,
        ],
    )?;

    let id = PaymentId(conn.last_insert_rowid());
    debug!(payment_id = %id, amount = %amount, "payment recorded");
    require_payment(conn, id)
}

pub fn get_payment(conn: &Connection, id: PaymentId) -> LedgerResult<Option<Payment>> {
    let sql = format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLUMNS);
    let row = conn
        .query_row(&sql, [id.get()], PaymentRow::from_row)
        .optional()?;

    row.map(PaymentRow::into_payment).transpose()
}

pub fn require_payment(conn: &Connection, id: PaymentId) -> LedgerResult<Payment> {
    get_payment(conn, id)?.ok_or_else(|| LedgerError::not_found(PaymentId::ENTITY, id.get()))
}

pub fn get_all_payments(conn: &Connection) -> LedgerResult<Vec<Payment>> {
    let sql = format!("SELECT {} FROM payments ORDER BY id", PAYMENT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], PaymentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(PaymentRow::into_payment).collect()
}

/// Advance the payment's version token, failing if someone else moved it.
pub fn bump_payment_version(
    conn: &Connection,
    id: PaymentId,
    expected: i64,
) -> LedgerResult<i64> {
    let changed = conn.execute(
        "UPDATE payments SET version = version + 1 WHERE id = ?1 AND version = ?2",
        params![id.get(), expected],
    )?;

    if changed == 0 {
        return Err(LedgerError::ConcurrentModification {
            payment_id: id.get(),
            expected,
        });
    }
    Ok(expected + 1)
}

// ============================================================================
// ALLOCATIONS
// ============================================================================

/// Insert an allocation row; the UNIQUE(payment, invoice) constraint maps to
/// DuplicateAllocation.
pub fn insert_allocation(
    conn: &Connection,
    payment_id: PaymentId,
    invoice_id: InvoiceId,
    amount: Decimal,
) -> LedgerResult<AllocationId> {
    let result = conn.execute(
        "INSERT INTO allocations (payment_id, invoice_id, amount) VALUES (?1, ?2, ?3)",
        params![payment_id.get(), invoice_id.get(), format_amount(amount)],
    );

    match result {
        Ok(_) => Ok(AllocationId(conn.last_insert_rowid())),
        Err(ref e) if is_unique_violation(e) => Err(LedgerError::DuplicateAllocation {
            payment_id: payment_id.get(),
            invoice_id: invoice_id.get(),
        }),
        Err(e) => Err(e.into()),
    }
}

pub fn get_allocation(conn: &Connection, id: AllocationId) -> LedgerResult<Option<Allocation>> {
    let raw = conn
        .query_row(
            "SELECT id, payment_id, invoice_id, amount FROM allocations WHERE id = ?1",
            [id.get()],
            raw_allocation,
        )
        .optional()?;

    raw.map(allocation_from_raw).transpose()
}

pub fn find_allocation(
    conn: &Connection,
    payment_id: PaymentId,
    invoice_id: InvoiceId,
) -> LedgerResult<Option<Allocation>> {
    let raw = conn
        .query_row(
            "SELECT id, payment_id, invoice_id, amount FROM allocations
             WHERE payment_id = ?1 AND invoice_id = ?2",
            params![payment_id.get(), invoice_id.get()],
            raw_allocation,
        )
        .optional()?;

    raw.map(allocation_from_raw).transpose()
}

pub fn delete_allocation_row(conn: &Connection, id: AllocationId) -> LedgerResult<usize> {
    Ok(conn.execute("DELETE FROM allocations WHERE id = ?1", [id.get()])?)
}

pub fn delete_allocations_for_payment(conn: &Connection, id: PaymentId) -> LedgerResult<usize> {
    Ok(conn.execute("DELETE FROM allocations WHERE payment_id = ?1", [id.get()])?)
}

pub fn allocations_for_payment(conn: &Connection, id: PaymentId) -> LedgerResult<Vec<Allocation>> {
    query_allocations(
        conn,
        "SELECT id, payment_id, invoice_id, amount FROM allocations
         WHERE payment_id = ?1 ORDER BY id",
        id.get(),
    )
}

pub fn allocations_for_invoice(conn: &Connection, id: InvoiceId) -> LedgerResult<Vec<Allocation>> {
    query_allocations(
        conn,
        "SELECT id, payment_id, invoice_id, amount FROM allocations
         WHERE invoice_id = ?1 ORDER BY id",
        id.get(),
    )
}

pub fn get_all_allocations(conn: &Connection) -> LedgerResult<Vec<Allocation>> {
    let mut stmt =
        conn.prepare("SELECT id, payment_id, invoice_id, amount FROM allocations ORDER BY id")?;
    let raw = stmt
        .query_map([], raw_allocation)?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter().map(allocation_from_raw).collect()
}

/// Σ allocations applied to an invoice
pub fn allocated_to_invoice(conn: &Connection, id: InvoiceId) -> LedgerResult<Decimal> {
    let allocations = allocations_for_invoice(conn, id)?;
    Ok(sum_amounts(allocations.iter().map(|a| a.amount)))
}

/// Σ allocations drawn from a payment
pub fn allocated_from_payment(conn: &Connection, id: PaymentId) -> LedgerResult<Decimal> {
    let allocations = allocations_for_payment(conn, id)?;
    Ok(sum_amounts(allocations.iter().map(|a| a.amount)))
}

// ============================================================================
// COUNTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounts {
    pub invoices: i64,
    pub payments: i64,
    pub allocations: i64,
    pub events: i64,
}

pub fn verify_counts(conn: &Connection) -> LedgerResult<StoreCounts> {
    let count = |table: &str| -> LedgerResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
    };

    Ok(StoreCounts {
        invoices: count("invoices")?,
        payments: count("payments")?,
        allocations: count("allocations")?,
        events: count("events")?,
    })
}

// ============================================================================
// PAYMENT IMPORT (CSV)
// ============================================================================

/// One row of a bank/payment export.
#[derive(Debug, Deserialize)]
struct PaymentCsvRow {
    #[serde(rename = "Member_Id")]
    member_id: i64,

    #[serde(rename = "Date")]
    date: String,

    #[serde(rename = "Amount")]
    amount: String,

    #[serde(rename = "Payer", default)]
    payer_name: Option<String>,

    #[serde(rename = "Method", default)]
    method: Option<String>,
}

pub fn load_payments_csv(csv_path: &Path, batch: &str) -> anyhow::Result<Vec<NewPayment>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut payments = Vec::new();
    let mut seen: HashMap<String, u32> = HashMap::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: PaymentCsvRow = result.context("Failed to deserialize payment row")?;
        let date = NaiveDate::parse_from_str(row.date.trim(), DATE_FORMAT)
            .with_context(|| format!("Invalid date '{}' on row {}", row.date, line + 1))?;
        let amount = Decimal::from_str(row.amount.trim())
            .with_context(|| format!("Invalid amount '{}' on row {}", row.amount, line + 1))?;

        let mut payment = NewPayment {
            member_id: MemberId(row.member_id),
            date,
            amount,
            payer_name: row.payer_name.filter(|s| !s.trim().is_empty()),
            method: row.method.filter(|s| !s.trim().is_empty()),
            import_batch: Some(batch.to_string()),
            import_occurrence: 0,
        };

        // identical rows in one export are distinct payments
        let occurrence = seen.entry(payment.import_key()).or_insert(0);
        payment.import_occurrence = *occurrence;
        *occurrence += 1;

        payments.push(payment);
    }

    Ok(payments)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Insert imported payments, skipping rows already seen (same import hash).
pub fn insert_payments(conn: &Connection, payments: &[NewPayment]) -> LedgerResult<ImportSummary> {
    let mut summary = ImportSummary::default();

    for payment in payments {
        match insert_payment(conn, payment) {
            Ok(_) => summary.inserted += 1,
            Err(LedgerError::Storage(ref e)) if is_unique_violation(e) => {
                summary.duplicates += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        "payment import finished"
    );
    Ok(summary)
}

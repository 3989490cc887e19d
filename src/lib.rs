// Billing Ledger - Core Library
// Allocation ledger and invoice status reconciliation for the maintenance CLI and tests

pub mod db;
pub mod entities;
pub mod error;
pub mod config;
pub mod temporal;       // Clock abstraction (wall clock / fixed clock)
pub mod audit;          // Audit sink contract + events table
pub mod locks;          // Per-payment serialization
pub mod reconciliation; // Status derivation
pub mod ledger;         // Allocation mutations + balances
pub mod admin;          // Invoice/payment recording, overrides, sweeps
pub mod integrity;      // Invariant checks over the whole store

// Re-export commonly used types
pub use db::{
    open_database, setup_database, load_payments_csv, verify_counts,
    ImportSummary, StoreCounts, StoreOptions,
};
pub use entities::{
    Allocation, AllocationId, AllocationLine, Invoice, InvoiceId, InvoiceLine, MemberId,
    NewInvoice, NewInvoiceLine, NewPayment, Payment, PaymentId, StatusCode,
};
pub use error::{LedgerError, LedgerResult};
pub use config::LedgerConfig;
pub use temporal::{Clock, FixedClock, SystemClock};
pub use audit::{AuditEntry, AuditSink, Event, SqliteAuditSink, events_for_entity};
pub use reconciliation::{DunningPolicy, ReconcileOutcome, StatusReconciler};
pub use ledger::{
    AllocationLedger, InvoiceBalance, PaymentBalance, ReplaceOutcome,
    invoice_balance, payment_balance,
};
pub use admin::{LinesReplaced, StatusChange, SweepSummary};
pub use integrity::{IntegrityChecker, IntegrityIssue, IntegrityReport, Severity};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

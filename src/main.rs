// Billing Ledger - maintenance CLI
//
// Usage:
//   billing-ledger init                                  - Create the schema
//   billing-ledger import-payments <csv> --batch <name>  - Import a payment export
//   billing-ledger reconcile [--invoice <id>]            - Status sweep (daily)
//   billing-ledger set-status --invoice <id> <STATUS>    - Manual override
//   billing-ledger balance --invoice <id> | --payment <id>
//   billing-ledger history --invoice <id> | --payment <id>
//   billing-ledger check                                 - Integrity report

use anyhow::{bail, Context, Result};
use billing_ledger::integrity::status_breakdown;
use billing_ledger::{
    events_for_entity, load_payments_csv, open_database, verify_counts, AllocationLedger,
    IntegrityChecker, InvoiceId, LedgerConfig, PaymentId, ReconcileOutcome, StatusCode,
};
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "billing-ledger", version, about = "Billing allocation ledger maintenance")]
struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides the config
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Actor recorded in the audit trail
    #[arg(long, global = true)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,

    /// Import payments from a CSV export (Member_Id,Date,Amount,Payer,Method)
    ImportPayments {
        csv: PathBuf,

        #[arg(long)]
        batch: String,
    },

    /// Re-derive invoice statuses (all open invoices unless --invoice is given)
    Reconcile {
        #[arg(long)]
        invoice: Option<i64>,
    },

    /// Administrative status override (e.g. DUNNING, CANCELLED)
    SetStatus {
        #[arg(long)]
        invoice: i64,

        status: StatusCode,
    },

    /// Show the balance of an invoice or a payment
    Balance(Target),

    /// Show the audit trail of an invoice or a payment
    History(Target),

    /// Check the store against the ledger invariants
    Check,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Target {
    #[arg(long)]
    invoice: Option<i64>,

    #[arg(long)]
    payment: Option<i64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = LedgerConfig::load_or_default(cli.config.as_deref())?;
    if let Some(path) = &cli.database {
        config.database_path = path.clone();
    }
    init_logging(&config);

    let actor = cli.actor.clone().unwrap_or_else(|| config.default_actor.clone());
    let mut conn = open_database(&config.database_path, &config.store_options())
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    let ledger = AllocationLedger::from_config(&config);

    match cli.command {
        Command::Init => run_init(&conn, &config),
        Command::ImportPayments { csv, batch } => {
            run_import(&mut conn, &ledger, &actor, &csv, &batch)
        }
        Command::Reconcile { invoice } => run_reconcile(&mut conn, &ledger, &actor, invoice),
        Command::SetStatus { invoice, status } => {
            let change =
                ledger.set_invoice_status(&mut conn, &actor, InvoiceId(invoice), status)?;
            if change.changed() {
                println!("✓ Invoice {}: {} → {}", invoice, change.from, change.to);
            } else {
                println!("✓ Invoice {} already {}", invoice, change.to);
            }
            Ok(())
        }
        Command::Balance(target) => run_balance(&conn, &ledger, &target),
        Command::History(target) => run_history(&conn, &target),
        Command::Check => run_check(&conn, &ledger),
    }
}

/// RUST_LOG wins over the configured filter
fn init_logging(config: &LedgerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_init(conn: &Connection, config: &LedgerConfig) -> Result<()> {
    println!("🗄️  Billing ledger: {}", config.database_path.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let counts = verify_counts(conn)?;
    println!("✓ Schema ready (WAL: {})", config.wal);
    println!("✓ Invoices:    {}", counts.invoices);
    println!("✓ Payments:    {}", counts.payments);
    println!("✓ Allocations: {}", counts.allocations);
    println!("✓ Events:      {}", counts.events);

    Ok(())
}

fn run_import(
    conn: &mut Connection,
    ledger: &AllocationLedger,
    actor: &str,
    csv: &std::path::Path,
    batch: &str,
) -> Result<()> {
    println!("📂 Loading {}...", csv.display());
    let payments = load_payments_csv(csv, batch)?;
    println!("✓ Parsed {} payment rows", payments.len());

    let summary = ledger.import_payments(conn, actor, batch, &payments)?;
    println!("✓ Inserted:   {}", summary.inserted);
    println!("✓ Duplicates: {}", summary.duplicates);

    Ok(())
}

fn run_reconcile(
    conn: &mut Connection,
    ledger: &AllocationLedger,
    actor: &str,
    invoice: Option<i64>,
) -> Result<()> {
    if let Some(id) = invoice {
        match ledger.reconcile_invoice(conn, actor, InvoiceId(id))? {
            ReconcileOutcome::Updated { from, to } => {
                println!("✓ Invoice {}: {} → {}", id, from, to)
            }
            ReconcileOutcome::Unchanged { status } => {
                println!("✓ Invoice {} unchanged ({})", id, status)
            }
            ReconcileOutcome::Frozen { status } => {
                println!("✓ Invoice {} left alone ({})", id, status)
            }
            ReconcileOutcome::Missing => bail!("invoice {} not found", id),
        }
        return Ok(());
    }

    println!("⚖️  Reconciling open invoices...");
    let summary = ledger.reconcile_open_invoices(conn, actor)?;
    for change in &summary.transitions {
        println!("  • Invoice {}: {} → {}", change.invoice_id, change.from, change.to);
    }
    println!(
        "✓ Examined {}, updated {}, frozen {}",
        summary.examined,
        summary.updated(),
        summary.frozen
    );

    Ok(())
}

fn run_balance(conn: &Connection, ledger: &AllocationLedger, target: &Target) -> Result<()> {
    if let Some(id) = target.invoice {
        let balance = ledger.invoice_balance(conn, InvoiceId(id))?;
        println!("🧾 Invoice {} [{}]", id, balance.status);
        if balance.effective_status != balance.status {
            println!("   Effective: {} (run `reconcile` to persist)", balance.effective_status);
        }
        println!("   Total:     {}", balance.total);
        println!("   Paid:      {}", balance.paid);
        println!("   Remaining: {}", balance.remaining);
        if !balance.overpaid.is_zero() {
            println!("   Overpaid:  {}", balance.overpaid);
        }
    } else if let Some(id) = target.payment {
        let balance = ledger.payment_balance(conn, PaymentId(id))?;
        println!("💳 Payment {}", id);
        println!("   Amount:      {}", balance.amount);
        println!("   Allocated:   {}", balance.allocated);
        println!("   Unallocated: {}", balance.unallocated);
    }

    Ok(())
}

fn run_history(conn: &Connection, target: &Target) -> Result<()> {
    let (entity_type, id) = match (target.invoice, target.payment) {
        (Some(id), _) => (InvoiceId::ENTITY, id),
        (None, Some(id)) => (PaymentId::ENTITY, id),
        (None, None) => bail!("--invoice or --payment is required"),
    };

    let events = events_for_entity(conn, entity_type, &id.to_string())?;
    println!("📜 {} {} ({} events)", entity_type, id, events.len());
    for event in events {
        println!(
            "  {} {:<26} {:<12} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.event_type,
            event.actor,
            event.summary
        );
    }

    Ok(())
}

fn run_check(conn: &Connection, ledger: &AllocationLedger) -> Result<()> {
    let checker = IntegrityChecker::new(ledger.dunning_policy());
    let report = checker.check(conn, ledger.clock().today())?;

    println!("🩺 {}", report.summary());
    for (status, count) in status_breakdown(conn)? {
        println!("   {:<10} {}", status.as_str(), count);
    }
    for issue in &report.issues {
        println!(
            "  {:?} [{}] {}: {}",
            issue.severity, issue.check, issue.entity, issue.message
        );
    }

    if report.critical_count() > 0 {
        bail!("{} critical integrity issue(s)", report.critical_count());
    }
    println!("✓ No critical issues");
    Ok(())
}

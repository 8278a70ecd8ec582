use chrono::Utc;
use clap::Parser;
use mandipay::application::credit_scheduler::CreditScheduler;
use mandipay::application::escrow_manager::EscrowManager;
use mandipay::application::refund_engine::RefundEngine;
use mandipay::application::reminder_scheduler::ReminderScheduler;
use mandipay::config::SettlementPolicy;
use mandipay::domain::ports::{
    CreditStore, CreditStoreBox, EscrowStore, EscrowStoreBox, RefundStore, RefundStoreBox,
    ReminderStore, TransactionStore, TransactionStoreBox,
};
use mandipay::infrastructure::collaborators::{
    LoggingNotifier, RecordingPayout, StaticRelationshipHistory,
};
use mandipay::infrastructure::in_memory::InMemoryLedger;
#[cfg(feature = "storage-rocksdb")]
use mandipay::infrastructure::rocksdb::RocksDbLedger;
use mandipay::interfaces::csv::report_writer::{ReportWriter, assemble_rows};
use mandipay::interfaces::csv::transaction_reader::TransactionReader;
use mandipay::interfaces::ops::{SettlementOps, read_ops};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Seed CSV of marketplace transactions
    input: PathBuf,

    /// JSON-lines settlement operations applied after seeding
    #[arg(long)]
    ops: Option<PathBuf>,

    /// Run the auto-release and overdue sweeps, then dispatch due reminders
    #[arg(long)]
    sweep: bool,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Buyer-vendor trading relationship reported to the credit gate, months
    #[arg(long, default_value_t = 6)]
    relationship_months: u32,

    /// Buyer credit score reported to the credit gate, 0 to 1
    #[arg(long, default_value_t = 0.8)]
    credit_score: f64,
}

/// The four managers plus read handles for the final report.
struct Runtime {
    escrows: EscrowManager,
    credits: CreditScheduler,
    reminders: ReminderScheduler,
    refunds: RefundEngine,
    transaction_view: TransactionStoreBox,
    escrow_view: EscrowStoreBox,
    credit_view: CreditStoreBox,
    refund_view: RefundStoreBox,
}

fn build_runtime<L>(ledger: &L, cli: &Cli, policy: &SettlementPolicy) -> Runtime
where
    L: TransactionStore
        + EscrowStore
        + CreditStore
        + ReminderStore
        + RefundStore
        + Clone
        + 'static,
{
    let payouts = RecordingPayout::new();
    let history = StaticRelationshipHistory::new(cli.relationship_months, cli.credit_score);
    let notifier = LoggingNotifier::new();

    Runtime {
        escrows: EscrowManager::new(
            Box::new(ledger.clone()),
            Box::new(ledger.clone()),
            Box::new(payouts),
            policy.escrow.clone(),
        ),
        credits: CreditScheduler::new(
            Box::new(ledger.clone()),
            Box::new(ledger.clone()),
            Box::new(history),
            policy.credit.clone(),
        ),
        reminders: ReminderScheduler::new(
            Box::new(ledger.clone()),
            Box::new(ledger.clone()),
            Box::new(notifier),
            policy.reminder.clone(),
        ),
        refunds: RefundEngine::new(
            Box::new(ledger.clone()),
            Box::new(ledger.clone()),
            Box::new(ledger.clone()),
            policy.refund.clone(),
        ),
        transaction_view: Box::new(ledger.clone()),
        escrow_view: Box::new(ledger.clone()),
        credit_view: Box::new(ledger.clone()),
        refund_view: Box::new(ledger.clone()),
    }
}

async fn run(runtime: Runtime, cli: &Cli) -> Result<()> {
    // Seed the ledger
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = TransactionReader::new(file);
    for record in reader.records(Utc::now()) {
        match record {
            Ok(tx) => {
                if let Err(e) = runtime.transaction_view.insert(tx).await {
                    eprintln!("Error seeding transaction: {e}");
                }
            }
            Err(e) => {
                eprintln!("Error reading transaction: {e}");
            }
        }
    }

    // Apply settlement operations
    if let Some(ops_path) = &cli.ops {
        let ops = SettlementOps::new(
            &runtime.escrows,
            &runtime.credits,
            &runtime.reminders,
            &runtime.refunds,
        );
        let file = File::open(ops_path).into_diagnostic()?;
        for op in read_ops(BufReader::new(file)) {
            match op {
                Ok(op) => {
                    if let Err(e) = ops.apply(op).await {
                        eprintln!("Error applying operation: {e}");
                    }
                }
                Err(e) => {
                    eprintln!("Error reading operation: {e}");
                }
            }
        }
    }

    if cli.sweep {
        let now = Utc::now();
        let released = runtime.escrows.sweep_auto_release(now).await.into_diagnostic()?;
        tracing::info!(
            released = released.released,
            expired = released.expired,
            skipped = released.skipped,
            failed = released.failed,
            "auto-release sweep finished"
        );
        let overdue = runtime.credits.sweep_overdue(now).await.into_diagnostic()?;
        tracing::info!(
            examined = overdue.examined,
            marked_overdue = overdue.marked_overdue,
            defaulted = overdue.defaulted,
            "overdue sweep finished"
        );
        let dispatched = runtime.reminders.dispatch_due(now).await.into_diagnostic()?;
        tracing::info!(
            sent = dispatched.sent,
            failed = dispatched.failed,
            "reminder dispatch finished"
        );
    }

    // Output final settlement state
    let rows = assemble_rows(
        runtime.transaction_view.all().await.into_diagnostic()?,
        &runtime.escrow_view.all().await.into_diagnostic()?,
        &runtime.credit_view.all().await.into_diagnostic()?,
        &runtime.refund_view.all().await.into_diagnostic()?,
    );
    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    writer.write_rows(rows).into_diagnostic()?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // Stdout carries the report CSV; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let policy = SettlementPolicy::from_env();

    #[cfg(feature = "storage-rocksdb")]
    if let Some(db_path) = &cli.db_path {
        let ledger = RocksDbLedger::open(db_path).into_diagnostic()?;
        let runtime = build_runtime(&ledger, &cli, &policy);
        return run(runtime, &cli).await;
    }

    let ledger = InMemoryLedger::new();
    let runtime = build_runtime(&ledger, &cli, &policy);
    run(runtime, &cli).await
}

//! PropLedger Reconciler Binary
//!
//! Operator entry point for one reconciliation run against the Ledger Store
//! and the ledger gateway.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use propledger_chain::GatewayLedgerClient;
use propledger_common::EstateError;
use propledger_reconciler::{ReconcilerConfig, ReconciliationEngine, RunOptions, SyncCategory};
use propledger_store::PgLedgerStore;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// PropLedger ledger reconciler
#[derive(Parser, Debug)]
#[command(name = "reconciler")]
#[command(about = "Mirror settled PropLedger records onto the distributed ledger")]
struct Args {
    /// Restrict the run to these categories (properties, payments, certificates)
    #[arg(long, value_delimiter = ',')]
    only: Vec<SyncCategory>,

    /// Report what would be submitted without submitting or writing anything
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,

    /// Ledger Store connection string (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Ledger gateway base URL (overrides LEDGER_GATEWAY_URL)
    #[arg(long)]
    gateway_url: Option<String>,

    /// Apply pending Ledger Store migrations before the run
    #[arg(long)]
    migrate: bool,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    // Progress log goes to stderr so --json output stays parseable.
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting PropLedger reconciler");

    let mut config = ReconcilerConfig::from_env();
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if let Some(url) = args.gateway_url {
        config.gateway.gateway_url = url;
    }
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }
    if !config.ledger_enabled {
        error!("Ledger integration is disabled, set LEDGER_ENABLED=true to run");
        return Err(EstateError::LedgerDisabled.into());
    }

    let store = PgLedgerStore::connect(&config.database_url, config.max_connections).await?;
    if args.migrate {
        store.migrate().await?;
        info!("Ledger Store migrations applied");
    }

    let client = GatewayLedgerClient::new(config.gateway.clone())?;
    let engine = ReconciliationEngine::new(Arc::new(store), Arc::new(client), &config)?;

    let mut options = RunOptions::only(args.only);
    options.dry_run = args.dry_run;

    let report = engine.run(&options).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for category in SyncCategory::ALL {
            if let Some(counts) = report.get(category) {
                info!(category = %category, %counts, "Summary");
            }
        }
    }

    info!(
        total = %report.total(),
        elapsed_ms = report.elapsed_ms,
        dry_run = report.dry_run,
        "Reconciler finished"
    );

    if report.has_failures() {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

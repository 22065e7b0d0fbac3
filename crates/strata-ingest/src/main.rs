//! Strata ingestion daemon.
//!
//! Spawns one worker per configured message category. Each worker polls
//! its category table for new raw messages, materializes their payloads
//! into entity tables, and records progress in the `sync` table.
//!
//! # Usage
//!
//! ```bash
//! # Run against a local database with the default categories
//! strata-ingest --database-url "host=localhost user=strata dbname=chain"
//!
//! # Narrow to one category and point diagnostics at a chain LCD endpoint
//! strata-ingest \
//!     --database-url "host=localhost user=strata dbname=chain" \
//!     --categories msg_execute_contracts \
//!     --lcd-url http://localhost:1317
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) flips a shutdown flag; workers finish the entry they
//! are on, stop polling, and the process exits cleanly. Progress is in
//! the `sync` table, so the next start resumes where this one stopped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use strata_ingest::metrics::{init_metrics, start_metrics_server};
use strata_ingest::store::limiter;
use strata_ingest::store::postgres::DEFAULT_SCHEMA;
use strata_ingest::{
    ContractDirectory, HttpContractDirectory, LimitedStore, PostgresStore, SyncCursor, Worker,
    WorkerConfig,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Strata ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "strata-ingest")]
#[command(about = "Contract message indexer daemon")]
#[command(version)]
struct Args {
    /// Postgres connection string (tokio-postgres parameter format)
    #[arg(long)]
    database_url: String,

    /// Postgres schema holding all generated tables
    #[arg(long, default_value = DEFAULT_SCHEMA)]
    schema: String,

    /// Message categories to ingest (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "msg_execute_contracts,msg_instantiate_contracts"
    )]
    categories: Vec<String>,

    /// Seconds between ingestion passes
    #[arg(long, default_value = "30")]
    poll_interval: u64,

    /// Maximum in-flight store operations
    #[arg(long, default_value_t = limiter::DEFAULT_CAPACITY)]
    max_connections: usize,

    /// Chain LCD endpoint for contract diagnostics (optional)
    #[arg(long)]
    lcd_url: Option<String>,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("strata_ingest=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Strata ingestion daemon starting...");
    tracing::info!("Configuration:");
    tracing::info!("  Schema: {}", args.schema);
    tracing::info!("  Categories: {}", args.categories.join(", "));
    tracing::info!("  Poll interval: {}s", args.poll_interval);
    tracing::info!("  Max connections: {}", args.max_connections);
    tracing::info!("  LCD: {}", args.lcd_url.as_deref().unwrap_or("disabled"));

    if args.metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(args.metrics_port, handle).await?;
    }

    let store = PostgresStore::connect(&args.database_url, &args.schema)
        .await
        .context("Failed to connect to Postgres")?;
    let store = Arc::new(LimitedStore::new(store, args.max_connections));

    SyncCursor::new(Arc::clone(&store))
        .ensure_schema()
        .await
        .context("Failed to create the sync table")?;

    let directory: Option<Arc<dyn ContractDirectory>> = args
        .lcd_url
        .as_deref()
        .map(|url| Arc::new(HttpContractDirectory::new(url)) as Arc<dyn ContractDirectory>);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        let _ = shutdown_tx.send(true);
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut workers = Vec::new();
    for category in &args.categories {
        let mut config = WorkerConfig::new(category);
        config.poll_interval = Duration::from_secs(args.poll_interval);
        let worker = Worker::new(Arc::clone(&store), directory.clone(), config);
        let shutdown = shutdown_rx.clone();
        workers.push(tokio::spawn(async move {
            worker.run(shutdown).await;
        }));
    }

    for worker in workers {
        if let Err(err) = worker.await {
            tracing::warn!(%err, "worker task panicked");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

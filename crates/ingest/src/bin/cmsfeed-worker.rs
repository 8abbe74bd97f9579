//! cmsfeed-worker: discovery sensor + ingestion runner for the monthly CMS
//! Medicare Advantage enrollment release.
//!
//! Pipeline flow: interval tick → sensor probe → run request → ingestion
//! task → append into the target table.

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use cmsfeed_core::config::{load_dotenv, Config};
use cmsfeed_core::Period;
use cmsfeed_ingest::{
    FileState, IngestionTask, MemoryState, Pipeline, PipelineState, ReqwestClient, Sensor,
    SourceClient, SourceTemplates,
};
use cmsfeed_warehouse::{MemoryWarehouse, PgWarehouse, TableMerge, Warehouse};

// ── CLI ─────────────────────────────────────────────────────────────

/// Discovery-driven ingestion worker for CMS monthly enrollment data.
#[derive(Parser, Debug)]
#[command(name = "cmsfeed-worker", version, about)]
struct Cli {
    /// Load into an in-memory table and keep state changes in memory.
    #[arg(long, global = true, env = "CMSFEED_DRY_RUN")]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tick and drain on the sensor interval until SIGINT or SIGTERM.
    Run {
        /// Override `SENSOR_INTERVAL_SECS`.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_secs: Option<u64>,
    },
    /// One sensor evaluation, then drain queued runs.
    Tick,
    /// Re-run a registered partition (backfill).
    Materialize {
        /// Period in `Month-YYYY` form, e.g. `November-2025`.
        #[arg(long)]
        partition: Period,
        /// Source URL; defaults to the configured template.
        #[arg(long)]
        url: Option<String>,
    },
    /// Print cursor, partitions and runs as JSON.
    Status,
}

// ── wiring ──────────────────────────────────────────────────────────

/// `needs_warehouse = false` (status) skips connecting to PostgreSQL.
async fn build_pipeline(config: &Config, dry_run: bool, needs_warehouse: bool) -> anyhow::Result<Pipeline> {
    let file_state = FileState::open(config.storage.state_dir(), &config.sensor.pipeline)
        .context("failed to open pipeline state")?;

    let state: Arc<dyn PipelineState> = if dry_run {
        info!("dry run: state changes are not persisted");
        Arc::new(MemoryState::with_doc(file_state.snapshot().await))
    } else {
        Arc::new(file_state)
    };

    let warehouse: Arc<dyn Warehouse> = if dry_run || !needs_warehouse {
        if dry_run {
            info!("dry run: loading into an in-memory warehouse");
        }
        Arc::new(MemoryWarehouse::new())
    } else if config.postgres.is_configured() {
        let pg = PgWarehouse::connect(&config.postgres.connection_string(), config.postgres.max_connections)
            .await
            .context("failed to connect to PostgreSQL")?;
        info!(host = %config.postgres.host, db = %config.postgres.database, "connected to PostgreSQL");
        Arc::new(pg)
    } else {
        bail!("PostgreSQL is not configured (set PG_USERNAME) and --dry-run was not given");
    };

    let client: Arc<dyn SourceClient> = Arc::new(ReqwestClient::new()?);
    let templates = SourceTemplates::from_config(&config.source)?;

    let sensor = Sensor::new(client.clone(), templates, config.source.probe_timeout());
    let task = IngestionTask::new(
        client,
        TableMerge::new(warehouse),
        &config.target.schema,
        &config.target.table,
        &config.storage.scratch_dir,
        &config.source.url_template,
    );

    let mut pipeline = Pipeline::new(&config.sensor.pipeline, state, sensor, task);
    if !dry_run {
        pipeline = pipeline.with_run_log(config.storage.run_log_dir());
    }
    Ok(pipeline)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let needs_warehouse = !matches!(cli.command, Command::Status);
    let pipeline = build_pipeline(&config, cli.dry_run, needs_warehouse).await?;

    match cli.command {
        Command::Run { interval_secs } => {
            let interval = interval_secs
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.sensor.interval());
            pipeline.run_forever(interval).await;
        }
        Command::Tick => {
            let report = pipeline.tick_and_drain().await?;
            print_json(&report)?;
        }
        Command::Materialize { partition, url } => {
            let record = pipeline.materialize(partition, url).await?;
            print_json(&record)?;
        }
        Command::Status => {
            let status = pipeline.status().await?;
            print_json(&status)?;
        }
    }

    info!("cmsfeed-worker exiting");
    Ok(())
}

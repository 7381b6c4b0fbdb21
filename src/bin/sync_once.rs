use anyhow::Result;
use clap::Parser;
use serde_json::to_string_pretty;
use std::path::PathBuf;
use tracing::info;

use catalog_sync::config;
use catalog_sync::db;
use catalog_sync::gateway::HttpGateway;
use catalog_sync::sync;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one catalog sync cycle and print its counters"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override sync.max_items
    #[arg(long)]
    max_items: Option<u32>,

    /// Override sync.batch_size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Retry records that previously failed
    #[arg(long)]
    include_failed: bool,

    /// Map and report only; nothing is submitted or written
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let mut opts = cfg.sync_options();
    if let Some(n) = args.max_items {
        opts.max_items = n;
    }
    if let Some(n) = args.batch_size {
        opts.batch_size = n;
    }
    opts.include_failed |= args.include_failed;
    opts.dry_run = args.dry_run;

    let gateway = HttpGateway::from_config(&cfg.marketplace, opts.request_timeout)?;
    let result = sync::run_cycle(&pool, &gateway, &opts).await?;
    println!("{}", to_string_pretty(&result)?);

    let counts = db::count_by_status(&pool).await?;
    info!(
        pending = counts.pending,
        processing = counts.processing,
        success = counts.success,
        failed = counts.failed,
        "store state after cycle"
    );
    Ok(())
}

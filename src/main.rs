use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use catalog_sync::config;
use catalog_sync::db;
use catalog_sync::gateway::HttpGateway;
use catalog_sync::sync;

#[derive(Debug, Parser)]
#[command(author, version, about = "Keep the marketplace catalog in sync with local products")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
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

    let gateway = HttpGateway::from_config(&cfg.marketplace, cfg.request_timeout())?;
    let opts = cfg.sync_options();
    let interval = cfg.sync_interval();

    info!(interval_secs = interval.as_secs(), once = args.once, "starting catalog sync");
    loop {
        // Cycles never overlap: the next sleep starts after this one returns.
        match sync::run_cycle(&pool, &gateway, &opts).await {
            Ok(result) => info!(%result, "cycle complete"),
            Err(err) => error!(?err, "sync cycle aborted"),
        }
        if args.once {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    pool.close().await;
    Ok(())
}

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use catalog_sync::config;
use catalog_sync::db;

#[derive(Debug, Parser)]
#[command(author, version, about = "Move failed products back to pending")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Product ids to reset; resets every failed product when omitted
    #[arg(long = "id", value_delimiter = ',')]
    ids: Vec<i64>,
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

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let scope = if args.ids.is_empty() {
        None
    } else {
        Some(args.ids.as_slice())
    };
    let reset = db::reset_failed(&pool, scope).await?;
    info!(reset, "failed products reset to pending");
    println!("{reset}");
    Ok(())
}

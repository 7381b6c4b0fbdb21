use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use catalog_sync::config;
use catalog_sync::db;
use catalog_sync::model::NewProduct;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load products from a JSON array into the local store, upserting by barcode"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// JSON file holding an array of products
    #[arg(long)]
    file: PathBuf,
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

    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;
    let products: Vec<NewProduct> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", args.file.display()))?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let mut imported = 0usize;
    for product in &products {
        if product.barcode.trim().is_empty() {
            warn!(title = %product.title, "skipping product without barcode");
            continue;
        }
        db::upsert_product(&pool, product).await?;
        imported += 1;
    }

    info!(imported, total = products.len(), "import finished");
    Ok(())
}

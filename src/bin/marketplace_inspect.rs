use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use catalog_sync::config;
use catalog_sync::gateway::{HttpGateway, MarketplaceGateway};

#[derive(Parser, Debug)]
#[command(about = "Print marketplace catalog data used for product mapping")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// List the flattened category tree
    #[arg(long)]
    categories: bool,

    /// List brands
    #[arg(long)]
    brands: bool,

    /// Show the attributes of one category
    #[arg(long)]
    attributes: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let client = HttpGateway::from_config(&cfg.marketplace, cfg.request_timeout())?;

    if args.categories {
        for c in client.list_categories().await? {
            let leaf = if c.is_leaf { " (leaf)" } else { "" };
            match c.parent_id {
                Some(parent) => println!("{} {}{} <- {}", c.id, c.name, leaf, parent),
                None => println!("{} {}{}", c.id, c.name, leaf),
            }
        }
    }

    if args.brands {
        for b in client.list_brands().await? {
            println!("{} {}", b.id, b.name);
        }
    }

    if let Some(category_id) = args.attributes {
        println!("Category {category_id} attributes:");
        for a in client.get_category_attributes(category_id).await? {
            let required = if a.required { "required" } else { "optional" };
            let custom = if a.allow_custom { ", custom allowed" } else { "" };
            println!("  {} {} [{}{}]", a.id, a.name, required, custom);
            for (id, name) in &a.values {
                println!("    {} -> {}", id, name);
            }
        }
    }
    Ok(())
}

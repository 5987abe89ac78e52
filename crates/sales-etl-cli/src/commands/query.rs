use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use sales_etl_engine::resolve::create_warehouse;

use super::load_pipeline;

#[derive(Debug, Subcommand)]
pub enum QueryCommand {
    /// Every product, ordered by product id
    List,
    /// One product's totals
    Get { product_id: i64 },
    /// Products with the highest sales amount
    Top {
        #[arg(default_value_t = 10)]
        n: u32,
    },
    /// Product count and grand totals
    Summary,
}

/// Execute the `query` command: read the aggregate table and print JSON.
pub async fn execute(pipeline_path: &Path, query: QueryCommand) -> Result<()> {
    let config = load_pipeline(pipeline_path)?;
    let warehouse = create_warehouse(&config.warehouse).context("Invalid warehouse config")?;

    let output = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
        let value = match query {
            QueryCommand::List => serde_json::to_value(warehouse.list_aggregates()?)?,
            QueryCommand::Get { product_id } => match warehouse.get_aggregate(product_id)? {
                Some(row) => serde_json::to_value(row)?,
                None => anyhow::bail!(
                    "Product {product_id} not found in {}",
                    warehouse.describe()
                ),
            },
            QueryCommand::Top { n } => serde_json::to_value(warehouse.top_by_amount(n)?)?,
            QueryCommand::Summary => serde_json::to_value(warehouse.summary()?)?,
        };
        Ok(value)
    })
    .await
    .map_err(|e| anyhow::anyhow!("Query task panicked: {e}"))??;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

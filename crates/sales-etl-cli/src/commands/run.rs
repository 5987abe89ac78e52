use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use sales_etl_engine::{build_run_context, run_pipeline, ExecutionOptions, PipelineResult};
use sales_etl_types::RunKey;

use super::load_pipeline;

/// Execute the `run` command: parse, validate, and run a pipeline.
pub async fn execute(pipeline_path: &Path, run_key: Option<&str>, dry_run: bool) -> Result<()> {
    let config = load_pipeline(pipeline_path)?;
    let run_key = match run_key {
        Some(raw) => RunKey::new(raw)?,
        None => RunKey::today(),
    };

    tracing::info!(
        pipeline = %config.pipeline,
        run_key = %run_key,
        online = %config.sources.online.describe(),
        instore = %config.sources.instore.path.display(),
        warehouse = %config.warehouse.describe(),
        "Pipeline validated"
    );

    let ctx = Arc::new(build_run_context(&config, run_key)?);
    let result = run_pipeline(ctx, &ExecutionOptions { dry_run }).await?;

    if result.dry_run {
        print_dry_run(&config.pipeline, &result);
        return Ok(());
    }

    println!("Pipeline '{}' completed successfully.", config.pipeline);
    print_counts(&result);
    println!("  Products loaded: {}", result.rows_loaded);
    println!("  Duration:        {:.2}s", result.duration_secs);
    if result.retry_count > 0 {
        println!("  Retries:         {}", result.retry_count);
    }
    Ok(())
}

fn print_counts(result: &PipelineResult) {
    println!("  Run key:         {}", result.run_key);
    println!("  Online rows:     {}", result.rows_online);
    println!("  In-store rows:   {}", result.rows_instore);
    println!("  Dropped rows:    {}", result.drops.dropped);
    if result.drops.dropped > 0 {
        println!("    Reasons:       {}", result.drops.summary());
    }
}

fn print_dry_run(pipeline: &str, result: &PipelineResult) {
    println!("Dry run of '{pipeline}' (warehouse not modified).");
    print_counts(result);
    println!("  Duration:        {:.2}s", result.duration_secs);
    println!();
    println!("{:>12}  {:>14}  {:>17}", "product_id", "total_quantity", "total_sale_amount");
    for row in &result.aggregates {
        println!(
            "{:>12}  {:>14}  {:>17}",
            row.product_id, row.total_quantity, row.total_sale_amount
        );
    }
    println!("({} products)", result.aggregates.len());
}

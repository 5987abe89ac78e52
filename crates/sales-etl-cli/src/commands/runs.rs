use std::path::Path;

use anyhow::Result;
use sales_etl_engine::resolve::create_state_backend;
use sales_etl_types::state::{PipelineId, RunRecord};

use super::load_pipeline;

/// Execute the `runs` command: print recent run history, newest first.
pub async fn execute(pipeline_path: &Path, limit: u32) -> Result<()> {
    let config = load_pipeline(pipeline_path)?;
    let state = create_state_backend(&config)?;
    let pipeline = PipelineId::new(config.pipeline.clone());

    let runs = tokio::task::spawn_blocking(move || state.list_runs(&pipeline, limit))
        .await
        .map_err(|e| anyhow::anyhow!("Run history task panicked: {e}"))??;

    if runs.is_empty() {
        println!("No runs recorded for pipeline '{}'.", config.pipeline);
        return Ok(());
    }

    println!(
        "{:>6}  {:<24}  {:<9}  {:<20}  {:>8}  {:>8}  {:>8}  {:>8}",
        "ID", "RUN KEY", "STATUS", "STARTED", "ONLINE", "INSTORE", "DROPPED", "LOADED"
    );
    for run in &runs {
        print_run(run);
    }
    Ok(())
}

fn print_run(run: &RunRecord) {
    println!(
        "{:>6}  {:<24}  {:<9}  {:<20}  {:>8}  {:>8}  {:>8}  {:>8}",
        run.id,
        run.run_key.as_str(),
        run.status.as_str(),
        run.started_at,
        run.stats.rows_online,
        run.stats.rows_instore,
        run.stats.rows_dropped,
        run.stats.rows_loaded,
    );
    if let Some(message) = &run.stats.error_message {
        println!("        error: {message}");
    }
}

use std::path::Path;

use anyhow::Result;
use sales_etl_engine::check_pipeline;
use sales_etl_types::StageError;

use super::load_pipeline;

/// Execute the `check` command: validate pipeline config and probe every
/// component.
pub async fn execute(pipeline_path: &Path) -> Result<()> {
    let config = load_pipeline(pipeline_path)?;
    println!("Pipeline structure: OK");

    let result = check_pipeline(&config).await?;

    print_probe("Online source", &result.online);
    print_probe("In-store file", &result.instore);
    print_probe("Warehouse", &result.warehouse);
    if result.state_ok {
        println!("State backend:     OK");
    } else {
        println!("State backend:     FAILED");
    }

    if result.all_ok() {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}

fn print_probe(label: &str, result: &Result<String, StageError>) {
    let (status, detail) = match result {
        Ok(message) => ("OK", message.clone()),
        Err(e) => ("FAILED", e.to_string()),
    };
    println!("{:18} {}", format!("{label}:"), status);
    if !detail.is_empty() {
        println!("  {detail}");
    }
}

pub mod check;
pub mod query;
pub mod run;
pub mod runs;

use std::path::Path;

use anyhow::{Context, Result};
use sales_etl_engine::config::types::PipelineConfig;
use sales_etl_engine::config::{parser, validator};

/// Parse and validate a pipeline file.
fn load_pipeline(pipeline_path: &Path) -> Result<PipelineConfig> {
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;
    validator::validate_pipeline(&config)?;
    Ok(config)
}

//! Pipeline YAML parsing with environment variable substitution.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::config::types::PipelineConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Replace every `${NAME}` with the value of environment variable `NAME`.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = BTreeSet::new();
    let substituted = ENV_VAR_RE.replace_all(input, |cap: &Captures<'_>| {
        let name = &cap[1];
        std::env::var(name).unwrap_or_else(|_| {
            missing.insert(name.to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        let names: Vec<String> = missing.into_iter().collect();
        anyhow::bail!("Missing environment variable(s): {}", names.join(", "));
    }

    Ok(substituted.into_owned())
}

/// Parse pipeline YAML text after env var substitution.
///
/// # Errors
///
/// Returns an error if substitution fails or the YAML does not match the
/// pipeline shape.
pub fn parse_pipeline_str(yaml: &str) -> Result<PipelineConfig> {
    let substituted = substitute_env_vars(yaml)?;
    serde_yaml::from_str(&substituted).context("Failed to parse pipeline YAML")
}

/// Parse a pipeline YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or its contents are invalid.
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    parse_pipeline_str(&content)
        .with_context(|| format!("Invalid pipeline file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_set_variables() {
        std::env::set_var("SALES_ETL_TEST_HOST", "pg.example.com");
        let out = substitute_env_vars("host: ${SALES_ETL_TEST_HOST}\nport: 5432").unwrap();
        assert_eq!(out, "host: pg.example.com\nport: 5432");
        std::env::remove_var("SALES_ETL_TEST_HOST");
    }

    #[test]
    fn repeated_variable_substituted_everywhere() {
        std::env::set_var("SALES_ETL_TEST_REPEAT", "x");
        let out = substitute_env_vars("${SALES_ETL_TEST_REPEAT}-${SALES_ETL_TEST_REPEAT}").unwrap();
        assert_eq!(out, "x-x");
        std::env::remove_var("SALES_ETL_TEST_REPEAT");
    }

    #[test]
    fn text_without_references_passes_through() {
        let input = "pipeline: retail_sales_etl\nprice: $5";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn all_missing_variables_reported_once() {
        let err = substitute_env_vars(
            "${SALES_ETL_MISSING_B} ${SALES_ETL_MISSING_A} ${SALES_ETL_MISSING_B}",
        )
        .unwrap_err()
        .to_string();
        assert_eq!(
            err,
            "Missing environment variable(s): SALES_ETL_MISSING_A, SALES_ETL_MISSING_B"
        );
    }

    #[test]
    fn parses_pipeline_with_substituted_credentials() {
        std::env::set_var("SALES_ETL_TEST_PG_PASSWORD", "s3cret");
        let yaml = r#"
version: "1.0"
pipeline: retail_sales_etl
sources:
  online:
    host: localhost
    user: etl
    password: ${SALES_ETL_TEST_PG_PASSWORD}
    database: retail
  instore:
    path: /opt/data/instore_sales.csv
warehouse:
  host: localhost
  user: etl
  database: warehouse
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        assert_eq!(config.sources.online.password.as_deref(), Some("s3cret"));
        assert_eq!(config.pipeline, "retail_sales_etl");
        std::env::remove_var("SALES_ETL_TEST_PG_PASSWORD");
    }

    #[test]
    fn malformed_yaml_errors() {
        assert!(parse_pipeline_str("sources: [unclosed: {{").is_err());
    }

    #[test]
    fn missing_file_names_path() {
        let err = parse_pipeline(Path::new("/nonexistent/pipeline.yaml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Failed to read pipeline file"));
    }
}

//! Semantic validation for parsed pipeline configuration values.

use anyhow::{bail, Result};

use crate::config::types::{BackoffConfig, DatabaseConfig, DbBackend, PipelineConfig};

/// SQL identifiers we are willing to quote and send to a database.
fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63
}

fn validate_identifier(value: Option<&str>, context: &str, errors: &mut Vec<String>) {
    if let Some(name) = value {
        if !is_valid_identifier(name) {
            errors.push(format!(
                "{context}: '{name}' is not a valid identifier (letters, digits, '_', max 63)"
            ));
        }
    }
}

fn require(value: Option<&str>, context: &str, field: &str, errors: &mut Vec<String>) {
    if value.map_or(true, |v| v.trim().is_empty()) {
        errors.push(format!("{context}: '{field}' is required for the postgres backend"));
    }
}

/// Validate connection parameters for one database endpoint.
fn validate_database(db: &DatabaseConfig, context: &str, errors: &mut Vec<String>) {
    match db.backend {
        DbBackend::Postgres => {
            require(db.host.as_deref(), context, "host", errors);
            require(db.user.as_deref(), context, "user", errors);
            require(db.database.as_deref(), context, "database", errors);
            if db.port == Some(0) {
                errors.push(format!("{context}: port must be > 0"));
            }
        }
        DbBackend::Sqlite => {
            if db.path.as_ref().map_or(true, |p| p.as_os_str().is_empty()) {
                errors.push(format!("{context}: 'path' is required for the sqlite backend"));
            }
        }
    }
    if db.connect_timeout_secs == Some(0) {
        errors.push(format!("{context}: connect_timeout_secs must be > 0"));
    }
    if db.statement_timeout_secs == Some(0) {
        errors.push(format!("{context}: statement_timeout_secs must be > 0"));
    }
    validate_identifier(db.table.as_deref(), &format!("{context}.table"), errors);
}

/// Validate a parsed pipeline configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    validate_database(&config.sources.online, "sources.online", &mut errors);
    if config.sources.online.schema.is_some() {
        errors.push("sources.online: 'schema' is only meaningful for the warehouse".to_string());
    }

    if config.sources.instore.path.as_os_str().is_empty() {
        errors.push("sources.instore: 'path' must not be empty".to_string());
    }
    if config.sources.instore.delimiter_byte().is_none() {
        errors.push(format!(
            "sources.instore: delimiter '{}' must be a single ASCII character",
            config.sources.instore.delimiter.escape_default()
        ));
    }

    validate_database(&config.warehouse, "warehouse", &mut errors);
    validate_identifier(
        config.warehouse.schema.as_deref(),
        "warehouse.schema",
        &mut errors,
    );
    if config.warehouse.backend == DbBackend::Sqlite && config.warehouse.schema.is_some() {
        errors.push("warehouse: 'schema' is not supported by the sqlite backend".to_string());
    }

    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }
    if let BackoffConfig::Exponential {
        base_secs,
        max_secs,
    } = config.retry.backoff
    {
        if max_secs < base_secs {
            errors.push(format!(
                "retry.backoff: max_secs ({max_secs}) must be >= base_secs ({base_secs})"
            ));
        }
    }

    if config.lease_ttl_secs == 0 {
        errors.push("lease_ttl_secs must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;

    fn valid_yaml() -> &'static str {
        r#"
version: "1.0"
pipeline: retail_sales_etl
sources:
  online:
    host: localhost
    user: etl
    database: retail
  instore:
    path: /opt/data/instore_sales.csv
warehouse:
  host: localhost
  user: etl
  database: warehouse
  schema: retail_data_warehouse
"#
    }

    fn validation_error(yaml: &str) -> String {
        let config = parse_pipeline_str(yaml).unwrap();
        validate_pipeline(&config).unwrap_err().to_string()
    }

    #[test]
    fn valid_pipeline_passes() {
        let config = parse_pipeline_str(valid_yaml()).unwrap();
        assert!(validate_pipeline(&config).is_ok());
    }

    #[test]
    fn wrong_version_fails() {
        let err = validation_error(&valid_yaml().replace("\"1.0\"", "\"2.0\""));
        assert!(err.contains("Unsupported pipeline version"));
    }

    #[test]
    fn empty_pipeline_name_fails() {
        let err = validation_error(&valid_yaml().replace("retail_sales_etl", "\"\""));
        assert!(err.contains("Pipeline name must not be empty"));
    }

    #[test]
    fn postgres_requires_host_user_database() {
        let yaml = valid_yaml().replace("    host: localhost\n    user: etl\n    database: retail\n", "    port: 5432\n");
        let err = validation_error(&yaml);
        assert!(err.contains("sources.online: 'host' is required"));
        assert!(err.contains("sources.online: 'user' is required"));
        assert!(err.contains("sources.online: 'database' is required"));
    }

    #[test]
    fn sqlite_requires_path() {
        let yaml = valid_yaml().replace(
            "  host: localhost\n  user: etl\n  database: warehouse\n  schema: retail_data_warehouse\n",
            "  backend: sqlite\n",
        );
        let err = validation_error(&yaml);
        assert!(err.contains("warehouse: 'path' is required for the sqlite backend"));
    }

    #[test]
    fn hostile_identifiers_rejected() {
        let yaml = valid_yaml().replace("retail_data_warehouse", "\"x; DROP TABLE y\"");
        let err = validation_error(&yaml);
        assert!(err.contains("warehouse.schema"));
    }

    #[test]
    fn bad_delimiter_rejected() {
        let yaml = valid_yaml().replace(
            "    path: /opt/data/instore_sales.csv\n",
            "    path: /opt/data/instore_sales.csv\n    delimiter: \"::\"\n",
        );
        let err = validation_error(&yaml);
        assert!(err.contains("single ASCII character"));
    }

    #[test]
    fn retry_and_lease_bounds() {
        let yaml = format!(
            "{}retry:\n  max_attempts: 0\n  backoff:\n    kind: exponential\n    base_secs: 10\n    max_secs: 1\nlease_ttl_secs: 0\n",
            valid_yaml()
        );
        let err = validation_error(&yaml);
        assert!(err.contains("retry.max_attempts must be at least 1"));
        assert!(err.contains("max_secs (1) must be >= base_secs (10)"));
        assert!(err.contains("lease_ttl_secs must be > 0"));
    }

    #[test]
    fn identifier_rules() {
        assert!(is_valid_identifier("sales_aggregated"));
        assert!(is_valid_identifier("_t1"));
        assert!(!is_valid_identifier("1table"));
        assert!(!is_valid_identifier("sales-aggregated"));
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }
}

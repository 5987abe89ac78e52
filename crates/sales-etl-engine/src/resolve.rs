//! Component construction from pipeline config, and state backend creation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use sales_etl_state::{SqliteStateBackend, StateBackend};
use sales_etl_types::state::PipelineId;
use sales_etl_types::{RunKey, StageError};

use crate::artifact::{ArtifactStore, FsArtifactStore};
use crate::config::types::{
    DatabaseConfig, DbBackend, InstoreConfig, PipelineConfig, StateBackendKind,
};
use crate::context::RunContext;
use crate::error::PipelineError;
use crate::orchestrator::RetryPolicy;
use crate::source::{InstoreFileSource, PostgresSalesSource, SalesSource, SqliteSalesSource};
use crate::warehouse::{PostgresWarehouse, SqliteWarehouse, Warehouse};

/// `$HOME/.sales-etl`, or `/tmp/.sales-etl` without a home directory.
fn default_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sales-etl")
}

/// Reader for the online sales table.
///
/// # Errors
///
/// Returns a `config` [`StageError`] when required connection parameters are
/// missing.
pub fn create_online_source(db: &DatabaseConfig) -> Result<Arc<dyn SalesSource>, StageError> {
    match db.backend {
        DbBackend::Postgres => Ok(Arc::new(PostgresSalesSource::new(db)?) as Arc<dyn SalesSource>),
        DbBackend::Sqlite => Ok(Arc::new(SqliteSalesSource::new(db)?) as Arc<dyn SalesSource>),
    }
}

/// Reader for the in-store delimited file.
///
/// # Errors
///
/// Returns a `config` [`StageError`] for an unusable delimiter.
pub fn create_instore_source(config: &InstoreConfig) -> Result<Arc<dyn SalesSource>, StageError> {
    Ok(Arc::new(InstoreFileSource::new(config)?) as Arc<dyn SalesSource>)
}

/// Writer for the aggregate table.
///
/// # Errors
///
/// Returns a `config` [`StageError`] when required connection parameters are
/// missing.
pub fn create_warehouse(db: &DatabaseConfig) -> Result<Arc<dyn Warehouse>, StageError> {
    match db.backend {
        DbBackend::Postgres => Ok(Arc::new(PostgresWarehouse::new(db)?) as Arc<dyn Warehouse>),
        DbBackend::Sqlite => Ok(Arc::new(SqliteWarehouse::new(db)?) as Arc<dyn Warehouse>),
    }
}

/// Artifact store rooted at the configured directory.
///
/// # Errors
///
/// Returns an `artifact` [`StageError`] if the directory cannot be created.
pub fn create_artifact_store(config: &PipelineConfig) -> Result<Arc<dyn ArtifactStore>, StageError> {
    let dir = config
        .artifacts
        .dir
        .clone()
        .unwrap_or_else(|| default_home().join("artifacts"));
    Ok(Arc::new(FsArtifactStore::open(dir)?) as Arc<dyn ArtifactStore>)
}

/// Open the run ledger.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or its schema created.
pub fn create_state_backend(config: &PipelineConfig) -> Result<Arc<dyn StateBackend>> {
    match config.state.backend {
        StateBackendKind::Sqlite => {
            let backend = if let Some(path) = &config.state.connection {
                SqliteStateBackend::open(Path::new(path)).context("Failed to open state DB")?
            } else {
                let state_path = default_home().join("state.db");
                SqliteStateBackend::open(&state_path)
                    .context("Failed to open default state DB")?
            };
            Ok(Arc::new(backend) as Arc<dyn StateBackend>)
        }
    }
}

pub(crate) fn check_state_backend(config: &PipelineConfig) -> bool {
    match create_state_backend(config) {
        Ok(_) => {
            tracing::info!("State backend: OK");
            true
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "State backend: FAILED");
            false
        }
    }
}

fn component_error(what: &'static str) -> impl FnOnce(StageError) -> PipelineError {
    move |e| PipelineError::Infrastructure(anyhow::Error::new(e).context(what))
}

/// Wire every component a run needs.
///
/// # Errors
///
/// Returns [`PipelineError::Infrastructure`] naming the component that could
/// not be constructed.
pub fn build_run_context(
    config: &PipelineConfig,
    run_key: RunKey,
) -> Result<RunContext, PipelineError> {
    Ok(RunContext {
        pipeline: PipelineId::new(config.pipeline.clone()),
        run_key,
        online: create_online_source(&config.sources.online)
            .map_err(component_error("sources.online"))?,
        instore: create_instore_source(&config.sources.instore)
            .map_err(component_error("sources.instore"))?,
        warehouse: create_warehouse(&config.warehouse).map_err(component_error("warehouse"))?,
        artifacts: create_artifact_store(config).map_err(component_error("artifacts"))?,
        state: create_state_backend(config)?,
        retry: RetryPolicy::from_config(&config.retry),
        lease_ttl: config.lease_ttl(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;
    use tempfile::tempdir;

    fn sqlite_config(dir: &Path) -> PipelineConfig {
        let yaml = format!(
            r#"
version: "1.0"
pipeline: retail_sales_etl
sources:
  online:
    backend: sqlite
    path: {dir}/retail.db
  instore:
    path: {dir}/instore_sales.csv
warehouse:
  backend: sqlite
  path: {dir}/warehouse.db
artifacts:
  dir: {dir}/artifacts
state:
  connection: {dir}/state.db
retry:
  max_attempts: 3
  backoff:
    kind: exponential
    base_secs: 1
    max_secs: 8
"#,
            dir = dir.display()
        );
        parse_pipeline_str(&yaml).unwrap()
    }

    #[test]
    fn create_state_backend_custom_path() {
        let dir = tempdir().unwrap();
        let config = sqlite_config(dir.path());
        let backend = create_state_backend(&config).unwrap();
        let run_id = backend
            .start_run(
                &PipelineId::new("retail_sales_etl"),
                &RunKey::new("2024-03-01").unwrap(),
            )
            .unwrap();
        assert!(run_id > 0);
        assert!(dir.path().join("state.db").exists());
    }

    #[test]
    fn build_run_context_wires_sqlite_components() {
        let dir = tempdir().unwrap();
        let config = sqlite_config(dir.path());
        let ctx = build_run_context(&config, RunKey::new("2024-03-01").unwrap()).unwrap();

        assert_eq!(ctx.pipeline.as_str(), "retail_sales_etl");
        assert_eq!(ctx.retry.max_attempts, 3);
        assert!(ctx.warehouse.describe().starts_with("sqlite://"));
        assert!(ctx.warehouse.describe().ends_with("/sales_aggregated"));
        assert!(ctx.instore.describe().contains("instore_sales.csv"));
        assert!(dir.path().join("artifacts").is_dir());
        assert_eq!(ctx.lease_target(), ctx.warehouse.describe());
    }

    #[test]
    fn bad_delimiter_names_the_component() {
        let dir = tempdir().unwrap();
        let mut config = sqlite_config(dir.path());
        config.sources.instore.delimiter = ";;".into();
        let err = build_run_context(&config, RunKey::new("2024-03-01").unwrap()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("sources.instore"), "{msg}");
        assert!(msg.contains("INVALID_DELIMITER"), "{msg}");
    }

    #[test]
    fn postgres_source_requires_host() {
        let db = DatabaseConfig {
            user: Some("etl".into()),
            database: Some("retail".into()),
            ..DatabaseConfig::default()
        };
        let err = create_online_source(&db).err().unwrap();
        assert_eq!(err.category, sales_etl_types::ErrorCategory::Config);
    }
}

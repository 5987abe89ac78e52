//! End-to-end pipeline runs against SQLite sources, a SQLite warehouse, and
//! a file-backed artifact store, plus fixture parsing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use sales_etl_engine::config::types::{DbBackend, PipelineConfig, StateBackendKind};
use sales_etl_engine::config::{parser, validator};
use sales_etl_engine::orchestrator::RetryPolicy;
use sales_etl_engine::transform::{MissingReason, SaleField};
use sales_etl_engine::warehouse::{SqliteWarehouse, Warehouse};
use sales_etl_engine::{
    build_run_context, check_pipeline, run_pipeline, ExecutionOptions, PipelineError, RunContext,
};
use sales_etl_types::state::{PipelineId, RunStatus, TaskStatus};
use sales_etl_types::{AggregatedSale, Amount, RunKey, StageError, TaskId};
use tempfile::TempDir;

fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("tests/fixtures/pipelines")
        .join(name)
}

fn key(raw: &str) -> RunKey {
    RunKey::new(raw).unwrap()
}

fn sale(product_id: i64, qty: i64, cents: i64) -> AggregatedSale {
    AggregatedSale {
        product_id,
        total_quantity: qty,
        total_sale_amount: Amount::from_cents(cents),
    }
}

/// A temp directory holding the online database, the in-store file, the
/// warehouse, the ledger, and the artifacts.
struct Fixture {
    dir: TempDir,
    config: PipelineConfig,
}

impl Fixture {
    fn new(online: &[(&str, &str, &str)], instore_csv: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let conn = rusqlite::Connection::open(dir.path().join("retail.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE online_sales (
                 product_id INTEGER,
                 quantity INTEGER,
                 sale_amount DECIMAL(10,2),
                 sale_date DATE
             )",
        )
        .unwrap();
        for (product_id, quantity, amount) in online {
            conn.execute(
                "INSERT INTO online_sales VALUES (?1, ?2, ?3, '2024-03-01')",
                rusqlite::params![product_id, quantity, amount],
            )
            .unwrap();
        }

        let fixture = Self {
            config: parser::parse_pipeline_str(&format!(
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
  max_attempts: 2
  backoff: {{ kind: fixed, delay_secs: 0 }}
"#,
                dir = dir.path().display()
            ))
            .unwrap(),
            dir,
        };
        fixture.write_instore(instore_csv);
        validator::validate_pipeline(&fixture.config).unwrap();
        fixture
    }

    fn write_instore(&self, contents: &str) {
        std::fs::write(&self.config.sources.instore.path, contents).unwrap();
    }

    fn context(&self, run_key: &str) -> RunContext {
        build_run_context(&self.config, key(run_key)).unwrap()
    }

    fn warehouse(&self) -> SqliteWarehouse {
        SqliteWarehouse::new(&self.config.warehouse).unwrap()
    }
}

const REJECTED_PRODUCT: i64 = 999;

/// Wraps the real warehouse; the first `poisoned` loads carry an extra row
/// that a trigger on the table aborts after the clear has run.
struct PoisonedWarehouse {
    inner: SqliteWarehouse,
    db_path: PathBuf,
    poisoned: AtomicU32,
}

impl PoisonedWarehouse {
    fn new(fx: &Fixture, poisoned: u32) -> Self {
        Self {
            inner: fx.warehouse(),
            db_path: fx.config.warehouse.path.clone().unwrap(),
            poisoned: AtomicU32::new(poisoned),
        }
    }

    fn install_reject_trigger(&self) -> Result<(), StageError> {
        let conn = rusqlite::Connection::open(&self.db_path)
            .map_err(|e| StageError::connection("CONNECTION_FAILED", e.to_string()))?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS sales_aggregated (
                 product_id INTEGER PRIMARY KEY,
                 total_quantity INTEGER,
                 total_sale_amount DECIMAL(10,2)
             );
             CREATE TRIGGER IF NOT EXISTS reject_product BEFORE INSERT ON sales_aggregated
             WHEN NEW.product_id = {REJECTED_PRODUCT}
             BEGIN SELECT RAISE(ABORT, 'product rejected'); END;"
        ))
        .map_err(|e| StageError::internal("TRIGGER_FAILED", e.to_string()))
    }
}

impl Warehouse for PoisonedWarehouse {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    fn replace_all(&self, rows: &[AggregatedSale]) -> Result<u64, StageError> {
        let poison = self
            .poisoned
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if poison {
            self.install_reject_trigger()?;
            let mut rows = rows.to_vec();
            rows.push(sale(REJECTED_PRODUCT, 1, 0));
            return self.inner.replace_all(&rows);
        }
        self.inner.replace_all(rows)
    }

    fn list_aggregates(&self) -> Result<Vec<AggregatedSale>, StageError> {
        self.inner.list_aggregates()
    }

    fn get_aggregate(&self, product_id: i64) -> Result<Option<AggregatedSale>, StageError> {
        self.inner.get_aggregate(product_id)
    }

    fn top_by_amount(&self, n: u32) -> Result<Vec<AggregatedSale>, StageError> {
        self.inner.top_by_amount(n)
    }

    fn probe(&self) -> Result<String, StageError> {
        self.inner.probe()
    }
}

const ONLINE: [(&str, &str, &str); 2] = [("1", "2", "9.99"), ("2", "1", "19.99")];
const INSTORE: &str = "product_id,quantity,sale_amount\n1,3,14.97\n";

#[test]
fn test_parse_and_validate_fixture_pipeline() {
    std::env::set_var("TEST_SOURCE_PG_HOST", "localhost");
    std::env::set_var("TEST_SOURCE_PG_PORT", "5433");
    std::env::set_var("TEST_SOURCE_PG_PASSWORD", "secret");
    std::env::set_var("TEST_WAREHOUSE_PG_HOST", "warehouse.internal");

    let config = parser::parse_pipeline(&fixture_path("retail_sales_etl.yaml"))
        .expect("Failed to parse fixture pipeline");

    assert_eq!(config.pipeline, "retail_sales_etl");
    assert_eq!(config.sources.online.backend, DbBackend::Postgres);
    assert_eq!(config.sources.online.port(), 5433);
    assert_eq!(config.sources.online.password.as_deref(), Some("secret"));
    assert_eq!(
        config.warehouse.describe(),
        "postgres://warehouse.internal:5432/warehouse"
    );
    assert_eq!(config.state.backend, StateBackendKind::Sqlite);
    assert_eq!(config.retry.max_attempts, 2);

    validator::validate_pipeline(&config).expect("Validation should pass");

    std::env::remove_var("TEST_SOURCE_PG_HOST");
    std::env::remove_var("TEST_SOURCE_PG_PORT");
    std::env::remove_var("TEST_SOURCE_PG_PASSWORD");
    std::env::remove_var("TEST_WAREHOUSE_PG_HOST");
}

#[test]
fn test_invalid_fixture_reports_every_problem() {
    let config = parser::parse_pipeline(&fixture_path("invalid_pipeline.yaml")).unwrap();
    let err = validator::validate_pipeline(&config).unwrap_err().to_string();

    for expected in [
        "Unsupported pipeline version '2.0'",
        "Pipeline name must not be empty",
        "sources.online: 'host' is required",
        "sources.online: 'user' is required",
        "sources.online.table: 'online sales'",
        "sources.instore: 'path' must not be empty",
        "single ASCII character",
        "'schema' is not supported by the sqlite backend",
        "retry.max_attempts must be at least 1",
    ] {
        assert!(err.contains(expected), "missing '{expected}' in:\n{err}");
    }
}

#[tokio::test]
async fn run_aggregates_both_sources_into_warehouse() {
    let fx = Fixture::new(&ONLINE, INSTORE);
    let ctx = Arc::new(fx.context("2024-03-01"));

    let result = run_pipeline(Arc::clone(&ctx), &ExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(result.rows_online, 2);
    assert_eq!(result.rows_instore, 1);
    assert_eq!(result.drops.dropped, 0);
    assert_eq!(result.rows_loaded, 2);
    assert_eq!(result.retry_count, 0);
    assert_eq!(
        fx.warehouse().list_aggregates().unwrap(),
        vec![sale(1, 5, 2496), sale(2, 1, 1999)]
    );

    let artifacts = fx.dir.path().join("artifacts");
    for name in [
        "online_extract_2024-03-01.csv",
        "instore_extract_2024-03-01.csv",
        "transformed_sales_2024-03-01.csv",
    ] {
        assert!(artifacts.join(name).is_file(), "{name} not written");
    }

    let runs = ctx
        .state
        .list_runs(&PipelineId::new("retail_sales_etl"), 10)
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].run_key, key("2024-03-01"));
    assert_eq!(runs[0].stats.rows_loaded, 2);
}

#[tokio::test]
async fn non_numeric_product_id_is_dropped_and_counted() {
    let fx = Fixture::new(&[("abc", "2", "9.99"), ("2", "1", "19.99")], INSTORE);
    let ctx = Arc::new(fx.context("2024-03-01"));

    let result = run_pipeline(ctx, &ExecutionOptions::default()).await.unwrap();

    assert_eq!(result.drops.dropped, 1);
    assert_eq!(
        result
            .drops
            .count(SaleField::ProductId, MissingReason::NotNumeric),
        1
    );
    assert_eq!(
        fx.warehouse().list_aggregates().unwrap(),
        vec![sale(1, 3, 1497), sale(2, 1, 1999)]
    );
}

#[tokio::test]
async fn consecutive_runs_leave_identical_table() {
    let fx = Fixture::new(&ONLINE, INSTORE);

    run_pipeline(Arc::new(fx.context("2024-03-01")), &ExecutionOptions::default())
        .await
        .unwrap();
    let first = fx.warehouse().list_aggregates().unwrap();

    run_pipeline(Arc::new(fx.context("2024-03-02")), &ExecutionOptions::default())
        .await
        .unwrap();
    // Same key again overwrites its own artifacts.
    run_pipeline(Arc::new(fx.context("2024-03-02")), &ExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(fx.warehouse().list_aggregates().unwrap(), first);
}

#[tokio::test]
async fn failed_load_keeps_previous_table_and_next_run_recovers() {
    let fx = Fixture::new(&ONLINE, INSTORE);
    run_pipeline(Arc::new(fx.context("2024-03-01")), &ExecutionOptions::default())
        .await
        .unwrap();
    let before = fx.warehouse().list_aggregates().unwrap();

    fx.write_instore("product_id,quantity,sale_amount\n1,3,14.97\n3,4,8.00\n");
    let mut poisoned = fx.context("2024-03-02");
    poisoned.warehouse = Arc::new(PoisonedWarehouse::new(&fx, 1));
    poisoned.retry = RetryPolicy::no_retry();
    let poisoned = Arc::new(poisoned);

    let err = run_pipeline(Arc::clone(&poisoned), &ExecutionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.failed_task(), Some(TaskId::Load));
    assert!(err.is_retryable());
    assert_eq!(fx.warehouse().list_aggregates().unwrap(), before);

    let runs = poisoned
        .state
        .list_runs(&PipelineId::new("retail_sales_etl"), 1)
        .unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);

    run_pipeline(Arc::new(fx.context("2024-03-03")), &ExecutionOptions::default())
        .await
        .unwrap();
    assert_eq!(
        fx.warehouse().list_aggregates().unwrap(),
        vec![sale(1, 5, 2496), sale(2, 1, 1999), sale(3, 4, 800)]
    );
}

#[tokio::test]
async fn rolled_back_load_is_retried_within_the_run() {
    let fx = Fixture::new(&ONLINE, INSTORE);
    let mut ctx = fx.context("2024-03-01");
    ctx.warehouse = Arc::new(PoisonedWarehouse::new(&fx, 1));

    let result = run_pipeline(Arc::new(ctx), &ExecutionOptions::default())
        .await
        .unwrap();

    assert_eq!(result.retry_count, 1);
    let load: Vec<_> = result
        .attempts
        .iter()
        .filter(|a| a.task == TaskId::Load)
        .map(|a| (a.attempt, a.status))
        .collect();
    assert_eq!(
        load,
        vec![(1, TaskStatus::Failed), (2, TaskStatus::Succeeded)]
    );
    assert_eq!(fx.warehouse().list_aggregates().unwrap().len(), 2);
}

#[tokio::test]
async fn missing_instore_file_fails_extract_and_skips_downstream() {
    let fx = Fixture::new(&ONLINE, INSTORE);
    run_pipeline(Arc::new(fx.context("2024-03-01")), &ExecutionOptions::default())
        .await
        .unwrap();
    let before = fx.warehouse().list_aggregates().unwrap();

    std::fs::remove_file(&fx.config.sources.instore.path).unwrap();
    let ctx = Arc::new(fx.context("2024-03-02"));
    let err = run_pipeline(Arc::clone(&ctx), &ExecutionOptions::default())
        .await
        .unwrap_err();

    match &err {
        PipelineError::Task { task, error } => {
            assert_eq!(*task, TaskId::ExtractInstore);
            assert_eq!(error.code, "FILE_NOT_FOUND");
        }
        other => panic!("expected task error, got {other}"),
    }
    assert_eq!(fx.warehouse().list_aggregates().unwrap(), before);

    let run = &ctx
        .state
        .list_runs(&PipelineId::new("retail_sales_etl"), 1)
        .unwrap()[0];
    let attempts = ctx.state.task_attempts(run.id).unwrap();
    let status_of = |task: TaskId| {
        attempts
            .iter()
            .filter(|a| a.task == task)
            .map(|a| a.status)
            .collect::<Vec<_>>()
    };
    // Not-found is transient: retried once before giving up.
    assert_eq!(
        status_of(TaskId::ExtractInstore),
        vec![TaskStatus::Failed, TaskStatus::Failed]
    );
    assert_eq!(status_of(TaskId::ExtractOnline), vec![TaskStatus::Succeeded]);
    assert_eq!(status_of(TaskId::Transform), vec![TaskStatus::UpstreamFailed]);
    assert_eq!(status_of(TaskId::Load), vec![TaskStatus::UpstreamFailed]);
}

#[tokio::test]
async fn held_lease_refuses_a_second_run() {
    let fx = Fixture::new(&ONLINE, INSTORE);
    let ctx = Arc::new(fx.context("2024-03-01"));
    let ttl = std::time::Duration::from_secs(3600);
    assert!(ctx
        .state
        .try_acquire_lease(&ctx.lease_target(), "retail_sales_etl:manual:run-0", ttl)
        .unwrap());

    let err = run_pipeline(Arc::clone(&ctx), &ExecutionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Orchestration(_)), "{err}");
    assert!(!fx.dir.path().join("artifacts/online_extract_2024-03-01.csv").exists());

    assert!(ctx
        .state
        .release_lease(&ctx.lease_target(), "retail_sales_etl:manual:run-0")
        .unwrap());
    run_pipeline(ctx, &ExecutionOptions::default()).await.unwrap();
}

#[tokio::test]
async fn dry_run_previews_without_touching_warehouse() {
    let fx = Fixture::new(&ONLINE, INSTORE);
    run_pipeline(Arc::new(fx.context("2024-03-01")), &ExecutionOptions::default())
        .await
        .unwrap();
    let before = fx.warehouse().list_aggregates().unwrap();

    fx.write_instore("product_id,quantity,sale_amount\n7,1,1.00\n");
    let ctx = Arc::new(fx.context("preview"));
    let result = run_pipeline(Arc::clone(&ctx), &ExecutionOptions { dry_run: true })
        .await
        .unwrap();

    assert!(result.dry_run);
    assert_eq!(result.aggregates.len(), 3);
    assert_eq!(result.rows_loaded, 0);
    assert_eq!(fx.warehouse().list_aggregates().unwrap(), before);
    assert_eq!(
        ctx.state
            .list_runs(&PipelineId::new("retail_sales_etl"), 10)
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn dry_run_with_same_key_leaves_in_flight_artifacts_alone() {
    let fx = Fixture::new(&ONLINE, INSTORE);
    let ctx = Arc::new(fx.context("2024-03-01"));
    run_pipeline(Arc::clone(&ctx), &ExecutionOptions::default())
        .await
        .unwrap();
    let artifacts = fx.dir.path().join("artifacts");
    let read_all = || {
        [
            "online_extract_2024-03-01.csv",
            "instore_extract_2024-03-01.csv",
            "transformed_sales_2024-03-01.csv",
        ]
        .map(|name| std::fs::read(artifacts.join(name)).unwrap())
    };
    let before = read_all();

    // A scheduled run with the same key is mid-flight and holds the lease.
    let ttl = std::time::Duration::from_secs(3600);
    assert!(ctx
        .state
        .try_acquire_lease(&ctx.lease_target(), "retail_sales_etl:2024-03-01:run-9", ttl)
        .unwrap());
    fx.write_instore("product_id,quantity,sale_amount\n7,1,1.00\n");

    let preview = run_pipeline(
        Arc::new(fx.context("2024-03-01")),
        &ExecutionOptions { dry_run: true },
    )
    .await
    .unwrap();

    assert!(preview.aggregates.iter().any(|a| a.product_id == 7));
    assert_eq!(read_all(), before);
    assert_eq!(
        fx.warehouse().list_aggregates().unwrap(),
        vec![sale(1, 5, 2496), sale(2, 1, 1999)]
    );
}

#[tokio::test]
async fn check_reports_each_component() {
    let fx = Fixture::new(&ONLINE, INSTORE);
    let ok = check_pipeline(&fx.config).await.unwrap();
    assert!(ok.all_ok(), "{ok:?}");

    std::fs::remove_file(&fx.config.sources.instore.path).unwrap();
    let missing = check_pipeline(&fx.config).await.unwrap();
    assert!(missing.online.is_ok());
    assert!(missing.warehouse.is_ok());
    assert_eq!(missing.instore.unwrap_err().code, "FILE_NOT_FOUND");
}

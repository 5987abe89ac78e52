//! Pipeline orchestrator: run ledger bookkeeping, the load lease, and the
//! extract/transform/load graph.

pub mod dag;
pub mod retry;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use sales_etl_state::error::Result as StateResult;
use sales_etl_state::StateBackend;
use sales_etl_types::state::{RunStats, RunStatus, TaskAttempt};
use sales_etl_types::{ArtifactKind, StageError, TaskId};

use crate::artifact::{ArtifactStore, MemoryArtifactStore};
use crate::config::types::PipelineConfig;
use crate::context::RunContext;
use crate::error::PipelineError;
use crate::execution::ExecutionOptions;
use crate::resolve::{
    check_state_backend, create_instore_source, create_online_source, create_warehouse,
};
use crate::result::{CheckResult, PipelineResult};
use crate::source::extract_to_artifact;
use crate::transform::{transform_artifacts, DropReport, TransformOutcome};
use crate::warehouse::load_from_artifact;

pub use self::dag::{Dag, DagReport, TaskOutcome, TaskRunner};
pub use self::retry::{Backoff, RetryPolicy};

/// What a stage body hands back.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Extracted { rows: u64 },
    Transformed(TransformOutcome),
    Loaded { rows: u64 },
}

/// Binds each [`TaskId`] to its stage body.
struct StageRunner {
    ctx: Arc<RunContext>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl TaskRunner for StageRunner {
    type Output = StageOutput;

    fn run(&self, task: TaskId) -> Result<StageOutput, StageError> {
        let ctx = &self.ctx;
        let artifacts = self.artifacts.as_ref();
        match task {
            TaskId::ExtractOnline => extract_to_artifact(
                ctx.online.as_ref(),
                artifacts,
                &ctx.run_key,
                ArtifactKind::RawExtractOnline,
            )
            .map(|rows| StageOutput::Extracted { rows }),
            TaskId::ExtractInstore => extract_to_artifact(
                ctx.instore.as_ref(),
                artifacts,
                &ctx.run_key,
                ArtifactKind::RawExtractInstore,
            )
            .map(|rows| StageOutput::Extracted { rows }),
            TaskId::Transform => transform_artifacts(artifacts, &ctx.run_key)
                .map(StageOutput::Transformed),
            TaskId::Load => load_from_artifact(
                ctx.warehouse.as_ref(),
                artifacts,
                &ctx.run_key,
            )
            .map(|rows| StageOutput::Loaded { rows }),
        }
    }
}

/// Run a ledger operation off the async runtime.
async fn on_ledger<T, F>(state: &Arc<dyn StateBackend>, op: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce(&dyn StateBackend) -> StateResult<T> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || op(state.as_ref()))
        .await
        .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("Run ledger task panicked: {e}")))?
        .map_err(PipelineError::from)
}

/// Run the pipeline once for `ctx.run_key`.
///
/// A normal run is recorded in the ledger and holds the warehouse lease for
/// its whole duration; a second concurrent run against the same table is
/// refused. A dry run extracts and transforms but skips load; its artifacts
/// stay in memory so they never replace those of a real run with the same key.
///
/// # Errors
///
/// Returns [`PipelineError::Task`] for the first failed task (in graph
/// order), [`PipelineError::Orchestration`] when the lease is held
/// elsewhere, or [`PipelineError::Infrastructure`] for ledger failures.
pub async fn run_pipeline(
    ctx: Arc<RunContext>,
    options: &ExecutionOptions,
) -> Result<PipelineResult, PipelineError> {
    let start = Instant::now();
    let dag = Dag::sales_etl()?;
    tracing::info!(
        pipeline = %ctx.pipeline,
        run_key = %ctx.run_key,
        dry_run = options.dry_run,
        "Starting pipeline run"
    );

    let run_id = if options.dry_run {
        None
    } else {
        Some(begin_run(&ctx).await?)
    };

    let skip = if options.dry_run {
        BTreeSet::from([TaskId::Load])
    } else {
        BTreeSet::new()
    };
    let artifacts: Arc<dyn ArtifactStore> = if options.dry_run {
        Arc::new(MemoryArtifactStore::new())
    } else {
        Arc::clone(&ctx.artifacts)
    };
    let runner = Arc::new(StageRunner {
        ctx: Arc::clone(&ctx),
        artifacts,
    });
    let executed = dag::execute(&dag, runner, &ctx.retry, &skip).await;

    if let Some(run_id) = run_id {
        release_lease(&ctx, run_id).await;
    }
    let report = match executed {
        Ok(report) => report,
        Err(e) => {
            if let Some(run_id) = run_id {
                let stats = RunStats {
                    error_message: Some(e.to_string()),
                    ..RunStats::default()
                };
                if let Err(ledger_err) = on_ledger(&ctx.state, move |s| {
                    s.complete_run(run_id, RunStatus::Failed, &stats)
                })
                .await
                {
                    tracing::warn!(run_id, error = %ledger_err, "Failed to record run failure");
                }
            }
            return Err(e);
        }
    };

    let failure = report
        .first_failure(&dag)
        .map(|(task, err)| PipelineError::task(task, err.clone()));
    let result = summarize(&ctx, run_id, options.dry_run, &report, start.elapsed());

    if let Some(run_id) = run_id {
        finish_run(&ctx, run_id, &result, failure.as_ref()).await?;
    }

    match failure {
        Some(err) => Err(err),
        None => {
            tracing::info!(
                pipeline = %ctx.pipeline,
                run_key = %ctx.run_key,
                rows_online = result.rows_online,
                rows_instore = result.rows_instore,
                rows_dropped = result.drops.dropped,
                rows_loaded = result.rows_loaded,
                products = result.aggregates.len(),
                retry_count = result.retry_count,
                duration_secs = result.duration_secs,
                "Pipeline run completed"
            );
            Ok(result)
        }
    }
}

/// Record the run and take the warehouse lease.
async fn begin_run(ctx: &Arc<RunContext>) -> Result<i64, PipelineError> {
    let pipeline = ctx.pipeline.clone();
    let run_key = ctx.run_key.clone();
    let run_id = on_ledger(&ctx.state, move |s| s.start_run(&pipeline, &run_key)).await?;

    let target = ctx.lease_target();
    let holder = ctx.lease_holder(run_id);
    let ttl = ctx.lease_ttl;
    let acquired = {
        let (target, holder) = (target.clone(), holder.clone());
        on_ledger(&ctx.state, move |s| s.try_acquire_lease(&target, &holder, ttl)).await
    };
    let err = match acquired {
        Ok(true) => {
            tracing::debug!(run_id, target = %target, holder = %holder, "Acquired load lease");
            return Ok(run_id);
        }
        Ok(false) => {
            tracing::warn!(run_id, target = %target, "Load lease held elsewhere, refusing to run");
            PipelineError::Orchestration(format!("load lease on {target} is held by another run"))
        }
        Err(e) => {
            tracing::error!(run_id, target = %target, error = %e, "Failed to acquire load lease");
            e
        }
    };

    let stats = RunStats {
        error_message: Some(err.to_string()),
        ..RunStats::default()
    };
    on_ledger(&ctx.state, move |s| {
        s.complete_run(run_id, RunStatus::Failed, &stats)
    })
    .await?;
    Err(err)
}

/// Best effort; an unreleased lease lapses after `lease_ttl`.
async fn release_lease(ctx: &Arc<RunContext>, run_id: i64) {
    let target = ctx.lease_target();
    let holder = ctx.lease_holder(run_id);
    match on_ledger(&ctx.state, move |s| s.release_lease(&target, &holder)).await {
        Ok(true) => tracing::debug!(run_id, "Released load lease"),
        Ok(false) => tracing::warn!(run_id, "Load lease was no longer held at release"),
        Err(e) => tracing::warn!(run_id, error = %e, "Failed to release load lease"),
    }
}

async fn finish_run(
    ctx: &Arc<RunContext>,
    run_id: i64,
    result: &PipelineResult,
    failure: Option<&PipelineError>,
) -> Result<(), PipelineError> {
    let attempts: Vec<TaskAttempt> = result.attempts.clone();
    let (status, error_message) = match failure {
        Some(err) => (RunStatus::Failed, Some(err.to_string())),
        None => (RunStatus::Completed, None),
    };
    let stats = RunStats {
        rows_online: result.rows_online,
        rows_instore: result.rows_instore,
        rows_dropped: result.drops.dropped,
        rows_loaded: result.rows_loaded,
        error_message,
    };
    on_ledger(&ctx.state, move |s| {
        for attempt in &attempts {
            s.record_task_attempt(run_id, attempt)?;
        }
        s.complete_run(run_id, status, &stats)
    })
    .await
}

fn summarize(
    ctx: &RunContext,
    run_id: Option<i64>,
    dry_run: bool,
    report: &DagReport<StageOutput>,
    elapsed: Duration,
) -> PipelineResult {
    let extracted = |task| match report.output(task) {
        Some(StageOutput::Extracted { rows }) => *rows,
        _ => 0,
    };
    let transformed = match report.output(TaskId::Transform) {
        Some(StageOutput::Transformed(outcome)) => Some(outcome),
        _ => None,
    };
    let rows_loaded = match report.output(TaskId::Load) {
        Some(StageOutput::Loaded { rows }) => *rows,
        _ => 0,
    };

    PipelineResult {
        run_id,
        run_key: ctx.run_key.clone(),
        dry_run,
        rows_online: extracted(TaskId::ExtractOnline),
        rows_instore: extracted(TaskId::ExtractInstore),
        drops: transformed.map_or_else(DropReport::default, |t| t.report.clone()),
        rows_loaded,
        aggregates: transformed.map_or_else(Vec::new, |t| t.aggregates.clone()),
        attempts: report.attempts.clone(),
        retry_count: report.retry_count(),
        duration_secs: elapsed.as_secs_f64(),
    }
}

/// Probe every configured component without running the pipeline.
///
/// # Errors
///
/// Returns an error only if a probe task panics; component failures are
/// reported in the [`CheckResult`].
pub async fn check_pipeline(config: &PipelineConfig) -> Result<CheckResult> {
    tracing::info!(pipeline = %config.pipeline, "Checking pipeline configuration");

    let online = create_online_source(&config.sources.online);
    let online_handle = tokio::task::spawn_blocking(move || online?.probe());
    let instore = create_instore_source(&config.sources.instore);
    let instore_handle = tokio::task::spawn_blocking(move || instore?.probe());
    let warehouse = create_warehouse(&config.warehouse);
    let warehouse_handle = tokio::task::spawn_blocking(move || warehouse?.probe());

    let online = online_handle
        .await
        .map_err(|e| anyhow::anyhow!("Online source probe task panicked: {e}"))?;
    let instore = instore_handle
        .await
        .map_err(|e| anyhow::anyhow!("In-store source probe task panicked: {e}"))?;
    let warehouse = warehouse_handle
        .await
        .map_err(|e| anyhow::anyhow!("Warehouse probe task panicked: {e}"))?;

    let state_ok = check_state_backend(config);

    Ok(CheckResult {
        online,
        instore,
        warehouse,
        state_ok,
    })
}

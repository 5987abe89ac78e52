//! Ledger backend trait definition.
//!
//! [`StateBackend`] is the storage contract for run history, per-task
//! attempt records, and the load lease. Model types live in
//! [`sales_etl_types::state`].

use std::time::Duration;

use sales_etl_types::state::{PipelineId, RunRecord, RunStats, RunStatus, TaskAttempt};
use sales_etl_types::RunKey;

use crate::error;

/// Storage contract for the run ledger.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Begin a new run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, pipeline: &PipelineId, run_key: &RunKey) -> error::Result<i64>;

    /// Finalize a run with status and aggregate stats.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats)
        -> error::Result<()>;

    /// Append one task attempt (or a never-invoked task's terminal status).
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn record_task_attempt(&self, run_id: i64, attempt: &TaskAttempt) -> error::Result<()>;

    /// Most recent runs of a pipeline, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure or
    /// when a stored row cannot be decoded.
    fn list_runs(&self, pipeline: &PipelineId, limit: u32) -> error::Result<Vec<RunRecord>>;

    /// Attempts recorded for a run, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure or
    /// when a stored row cannot be decoded.
    fn task_attempts(&self, run_id: i64) -> error::Result<Vec<TaskAttempt>>;

    /// Insert-if-absent lease on `target`.
    ///
    /// A lease older than `ttl` is considered abandoned and replaced. Returns
    /// `true` when `holder` now owns the lease.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn try_acquire_lease(&self, target: &str, holder: &str, ttl: Duration)
        -> error::Result<bool>;

    /// Drop the lease on `target` if `holder` owns it. Returns whether a row
    /// was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn release_lease(&self, target: &str, holder: &str) -> error::Result<bool>;
}

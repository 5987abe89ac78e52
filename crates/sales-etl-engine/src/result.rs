//! Pipeline execution result types.

use sales_etl_types::state::TaskAttempt;
use sales_etl_types::{AggregatedSale, RunKey, StageError};

use crate::transform::DropReport;

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Ledger id; `None` for dry runs.
    pub run_id: Option<i64>,
    pub run_key: RunKey,
    pub dry_run: bool,
    pub rows_online: u64,
    pub rows_instore: u64,
    pub drops: DropReport,
    pub rows_loaded: u64,
    /// Aggregate the transform produced, in product order.
    pub aggregates: Vec<AggregatedSale>,
    pub attempts: Vec<TaskAttempt>,
    pub retry_count: u32,
    pub duration_secs: f64,
}

/// Result of a pipeline check.
#[derive(Debug)]
pub struct CheckResult {
    pub online: Result<String, StageError>,
    pub instore: Result<String, StageError>,
    pub warehouse: Result<String, StageError>,
    pub state_ok: bool,
}

impl CheckResult {
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.online.is_ok() && self.instore.is_ok() && self.warehouse.is_ok() && self.state_ok
    }
}

//! Everything one pipeline run needs, resolved up front.

use std::sync::Arc;
use std::time::Duration;

use sales_etl_state::StateBackend;
use sales_etl_types::state::PipelineId;
use sales_etl_types::RunKey;

use crate::artifact::ArtifactStore;
use crate::orchestrator::RetryPolicy;
use crate::source::SalesSource;
use crate::warehouse::Warehouse;

/// Wired-up components for one run.
///
/// Built from a [`PipelineConfig`](crate::config::types::PipelineConfig) by
/// [`build_run_context`](crate::resolve::build_run_context); tests assemble
/// one directly.
pub struct RunContext {
    pub pipeline: PipelineId,
    pub run_key: RunKey,
    pub online: Arc<dyn SalesSource>,
    pub instore: Arc<dyn SalesSource>,
    pub warehouse: Arc<dyn Warehouse>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub state: Arc<dyn StateBackend>,
    pub retry: RetryPolicy,
    /// Age after which a held load lease counts as abandoned.
    pub lease_ttl: Duration,
}

impl RunContext {
    /// Lease key: one load at a time per warehouse table.
    #[must_use]
    pub fn lease_target(&self) -> String {
        self.warehouse.describe()
    }

    pub(crate) fn lease_holder(&self, run_id: i64) -> String {
        format!("{}:{}:run-{run_id}", self.pipeline, self.run_key)
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("pipeline", &self.pipeline)
            .field("run_key", &self.run_key)
            .field("online", &self.online.describe())
            .field("instore", &self.instore.describe())
            .field("warehouse", &self.warehouse.describe())
            .field("retry", &self.retry)
            .field("lease_ttl", &self.lease_ttl)
            .finish_non_exhaustive()
    }
}

//! Execution mode types for pipeline runs.

/// Runtime execution options (not part of pipeline YAML config).
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Extract and transform, but never touch the warehouse. The run is not
    /// recorded in the ledger and takes no load lease.
    pub dry_run: bool,
}

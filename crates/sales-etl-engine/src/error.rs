//! Pipeline error model.

use sales_etl_types::{StageError, TaskId};

/// Categorized pipeline error for retry decisions.
///
/// `Task` wraps the typed [`StageError`] a stage body returned, which
/// carries its own `retryable` flag.
///
/// `Orchestration` covers graph-level refusals (dependency not satisfied,
/// load lease held by another run).
///
/// `Infrastructure` wraps opaque host-side errors (ledger I/O, runtime
/// join failures) that are never retried.
#[derive(Debug)]
pub enum PipelineError {
    /// Typed stage failure.
    Task { task: TaskId, error: StageError },
    /// Graph could not proceed.
    Orchestration(String),
    /// Infrastructure error (state ledger, task join, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task { task, error } => write!(f, "task {task} failed: {error}"),
            Self::Orchestration(msg) => write!(f, "orchestration error: {msg}"),
            Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Task { error, .. } => Some(error),
            Self::Orchestration(_) => None,
            Self::Infrastructure(e) => Some(&**e),
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<sales_etl_state::StateError> for PipelineError {
    fn from(e: sales_etl_state::StateError) -> Self {
        Self::Infrastructure(anyhow::Error::new(e).context("run ledger"))
    }
}

impl PipelineError {
    pub fn task(task: TaskId, error: StageError) -> Self {
        Self::Task { task, error }
    }

    /// Returns `true` if this is a stage error its stage marked retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Task { error, .. } => error.retryable,
            Self::Orchestration(_) | Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed stage error if this is a `Task` variant.
    pub fn as_stage_error(&self) -> Option<&StageError> {
        match self {
            Self::Task { error, .. } => Some(error),
            Self::Orchestration(_) | Self::Infrastructure(_) => None,
        }
    }

    /// The task that failed, if any.
    pub fn failed_task(&self) -> Option<TaskId> {
        match self {
            Self::Task { task, .. } => Some(*task),
            Self::Orchestration(_) | Self::Infrastructure(_) => None,
        }
    }
}

//! Structured error model for pipeline stages.
//!
//! [`StageError`] carries a classification, a stable machine-readable code,
//! and the retry flag the orchestrator consults. Construct via the
//! category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a stage failure.
///
/// Determines default retry behavior and operator-facing categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing or malformed externally supplied parameters.
    Config,
    /// Source or warehouse unreachable, or a connection timed out (retryable).
    Connection,
    /// The source projection could not be executed (retryable).
    Query,
    /// Input file absent or unreadable (retryable).
    NotFound,
    /// Input could not be parsed as tabular data.
    Format,
    /// Warehouse transaction failed and was rolled back (retryable).
    Transaction,
    /// Handoff artifact could not be written or read (retryable).
    Artifact,
    /// Invariant violation inside the pipeline.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Connection => "connection",
            Self::Query => "query",
            Self::NotFound => "not_found",
            Self::Format => "format",
            Self::Transaction => "transaction",
            Self::Artifact => "artifact",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Transaction commit state at the time of a load error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    /// Error occurred before COMMIT was issued; the rollback restored the table.
    BeforeCommit,
    /// COMMIT was issued but its outcome is unknown.
    AfterCommitUnknown,
}

/// Structured error from a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct StageError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_state: Option<CommitState>,
}

impl StageError {
    fn new(
        category: ErrorCategory,
        retryable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable,
            commit_state: None,
        }
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, false, code, message)
    }

    /// Connection error, including connect and statement timeouts (retryable).
    #[must_use]
    pub fn connection(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Connection, true, code, message)
    }

    /// Source query error (retryable).
    #[must_use]
    pub fn query(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Query, true, code, message)
    }

    /// Missing or unreadable input file (retryable).
    #[must_use]
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, true, code, message)
    }

    /// Unparseable tabular input (not retryable).
    #[must_use]
    pub fn format(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Format, false, code, message)
    }

    /// Warehouse transaction error (retryable).
    #[must_use]
    pub fn transaction(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transaction, true, code, message)
    }

    /// Artifact store error (retryable).
    #[must_use]
    pub fn artifact(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Artifact, true, code, message)
    }

    /// Internal invariant violation (not retryable).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, false, code, message)
    }

    /// Record transaction commit state at time of error.
    #[must_use]
    pub fn with_commit_state(mut self, state: CommitState) -> Self {
        self.commit_state = Some(state);
        self
    }
}

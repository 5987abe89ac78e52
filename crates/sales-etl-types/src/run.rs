//! Run identity: run keys, task ids, and artifact naming.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const RUN_KEY_MAX_LEN: usize = 64;

/// Logical identifier of one pipeline invocation (e.g. `2024-03-01`).
///
/// Used for artifact naming and logging only, never to filter source data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunKey(String);

/// Rejected run key text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid run key '{key}': {reason}")]
pub struct RunKeyError {
    pub key: String,
    pub reason: &'static str,
}

impl RunKey {
    /// Validate and wrap a run key.
    ///
    /// # Errors
    ///
    /// Returns [`RunKeyError`] when the key is empty, longer than 64 characters,
    /// or contains characters outside `[A-Za-z0-9_.:-]`.
    pub fn new(key: impl Into<String>) -> Result<Self, RunKeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(RunKeyError { key, reason: "must not be empty" });
        }
        if key.len() > RUN_KEY_MAX_LEN {
            return Err(RunKeyError { key, reason: "longer than 64 characters" });
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
        {
            return Err(RunKeyError { key, reason: "allowed characters are A-Z a-z 0-9 _ . : -" });
        }
        Ok(Self(key))
    }

    /// Today's UTC date, the key a scheduled daily trigger carries.
    #[must_use]
    pub fn today() -> Self {
        Self(chrono::Utc::now().format("%Y-%m-%d").to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RunKey {
    type Err = RunKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RunKey {
    type Error = RunKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RunKey> for String {
    fn from(key: RunKey) -> Self {
        key.0
    }
}

/// The four nodes of the pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskId {
    ExtractOnline,
    ExtractInstore,
    Transform,
    Load,
}

impl TaskId {
    pub const ALL: [TaskId; 4] = [
        TaskId::ExtractOnline,
        TaskId::ExtractInstore,
        TaskId::Transform,
        TaskId::Load,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExtractOnline => "extract_online",
            Self::ExtractInstore => "extract_instore",
            Self::Transform => "transform",
            Self::Load => "load",
        }
    }

    /// Parse the storage form back; unknown strings map to `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|task| task.as_str() == raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intermediate handoffs between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    RawExtractOnline,
    RawExtractInstore,
    TransformedAggregate,
}

impl ArtifactKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RawExtractOnline => "raw-extract-online",
            Self::RawExtractInstore => "raw-extract-instore",
            Self::TransformedAggregate => "transformed-aggregate",
        }
    }

    /// Deterministic file name of this artifact for a run.
    ///
    /// The run key is embedded verbatim so distinct keys never share a file.
    #[must_use]
    pub fn file_name(self, run_key: &RunKey) -> String {
        let prefix = match self {
            Self::RawExtractOnline => "online_extract",
            Self::RawExtractInstore => "instore_extract",
            Self::TransformedAggregate => "transformed_sales",
        };
        format!("{prefix}_{run_key}.csv")
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

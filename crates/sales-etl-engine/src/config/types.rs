//! Pipeline YAML configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ONLINE_TABLE: &str = "online_sales";
pub const DEFAULT_WAREHOUSE_SCHEMA: &str = "retail_data_warehouse";
pub const DEFAULT_WAREHOUSE_TABLE: &str = "sales_aggregated";
const DEFAULT_PG_PORT: u16 = 5432;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 300;

/// Top-level pipeline file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    pub pipeline: String,
    pub sources: SourcesConfig,
    pub warehouse: DatabaseConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

fn default_lease_ttl_secs() -> u64 {
    6 * 60 * 60
}

impl PipelineConfig {
    #[must_use]
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub online: DatabaseConfig,
    pub instore: InstoreConfig,
}

/// Database engine behind a source or the warehouse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbBackend {
    #[default]
    Postgres,
    Sqlite,
}

impl DbBackend {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Connection parameters shared by the online source and the warehouse.
///
/// `host`/`user`/`database` apply to Postgres, `path` to `SQLite`. Which
/// fields are required depends on `backend` and is enforced by the validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DbBackend,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub path: Option<PathBuf>,
    /// Warehouse namespace (Postgres only).
    pub schema: Option<String>,
    pub table: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub statement_timeout_secs: Option<u64>,
}

impl DatabaseConfig {
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PG_PORT)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }

    #[must_use]
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(
            self.statement_timeout_secs
                .unwrap_or(DEFAULT_STATEMENT_TIMEOUT_SECS),
        )
    }

    /// Configured table name, or `default` when omitted.
    #[must_use]
    pub fn table_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.table.as_deref().unwrap_or(default)
    }

    #[must_use]
    pub fn schema_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.schema.as_deref().unwrap_or(default)
    }

    /// Human-readable identity used for lease names and log fields.
    /// Never includes credentials.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.backend {
            DbBackend::Postgres => format!(
                "postgres://{}:{}/{}",
                self.host.as_deref().unwrap_or(""),
                self.port(),
                self.database.as_deref().unwrap_or("")
            ),
            DbBackend::Sqlite => format!(
                "sqlite://{}",
                self.path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            ),
        }
    }
}

/// Point-of-sale delimited export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstoreConfig {
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

fn default_delimiter() -> String {
    ",".to_string()
}

impl InstoreConfig {
    /// The delimiter as a single byte, if it is one ASCII character.
    #[must_use]
    pub fn delimiter_byte(&self) -> Option<u8> {
        match self.delimiter.as_bytes() {
            [b] if b.is_ascii() => Some(*b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Omitted -> `$HOME/.sales-etl/artifacts`.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    pub connection: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_max_attempts() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    Fixed { delay_secs: u64 },
    Exponential { base_secs: u64, max_secs: u64 },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Fixed { delay_secs: 300 }
    }
}

//! Online sales reader over the sync `postgres` client.

use std::time::Duration;

use pg_escape::quote_identifier;
use postgres::error::SqlState;
use postgres::{Client, Config as PgConfig, NoTls};
use sales_etl_types::{RawSaleRecord, StageError};

use crate::config::types::{DatabaseConfig, DEFAULT_ONLINE_TABLE};
use crate::source::SalesSource;

/// Build a client config from pipeline connection parameters.
///
/// Fails fast with a `config` error when a required parameter is missing.
pub(crate) fn pg_config(db: &DatabaseConfig) -> Result<PgConfig, StageError> {
    let required = |value: &Option<String>, field: &str| {
        value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(str::to_owned)
            .ok_or_else(|| StageError::config("MISSING_PARAM", format!("'{field}' is required")))
    };
    let host = required(&db.host, "host")?;
    let user = required(&db.user, "user")?;
    let database = required(&db.database, "database")?;

    let mut pg = PgConfig::new();
    pg.host(&host);
    pg.port(db.port());
    pg.user(&user);
    if let Some(password) = db.password.as_deref().filter(|p| !p.is_empty()) {
        pg.password(password);
    }
    pg.dbname(&database);
    pg.application_name("sales-etl");
    pg.connect_timeout(db.connect_timeout());
    pg.options(&format!(
        "-c statement_timeout={}",
        duration_millis(db.statement_timeout())
    ));
    Ok(pg)
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Classify a `postgres` error raised while running a statement.
///
/// Statement timeouts and dropped connections count as connection failures;
/// everything else the server reports is a query failure.
pub(crate) fn classify_query_error(code: &str, context: &str, e: &postgres::Error) -> StageError {
    if e.code() == Some(&SqlState::QUERY_CANCELED) {
        StageError::connection("STATEMENT_TIMEOUT", format!("{context}: {e}"))
    } else if e.is_closed() || e.code().is_none() {
        StageError::connection("CONNECTION_LOST", format!("{context}: {e}"))
    } else {
        StageError::query(code, format!("{context}: {e}"))
    }
}

/// Full-table projection with every column rendered as text.
fn projection_sql(table: &str) -> String {
    format!(
        "SELECT product_id::TEXT, quantity::TEXT, sale_amount::TEXT, sale_date::TEXT FROM {}",
        quote_identifier(table)
    )
}

pub struct PostgresSalesSource {
    config: PgConfig,
    table: String,
    describe: String,
}

impl PostgresSalesSource {
    /// # Errors
    ///
    /// Returns a `config` [`StageError`] when connection parameters are missing.
    pub fn new(db: &DatabaseConfig) -> Result<Self, StageError> {
        Ok(Self {
            config: pg_config(db)?,
            table: db.table_or(DEFAULT_ONLINE_TABLE).to_string(),
            describe: db.describe(),
        })
    }

    fn connect(&self) -> Result<Client, StageError> {
        self.config.connect(NoTls).map_err(|e| {
            StageError::connection(
                "CONNECTION_FAILED",
                format!("cannot connect to {}: {e}", self.describe),
            )
        })
    }
}

impl SalesSource for PostgresSalesSource {
    fn describe(&self) -> String {
        format!("{}/{}", self.describe, self.table)
    }

    fn fetch(&self) -> Result<Vec<RawSaleRecord>, StageError> {
        let mut client = self.connect()?;
        let sql = projection_sql(&self.table);
        let rows = client
            .query(sql.as_str(), &[])
            .map_err(|e| classify_query_error("QUERY_FAILED", "projection", &e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let field = |idx: usize| -> Result<Option<String>, StageError> {
                row.try_get(idx)
                    .map_err(|e| StageError::query("DECODE_FAILED", format!("column {idx}: {e}")))
            };
            records.push(RawSaleRecord {
                product_id: field(0)?,
                quantity: field(1)?,
                sale_amount: field(2)?,
                sale_date: field(3)?,
            });
        }
        Ok(records)
    }

    fn probe(&self) -> Result<String, StageError> {
        let mut client = self.connect()?;
        let sql = format!("{} LIMIT 0", projection_sql(&self.table));
        client
            .execute(sql.as_str(), &[])
            .map_err(|e| classify_query_error("QUERY_FAILED", "projection probe", &e))?;
        Ok(format!("Connected to {}", self.describe()))
    }
}

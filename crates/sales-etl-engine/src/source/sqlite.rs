//! Online sales reader over a local `SQLite` database.

use std::path::PathBuf;
use std::time::Duration;

use pg_escape::quote_identifier;
use rusqlite::{Connection, OpenFlags};
use sales_etl_types::{RawSaleRecord, StageError};

use crate::config::types::{DatabaseConfig, DEFAULT_ONLINE_TABLE};
use crate::source::SalesSource;

fn projection_sql(table: &str) -> String {
    format!(
        "SELECT CAST(product_id AS TEXT), CAST(quantity AS TEXT), \
         CAST(sale_amount AS TEXT), CAST(sale_date AS TEXT) FROM {}",
        quote_identifier(table)
    )
}

pub struct SqliteSalesSource {
    path: PathBuf,
    table: String,
    busy_timeout: Duration,
}

impl SqliteSalesSource {
    /// # Errors
    ///
    /// Returns a `config` [`StageError`] when no database path is configured.
    pub fn new(db: &DatabaseConfig) -> Result<Self, StageError> {
        let path = db
            .path
            .clone()
            .ok_or_else(|| StageError::config("MISSING_PARAM", "'path' is required"))?;
        Ok(Self::open_path(
            path,
            db.table_or(DEFAULT_ONLINE_TABLE),
            db.connect_timeout(),
        ))
    }

    #[must_use]
    pub fn open_path(path: impl Into<PathBuf>, table: &str, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            table: table.to_string(),
            busy_timeout,
        }
    }

    fn connect(&self) -> Result<Connection, StageError> {
        let conn_err = |e: rusqlite::Error| {
            StageError::connection(
                "CONNECTION_FAILED",
                format!("cannot open {}: {e}", self.path.display()),
            )
        };
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(conn_err)?;
        conn.busy_timeout(self.busy_timeout).map_err(conn_err)?;
        Ok(conn)
    }
}

impl SalesSource for SqliteSalesSource {
    fn describe(&self) -> String {
        format!("sqlite://{}/{}", self.path.display(), self.table)
    }

    fn fetch(&self) -> Result<Vec<RawSaleRecord>, StageError> {
        let query_err =
            |e: rusqlite::Error| StageError::query("QUERY_FAILED", format!("projection: {e}"));

        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&projection_sql(&self.table))
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RawSaleRecord {
                    product_id: row.get(0)?,
                    quantity: row.get(1)?,
                    sale_amount: row.get(2)?,
                    sale_date: row.get(3)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn probe(&self) -> Result<String, StageError> {
        let conn = self.connect()?;
        conn.prepare(&projection_sql(&self.table)).map_err(|e| {
            StageError::query("QUERY_FAILED", format!("projection probe: {e}"))
        })?;
        Ok(format!("Opened {}", self.describe()))
    }
}

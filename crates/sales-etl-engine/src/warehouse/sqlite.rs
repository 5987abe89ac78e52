//! `SQLite` warehouse, for local runs and tests.
//!
//! One database file holds the table; there is no schema namespace.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use pg_escape::quote_identifier;
use rusqlite::{Connection, TransactionBehavior};
use sales_etl_types::{AggregatedSale, Amount, StageError};

use crate::config::types::{DatabaseConfig, DEFAULT_WAREHOUSE_TABLE};
use crate::warehouse::Warehouse;

fn ddl_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            product_id INTEGER PRIMARY KEY,
            total_quantity INTEGER,
            total_sale_amount DECIMAL(10,2)
        );",
        quote_identifier(table)
    )
}

fn select_sql(table: &str, tail: &str) -> String {
    format!(
        "SELECT product_id, total_quantity, CAST(total_sale_amount AS TEXT) FROM {} {tail}",
        quote_identifier(table)
    )
}

pub struct SqliteWarehouse {
    path: PathBuf,
    table: String,
    busy_timeout: Duration,
}

impl SqliteWarehouse {
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
            db.table_or(DEFAULT_WAREHOUSE_TABLE),
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
        let conn = Connection::open(&self.path).map_err(conn_err)?;
        conn.busy_timeout(self.busy_timeout).map_err(conn_err)?;
        Ok(conn)
    }

    fn query_rows(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<AggregatedSale>, StageError> {
        let query_err =
            |e: rusqlite::Error| StageError::query("QUERY_FAILED", format!("warehouse read: {e}"));
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql).map_err(query_err)?;
        let raw = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;

        raw.into_iter()
            .map(|(product_id, quantity, amount)| {
                let total_sale_amount = match amount {
                    Some(text) => Amount::from_str(&text)
                        .map_err(|e| StageError::query("DECODE_FAILED", e.to_string()))?,
                    None => Amount::ZERO,
                };
                Ok(AggregatedSale {
                    product_id,
                    total_quantity: quantity.unwrap_or(0),
                    total_sale_amount,
                })
            })
            .collect()
    }
}

impl Warehouse for SqliteWarehouse {
    fn describe(&self) -> String {
        format!("sqlite://{}/{}", self.path.display(), self.table)
    }

    fn replace_all(&self, rows: &[AggregatedSale]) -> Result<u64, StageError> {
        let tx_err = |code: &'static str| {
            move |e: rusqlite::Error| StageError::transaction(code, format!("load: {e}"))
        };

        let mut conn = self.connect()?;
        conn.execute_batch(&ddl_sql(&self.table))
            .map_err(tx_err("DDL_FAILED"))?;

        // Dropping an uncommitted rusqlite transaction rolls it back.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(tx_err("BEGIN_FAILED"))?;
        tx.execute(&format!("DELETE FROM {}", quote_identifier(&self.table)), [])
            .map_err(tx_err("CLEAR_FAILED"))?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {} (product_id, total_quantity, total_sale_amount) \
                     VALUES (?1, ?2, ?3) \
                     ON CONFLICT (product_id) DO UPDATE SET \
                     total_quantity = excluded.total_quantity, \
                     total_sale_amount = excluded.total_sale_amount",
                    quote_identifier(&self.table)
                ))
                .map_err(tx_err("UPSERT_FAILED"))?;
            for row in rows {
                stmt.execute(rusqlite::params![
                    row.product_id,
                    row.total_quantity,
                    row.total_sale_amount.to_string(),
                ])
                .map_err(tx_err("UPSERT_FAILED"))?;
            }
        }
        tx.commit().map_err(|e| {
            tx_err("COMMIT_FAILED")(e)
                .with_commit_state(sales_etl_types::CommitState::AfterCommitUnknown)
        })?;

        Ok(rows.len() as u64)
    }

    fn list_aggregates(&self) -> Result<Vec<AggregatedSale>, StageError> {
        self.query_rows(&select_sql(&self.table, "ORDER BY product_id"), &[])
    }

    fn get_aggregate(&self, product_id: i64) -> Result<Option<AggregatedSale>, StageError> {
        let rows = self.query_rows(
            &select_sql(&self.table, "WHERE product_id = ?1"),
            &[&product_id],
        )?;
        Ok(rows.into_iter().next())
    }

    fn top_by_amount(&self, n: u32) -> Result<Vec<AggregatedSale>, StageError> {
        self.query_rows(
            &select_sql(
                &self.table,
                "ORDER BY total_sale_amount DESC, product_id ASC LIMIT ?1",
            ),
            &[&n],
        )
    }

    fn probe(&self) -> Result<String, StageError> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| StageError::connection("CONNECTION_TEST_FAILED", e.to_string()))?;
        Ok(format!("Opened {}", self.describe()))
    }
}

//! Postgres warehouse over the sync `postgres` client.

use std::fmt::Write as _;
use std::str::FromStr;

use pg_escape::quote_identifier;
use postgres::types::ToSql;
use postgres::{Client, Config as PgConfig, NoTls, Row, Transaction};
use sales_etl_types::{AggregatedSale, Amount, CommitState, ErrorCategory, StageError};

use crate::config::types::{DatabaseConfig, DEFAULT_WAREHOUSE_SCHEMA, DEFAULT_WAREHOUSE_TABLE};
use crate::source::postgres::{classify_query_error, pg_config};
use crate::warehouse::{Warehouse, CHUNK_SIZE};

const SELECT_COLUMNS: &str =
    "product_id::BIGINT, total_quantity::BIGINT, total_sale_amount::TEXT";

fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

fn ddl_sql(schema: &str, table: &str) -> String {
    format!(
        "CREATE SCHEMA IF NOT EXISTS {};\n\
         CREATE TABLE IF NOT EXISTS {} (\n    \
             product_id INTEGER PRIMARY KEY,\n    \
             total_quantity INTEGER,\n    \
             total_sale_amount DECIMAL(10,2)\n\
         );",
        quote_identifier(schema),
        qualified_table(schema, table)
    )
}

/// Multi-value upsert for `rows` rows, three parameters each.
fn upsert_sql(qualified: &str, rows: usize) -> String {
    let mut sql = format!(
        "INSERT INTO {qualified} (product_id, total_quantity, total_sale_amount) VALUES "
    );
    for i in 0..rows {
        if i > 0 {
            sql.push_str(", ");
        }
        let base = i * 3;
        let _ = write!(
            sql,
            "(${}::BIGINT, ${}::BIGINT, ${}::TEXT::NUMERIC(10,2))",
            base + 1,
            base + 2,
            base + 3
        );
    }
    sql.push_str(
        " ON CONFLICT (product_id) DO UPDATE SET \
         total_quantity = EXCLUDED.total_quantity, \
         total_sale_amount = EXCLUDED.total_sale_amount",
    );
    sql
}

fn decode_row(row: &Row) -> Result<AggregatedSale, StageError> {
    let decode_err = |e: postgres::Error| StageError::query("DECODE_FAILED", e.to_string());
    let amount: Option<String> = row.try_get(2).map_err(decode_err)?;
    let total_sale_amount = match amount {
        Some(text) => Amount::from_str(&text)
            .map_err(|e| StageError::query("DECODE_FAILED", e.to_string()))?,
        None => Amount::ZERO,
    };
    Ok(AggregatedSale {
        product_id: row.try_get(0).map_err(decode_err)?,
        total_quantity: row
            .try_get::<_, Option<i64>>(1)
            .map_err(decode_err)?
            .unwrap_or(0),
        total_sale_amount,
    })
}

/// Postgres `INTEGER` columns hold 32 bits.
fn check_integer_columns(rows: &[AggregatedSale]) -> Result<(), StageError> {
    let fits = |v: i64| i32::try_from(v).is_ok();
    match rows
        .iter()
        .find(|r| !fits(r.product_id) || !fits(r.total_quantity))
    {
        Some(row) => Err(StageError::internal(
            "VALUE_OUT_OF_RANGE",
            format!(
                "product {} (total_quantity {}) exceeds INTEGER",
                row.product_id, row.total_quantity
            ),
        )),
        None => Ok(()),
    }
}

pub struct PostgresWarehouse {
    config: PgConfig,
    schema: String,
    table: String,
    describe: String,
}

impl PostgresWarehouse {
    /// # Errors
    ///
    /// Returns a `config` [`StageError`] when connection parameters are missing.
    pub fn new(db: &DatabaseConfig) -> Result<Self, StageError> {
        Ok(Self {
            config: pg_config(db)?,
            schema: db.schema_or(DEFAULT_WAREHOUSE_SCHEMA).to_string(),
            table: db.table_or(DEFAULT_WAREHOUSE_TABLE).to_string(),
            describe: db.describe(),
        })
    }

    fn qualified(&self) -> String {
        qualified_table(&self.schema, &self.table)
    }

    fn connect(&self) -> Result<Client, StageError> {
        self.config.connect(NoTls).map_err(|e| {
            StageError::connection(
                "CONNECTION_FAILED",
                format!("cannot connect to {}: {e}", self.describe),
            )
        })
    }

    fn write_rows(
        &self,
        tx: &mut Transaction<'_>,
        rows: &[AggregatedSale],
    ) -> Result<u64, StageError> {
        let qualified = self.qualified();
        tx.execute(format!("DELETE FROM {qualified}").as_str(), &[])
            .map_err(|e| load_error("CLEAR_FAILED", &e))?;

        let mut written = 0u64;
        for chunk in rows.chunks(CHUNK_SIZE) {
            let amounts: Vec<String> = chunk
                .iter()
                .map(|r| r.total_sale_amount.to_string())
                .collect();
            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * 3);
            for (row, amount) in chunk.iter().zip(&amounts) {
                params.push(&row.product_id);
                params.push(&row.total_quantity);
                params.push(amount);
            }
            tx.execute(upsert_sql(&qualified, chunk.len()).as_str(), &params)
                .map_err(|e| load_error("UPSERT_FAILED", &e))?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    fn query_rows(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<AggregatedSale>, StageError> {
        let mut client = self.connect()?;
        let rows = client
            .query(sql, params)
            .map_err(|e| classify_query_error("QUERY_FAILED", "warehouse read", &e))?;
        rows.iter().map(decode_row).collect()
    }
}

/// Server-side failures during a load are transaction errors; lost
/// connections and timeouts keep their connection classification.
fn load_error(code: &str, e: &postgres::Error) -> StageError {
    let classified = classify_query_error(code, "load", e);
    if classified.category == ErrorCategory::Query {
        StageError::transaction(code, classified.message)
    } else {
        classified
    }
}

impl Warehouse for PostgresWarehouse {
    fn describe(&self) -> String {
        format!("{}/{}.{}", self.describe, self.schema, self.table)
    }

    fn replace_all(&self, rows: &[AggregatedSale]) -> Result<u64, StageError> {
        check_integer_columns(rows)?;

        let mut client = self.connect()?;
        client
            .batch_execute(&ddl_sql(&self.schema, &self.table))
            .map_err(|e| load_error("DDL_FAILED", &e))?;

        let mut tx = client
            .transaction()
            .map_err(|e| load_error("BEGIN_FAILED", &e))?;
        match self.write_rows(&mut tx, rows) {
            Ok(written) => {
                tx.commit().map_err(|e| {
                    load_error("COMMIT_FAILED", &e)
                        .with_commit_state(CommitState::AfterCommitUnknown)
                })?;
                Ok(written)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!(
                        warehouse = %self.describe,
                        error = %rollback_err,
                        "Rollback after failed load did not complete"
                    );
                }
                Err(err.with_commit_state(CommitState::BeforeCommit))
            }
        }
    }

    fn list_aggregates(&self) -> Result<Vec<AggregatedSale>, StageError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {} ORDER BY product_id",
            self.qualified()
        );
        self.query_rows(&sql, &[])
    }

    fn get_aggregate(&self, product_id: i64) -> Result<Option<AggregatedSale>, StageError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {} WHERE product_id = $1::BIGINT",
            self.qualified()
        );
        Ok(self.query_rows(&sql, &[&product_id])?.into_iter().next())
    }

    fn top_by_amount(&self, n: u32) -> Result<Vec<AggregatedSale>, StageError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {} \
             ORDER BY total_sale_amount DESC NULLS LAST, product_id ASC LIMIT $1::BIGINT",
            self.qualified()
        );
        self.query_rows(&sql, &[&i64::from(n)])
    }

    fn probe(&self) -> Result<String, StageError> {
        let mut client = self.connect()?;
        let schema_exists = client
            .query_opt(
                "SELECT schema_name FROM information_schema.schemata WHERE schema_name = $1",
                &[&self.schema],
            )
            .map_err(|e| classify_query_error("QUERY_FAILED", "schema probe", &e))?
            .is_some();
        Ok(if schema_exists {
            format!("Connected to {} (schema: {})", self.describe, self.schema)
        } else {
            format!(
                "Connected to {} (schema '{}' does not exist, will be created)",
                self.describe, self.schema
            )
        })
    }
}

//! Durable aggregate table: full-refresh load plus the read projection the
//! reporting API serves.

pub mod postgres;
pub mod sqlite;

use serde::Serialize;

use sales_etl_types::{AggregatedSale, Amount, ArtifactKind, RunKey, StageError};

use crate::artifact::{codec, ArtifactStore};

pub use self::postgres::PostgresWarehouse;
pub use self::sqlite::SqliteWarehouse;

/// Maximum rows per multi-value INSERT statement.
pub(crate) const CHUNK_SIZE: usize = 1000;

/// Dashboard headline over the whole table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SalesSummary {
    pub products: u64,
    pub total_quantity: i64,
    pub total_sale_amount: Amount,
}

impl SalesSummary {
    /// # Errors
    ///
    /// Returns an `internal` [`StageError`] if a total overflows.
    pub fn from_rows(rows: &[AggregatedSale]) -> Result<Self, StageError> {
        let overflow = || StageError::internal("SUMMARY_OVERFLOW", "summary total overflows");
        rows.iter().try_fold(Self::default(), |acc, row| {
            Ok(Self {
                products: acc.products + 1,
                total_quantity: acc
                    .total_quantity
                    .checked_add(row.total_quantity)
                    .ok_or_else(overflow)?,
                total_sale_amount: acc
                    .total_sale_amount
                    .checked_add(row.total_sale_amount)
                    .ok_or_else(overflow)?,
            })
        })
    }
}

/// The `sales_aggregated` table.
pub trait Warehouse: Send + Sync {
    /// Stable identity of the target table; used as the load lease name.
    fn describe(&self) -> String;

    /// Replace the table contents with `rows` in one transaction.
    ///
    /// Creates the namespace and table if absent. On any failure the
    /// transaction is rolled back and the previous contents stay visible.
    ///
    /// # Errors
    ///
    /// Returns a `connection` [`StageError`] if the warehouse is unreachable
    /// or a `transaction` one if the load was rolled back.
    fn replace_all(&self, rows: &[AggregatedSale]) -> Result<u64, StageError>;

    /// Every row, ascending product id.
    ///
    /// # Errors
    ///
    /// Returns a `connection` or `query` [`StageError`].
    fn list_aggregates(&self) -> Result<Vec<AggregatedSale>, StageError>;

    /// # Errors
    ///
    /// Returns a `connection` or `query` [`StageError`].
    fn get_aggregate(&self, product_id: i64) -> Result<Option<AggregatedSale>, StageError>;

    /// Highest `total_sale_amount` first; ties by ascending product id.
    ///
    /// # Errors
    ///
    /// Returns a `connection` or `query` [`StageError`].
    fn top_by_amount(&self, n: u32) -> Result<Vec<AggregatedSale>, StageError>;

    /// # Errors
    ///
    /// Returns a `connection` or `query` [`StageError`].
    fn summary(&self) -> Result<SalesSummary, StageError> {
        SalesSummary::from_rows(&self.list_aggregates()?)
    }

    /// Reachability check used by `check`.
    ///
    /// # Errors
    ///
    /// Returns a `connection` [`StageError`].
    fn probe(&self) -> Result<String, StageError>;
}

/// Reject totals the `DECIMAL(10,2)` column cannot hold before touching the
/// warehouse.
pub(crate) fn check_amounts_fit(rows: &[AggregatedSale]) -> Result<(), StageError> {
    match rows.iter().find(|r| !r.total_sale_amount.fits_warehouse()) {
        Some(row) => Err(StageError::internal(
            "VALUE_OUT_OF_RANGE",
            format!(
                "total_sale_amount {} for product {} exceeds DECIMAL(10,2)",
                row.total_sale_amount, row.product_id
            ),
        )),
        None => Ok(()),
    }
}

/// Read the aggregate artifact and publish it as the table contents.
///
/// # Errors
///
/// Propagates the artifact store's or the warehouse's [`StageError`].
pub fn load_from_artifact(
    warehouse: &dyn Warehouse,
    store: &dyn ArtifactStore,
    run_key: &RunKey,
) -> Result<u64, StageError> {
    let rows = codec::decode_aggregates(&store.get(run_key, ArtifactKind::TransformedAggregate)?)?;
    check_amounts_fit(&rows)?;
    let loaded = warehouse.replace_all(&rows)?;
    tracing::info!(
        run_key = %run_key,
        warehouse = %warehouse.describe(),
        rows = loaded,
        "Loaded aggregate"
    );
    Ok(loaded)
}

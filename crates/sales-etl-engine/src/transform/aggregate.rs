//! Group-by-product summation.

use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use sales_etl_types::{AggregatedSale, Amount, NormalizedSaleRecord, StageError};

/// Sum quantity and amount per product id.
///
/// Amounts are summed exactly and rounded to cents once per product. Output
/// is in ascending product id.
///
/// # Errors
///
/// Returns an `internal` [`StageError`] when a total overflows its type.
pub fn aggregate(rows: &[NormalizedSaleRecord]) -> Result<Vec<AggregatedSale>, StageError> {
    let mut groups: BTreeMap<i64, (i64, BigDecimal)> = BTreeMap::new();

    for row in rows {
        let (quantity, amount) = groups
            .entry(row.product_id)
            .or_insert_with(|| (0, BigDecimal::from(0)));
        *quantity = quantity.checked_add(row.quantity).ok_or_else(|| {
            StageError::internal(
                "QUANTITY_OVERFLOW",
                format!("total quantity for product {} overflows", row.product_id),
            )
        })?;
        *amount += &row.sale_amount;
    }

    groups
        .into_iter()
        .map(|(product_id, (total_quantity, amount))| {
            let total_sale_amount = Amount::from_decimal_rounded(&amount).ok_or_else(|| {
                StageError::internal(
                    "AMOUNT_OVERFLOW",
                    format!("total amount {amount} for product {product_id} overflows"),
                )
            })?;
            Ok(AggregatedSale {
                product_id,
                total_quantity,
                total_sale_amount,
            })
        })
        .collect()
}

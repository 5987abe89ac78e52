//! Sales record shapes as they move through the pipeline.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// One sale row exactly as a source connector produced it.
///
/// Every field is raw text; `None` means the source value was empty or NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSaleRecord {
    pub product_id: Option<String>,
    pub quantity: Option<String>,
    pub sale_amount: Option<String>,
    #[serde(default)]
    pub sale_date: Option<String>,
}

impl RawSaleRecord {
    #[must_use]
    pub fn new(
        product_id: impl Into<String>,
        quantity: impl Into<String>,
        sale_amount: impl Into<String>,
    ) -> Self {
        Self {
            product_id: Some(product_id.into()),
            quantity: Some(quantity.into()),
            sale_amount: Some(sale_amount.into()),
            sale_date: None,
        }
    }
}

/// A sale row whose required fields all coerced to numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSaleRecord {
    pub product_id: i64,
    pub quantity: i64,
    /// Exact decimal as read from the source; rounded only after summing.
    pub sale_amount: BigDecimal,
}

/// Per-product totals across both sources for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregatedSale {
    pub product_id: i64,
    pub total_quantity: i64,
    pub total_sale_amount: Amount,
}

//! Per-field coercion of raw sale rows and the drop policy.
//!
//! Coercion never fails the stage: a field that cannot become its target
//! type is marked missing with a [`MissingReason`], and any row with a
//! missing required field is dropped and counted.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use sales_etl_types::{NormalizedSaleRecord, RawSaleRecord};

/// Largest decimal exponent (either direction) accepted for a value.
///
/// Bounds the cost of exact arithmetic on inputs like `1e-999999999`.
const MAX_DECIMAL_SCALE: i64 = 18;

/// Why a field was treated as missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MissingReason {
    Empty,
    NotNumeric,
    NotIntegral,
    OutOfRange,
    Negative,
}

impl MissingReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::NotNumeric => "not_numeric",
            Self::NotIntegral => "not_integral",
            Self::OutOfRange => "out_of_range",
            Self::Negative => "negative",
        }
    }
}

impl fmt::Display for MissingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The required fields of a sale row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SaleField {
    ProductId,
    Quantity,
    SaleAmount,
}

impl SaleField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProductId => "product_id",
            Self::Quantity => "quantity",
            Self::SaleAmount => "sale_amount",
        }
    }
}

impl fmt::Display for SaleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn non_empty(raw: Option<&str>) -> Result<&str, MissingReason> {
    match raw.map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(MissingReason::Empty),
    }
}

/// Parse a decimal, rejecting exponents that would make exact arithmetic
/// unbounded.
fn parse_decimal(s: &str) -> Result<BigDecimal, MissingReason> {
    let value = BigDecimal::from_str(s).map_err(|_| MissingReason::NotNumeric)?;
    let (_, scale) = value.normalized().as_bigint_and_exponent();
    if scale.abs() > MAX_DECIMAL_SCALE {
        return Err(MissingReason::OutOfRange);
    }
    Ok(value)
}

/// Coerce to a whole number: `"3"`, `"+3"`, `"3.0"`, `"3e2"`.
///
/// # Errors
///
/// Returns the [`MissingReason`] describing why the value is unusable.
pub fn coerce_integer(raw: Option<&str>) -> Result<i64, MissingReason> {
    let s = non_empty(raw)?;
    if let Ok(v) = s.parse::<i64>() {
        return Ok(v);
    }
    let value = BigDecimal::from_str(s).map_err(|_| MissingReason::NotNumeric)?;
    let (_, scale) = value.normalized().as_bigint_and_exponent();
    if scale > 0 {
        return Err(MissingReason::NotIntegral);
    }
    if scale < -MAX_DECIMAL_SCALE {
        return Err(MissingReason::OutOfRange);
    }
    value.with_scale(0).to_i64().ok_or(MissingReason::OutOfRange)
}

/// # Errors
///
/// Returns the [`MissingReason`] describing why the value is unusable.
pub fn coerce_product_id(raw: Option<&str>) -> Result<i64, MissingReason> {
    coerce_integer(raw)
}

/// # Errors
///
/// Returns the [`MissingReason`] describing why the value is unusable;
/// negative counts are [`MissingReason::Negative`].
pub fn coerce_quantity(raw: Option<&str>) -> Result<i64, MissingReason> {
    let v = coerce_integer(raw)?;
    if v < 0 {
        return Err(MissingReason::Negative);
    }
    Ok(v)
}

/// Exact decimal amount, kept at source precision.
///
/// # Errors
///
/// Returns the [`MissingReason`] describing why the value is unusable.
pub fn coerce_amount(raw: Option<&str>) -> Result<BigDecimal, MissingReason> {
    let value = parse_decimal(non_empty(raw)?)?;
    if value < BigDecimal::from(0) {
        return Err(MissingReason::Negative);
    }
    Ok(value)
}

/// A raw row with each required field coerced independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercedRecord {
    pub product_id: Result<i64, MissingReason>,
    pub quantity: Result<i64, MissingReason>,
    pub sale_amount: Result<BigDecimal, MissingReason>,
}

impl CoercedRecord {
    #[must_use]
    pub fn from_raw(raw: &RawSaleRecord) -> Self {
        Self {
            product_id: coerce_product_id(raw.product_id.as_deref()),
            quantity: coerce_quantity(raw.quantity.as_deref()),
            sale_amount: coerce_amount(raw.sale_amount.as_deref()),
        }
    }

    /// Every field that is marked missing, in field order.
    #[must_use]
    pub fn missing(&self) -> Vec<(SaleField, MissingReason)> {
        let mut out = Vec::new();
        if let Err(r) = self.product_id {
            out.push((SaleField::ProductId, r));
        }
        if let Err(r) = self.quantity {
            out.push((SaleField::Quantity, r));
        }
        if let Err(r) = &self.sale_amount {
            out.push((SaleField::SaleAmount, *r));
        }
        out
    }

    /// The normalized row, or `None` if any required field is missing.
    #[must_use]
    pub fn into_normalized(self) -> Option<NormalizedSaleRecord> {
        Some(NormalizedSaleRecord {
            product_id: self.product_id.ok()?,
            quantity: self.quantity.ok()?,
            sale_amount: self.sale_amount.ok()?,
        })
    }
}

/// Outcome of the drop policy over one run's rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropReport {
    pub seen: u64,
    pub kept: u64,
    pub dropped: u64,
    /// A dropped row with several bad fields counts once per field.
    pub reasons: BTreeMap<(SaleField, MissingReason), u64>,
}

impl DropReport {
    #[must_use]
    pub fn count(&self, field: SaleField, reason: MissingReason) -> u64 {
        self.reasons.get(&(field, reason)).copied().unwrap_or(0)
    }

    /// `field:reason=count` pairs for log lines.
    #[must_use]
    pub fn summary(&self) -> String {
        self.reasons
            .iter()
            .map(|((field, reason), n)| format!("{field}:{reason}={n}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Coerce every row and keep only the fully numeric ones.
pub fn normalize<'a, I>(rows: I) -> (Vec<NormalizedSaleRecord>, DropReport)
where
    I: IntoIterator<Item = &'a RawSaleRecord>,
{
    let mut kept = Vec::new();
    let mut report = DropReport::default();

    for raw in rows {
        report.seen += 1;
        let coerced = CoercedRecord::from_raw(raw);
        let missing = coerced.missing();
        if missing.is_empty() {
            if let Some(row) = coerced.into_normalized() {
                kept.push(row);
                report.kept += 1;
            }
        } else {
            report.dropped += 1;
            for key in missing {
                *report.reasons.entry(key).or_insert(0) += 1;
            }
        }
    }

    (kept, report)
}

//! CSV encoding of artifact contents.
//!
//! Raw artifacts keep every source value as text; the aggregate artifact
//! carries amounts in their two-digit decimal form.

use sales_etl_types::{AggregatedSale, RawSaleRecord, StageError};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const RAW_HEADER: [&str; 4] = ["product_id", "quantity", "sale_amount", "sale_date"];
pub const AGGREGATE_HEADER: [&str; 3] = ["product_id", "total_quantity", "total_sale_amount"];

fn encode<T: Serialize>(header: &[&str], rows: &[T]) -> Result<Vec<u8>, StageError> {
    let encode_err =
        |e: csv::Error| StageError::artifact("ARTIFACT_ENCODE", format!("csv encode: {e}"));

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(header).map_err(encode_err)?;
    for row in rows {
        writer.serialize(row).map_err(encode_err)?;
    }
    writer
        .into_inner()
        .map_err(|e| StageError::artifact("ARTIFACT_ENCODE", format!("csv flush: {e}")))
}

fn decode<T: DeserializeOwned>(header: &[&str], bytes: &[u8]) -> Result<Vec<T>, StageError> {
    let mut reader = csv::ReaderBuilder::new().from_reader(bytes);
    let found = reader
        .headers()
        .map_err(|e| StageError::artifact("ARTIFACT_DECODE", format!("csv header: {e}")))?;
    if found.iter().ne(header.iter().copied()) {
        return Err(StageError::artifact(
            "ARTIFACT_DECODE",
            format!(
                "unexpected artifact header '{}', expected '{}'",
                found.iter().collect::<Vec<_>>().join(","),
                header.join(",")
            ),
        ));
    }
    reader
        .deserialize()
        .map(|row| {
            row.map_err(|e| StageError::artifact("ARTIFACT_DECODE", format!("csv row: {e}")))
        })
        .collect()
}

/// # Errors
///
/// Returns an `artifact` [`StageError`] if CSV encoding fails.
pub fn encode_raw(records: &[RawSaleRecord]) -> Result<Vec<u8>, StageError> {
    encode(&RAW_HEADER, records)
}

/// # Errors
///
/// Returns an `artifact` [`StageError`] on a wrong header or malformed row.
pub fn decode_raw(bytes: &[u8]) -> Result<Vec<RawSaleRecord>, StageError> {
    decode(&RAW_HEADER, bytes)
}

/// # Errors
///
/// Returns an `artifact` [`StageError`] if CSV encoding fails.
pub fn encode_aggregates(rows: &[AggregatedSale]) -> Result<Vec<u8>, StageError> {
    encode(&AGGREGATE_HEADER, rows)
}

/// # Errors
///
/// Returns an `artifact` [`StageError`] on a wrong header or malformed row.
pub fn decode_aggregates(bytes: &[u8]) -> Result<Vec<AggregatedSale>, StageError> {
    decode(&AGGREGATE_HEADER, bytes)
}

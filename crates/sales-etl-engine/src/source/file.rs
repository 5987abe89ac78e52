//! Point-of-sale delimited file reader.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sales_etl_types::{RawSaleRecord, StageError};

use crate::config::types::InstoreConfig;
use crate::source::SalesSource;

const REQUIRED_COLUMNS: [&str; 3] = ["product_id", "quantity", "sale_amount"];
const OPTIONAL_DATE_COLUMN: &str = "sale_date";

/// Column positions resolved from the header row.
struct ColumnMap {
    product_id: usize,
    quantity: usize,
    sale_amount: usize,
    sale_date: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord, path: &Path) -> Result<Self, StageError> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| find(c).is_none())
            .collect();
        match (find("product_id"), find("quantity"), find("sale_amount")) {
            (Some(product_id), Some(quantity), Some(sale_amount)) => Ok(Self {
                product_id,
                quantity,
                sale_amount,
                sale_date: find(OPTIONAL_DATE_COLUMN),
            }),
            _ => Err(StageError::format(
                "MISSING_COLUMN",
                format!(
                    "{}: header is missing column(s) {}",
                    path.display(),
                    missing.join(", ")
                ),
            )),
        }
    }
}

fn cell(record: &csv::StringRecord, idx: usize) -> Option<String> {
    record
        .get(idx)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

pub struct InstoreFileSource {
    path: PathBuf,
    delimiter: u8,
}

impl InstoreFileSource {
    /// # Errors
    ///
    /// Returns a `config` [`StageError`] when the delimiter is not one ASCII
    /// character.
    pub fn new(config: &InstoreConfig) -> Result<Self, StageError> {
        let delimiter = config.delimiter_byte().ok_or_else(|| {
            StageError::config(
                "INVALID_DELIMITER",
                format!("delimiter '{}' must be one ASCII character", config.delimiter),
            )
        })?;
        Ok(Self::with_delimiter(config.path.clone(), delimiter))
    }

    #[must_use]
    pub fn with_delimiter(path: impl Into<PathBuf>, delimiter: u8) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }

    fn read_bytes(&self) -> Result<Vec<u8>, StageError> {
        std::fs::read(&self.path).map_err(|e| {
            let code = if e.kind() == ErrorKind::NotFound {
                "FILE_NOT_FOUND"
            } else {
                "FILE_UNREADABLE"
            };
            StageError::not_found(code, format!("{}: {e}", self.path.display()))
        })
    }

    fn reader<'a>(&self, bytes: &'a [u8]) -> csv::Reader<&'a [u8]> {
        csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .trim(csv::Trim::Headers)
            .from_reader(bytes)
    }

    fn format_error(&self, e: &csv::Error) -> StageError {
        let location = e
            .position()
            .map(|p| format!(" (line {})", p.line()))
            .unwrap_or_default();
        StageError::format(
            "MALFORMED_FILE",
            format!("{}{location}: {e}", self.path.display()),
        )
    }
}

impl SalesSource for InstoreFileSource {
    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }

    fn fetch(&self) -> Result<Vec<RawSaleRecord>, StageError> {
        let bytes = self.read_bytes()?;
        let mut reader = self.reader(&bytes);
        let headers = reader.headers().map_err(|e| self.format_error(&e))?.clone();
        let columns = ColumnMap::from_headers(&headers, &self.path)?;

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| self.format_error(&e))?;
            records.push(RawSaleRecord {
                product_id: cell(&row, columns.product_id),
                quantity: cell(&row, columns.quantity),
                sale_amount: cell(&row, columns.sale_amount),
                sale_date: columns.sale_date.and_then(|idx| cell(&row, idx)),
            });
        }
        Ok(records)
    }

    fn probe(&self) -> Result<String, StageError> {
        let bytes = self.read_bytes()?;
        let mut reader = self.reader(&bytes);
        let headers = reader.headers().map_err(|e| self.format_error(&e))?.clone();
        ColumnMap::from_headers(&headers, &self.path)?;
        Ok(format!("Readable {}", self.describe()))
    }
}

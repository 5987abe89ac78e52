//! Source connectors.
//!
//! Every source yields [`RawSaleRecord`]s as text and never filters: each
//! run is a full refresh of the source history.

pub mod file;
pub mod postgres;
pub mod sqlite;

use sales_etl_types::{ArtifactKind, RawSaleRecord, RunKey, StageError};

use crate::artifact::{codec, ArtifactStore};

pub use self::file::InstoreFileSource;
pub use self::postgres::PostgresSalesSource;
pub use self::sqlite::SqliteSalesSource;

/// A readable store of sale rows.
pub trait SalesSource: Send + Sync {
    /// Identity for logs; never includes credentials.
    fn describe(&self) -> String;

    /// Read every row of the source.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] classified as `connection`, `query`,
    /// `not_found` or `format` depending on what went wrong.
    fn fetch(&self) -> Result<Vec<RawSaleRecord>, StageError>;

    /// Cheap reachability check used by `check`.
    ///
    /// # Errors
    ///
    /// Same classification as [`SalesSource::fetch`].
    fn probe(&self) -> Result<String, StageError>;
}

/// Read the whole source and persist it as the `kind` raw artifact.
///
/// Returns the number of rows written.
///
/// # Errors
///
/// Propagates the source's or the artifact store's [`StageError`].
pub fn extract_to_artifact(
    source: &dyn SalesSource,
    store: &dyn ArtifactStore,
    run_key: &RunKey,
    kind: ArtifactKind,
) -> Result<u64, StageError> {
    let records = source.fetch()?;
    let bytes = codec::encode_raw(&records)?;
    store.put(run_key, kind, &bytes)?;

    let rows = records.len() as u64;
    tracing::info!(
        source = %source.describe(),
        artifact = %store.location(run_key, kind),
        rows,
        "Extracted sales rows"
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactStore;

    struct FixedSource(Vec<RawSaleRecord>);

    impl SalesSource for FixedSource {
        fn describe(&self) -> String {
            "fixed".into()
        }
        fn fetch(&self) -> Result<Vec<RawSaleRecord>, StageError> {
            Ok(self.0.clone())
        }
        fn probe(&self) -> Result<String, StageError> {
            Ok("fixed".into())
        }
    }

    struct DownSource;

    impl SalesSource for DownSource {
        fn describe(&self) -> String {
            "down".into()
        }
        fn fetch(&self) -> Result<Vec<RawSaleRecord>, StageError> {
            Err(StageError::connection("CONNECTION_FAILED", "refused"))
        }
        fn probe(&self) -> Result<String, StageError> {
            self.fetch().map(|_| String::new())
        }
    }

    #[test]
    fn extract_writes_raw_artifact() {
        let store = MemoryArtifactStore::new();
        let run = RunKey::new("2024-03-01").unwrap();
        let source = FixedSource(vec![
            RawSaleRecord::new("1", "2", "9.99"),
            RawSaleRecord::new("2", "1", "19.99"),
        ]);
        let rows =
            extract_to_artifact(&source, &store, &run, ArtifactKind::RawExtractOnline).unwrap();
        assert_eq!(rows, 2);
        let back =
            codec::decode_raw(&store.get(&run, ArtifactKind::RawExtractOnline).unwrap()).unwrap();
        assert_eq!(back, source.0);
    }

    #[test]
    fn failed_source_writes_nothing() {
        let store = MemoryArtifactStore::new();
        let run = RunKey::new("k").unwrap();
        let err = extract_to_artifact(&DownSource, &store, &run, ArtifactKind::RawExtractOnline)
            .unwrap_err();
        assert!(err.retryable);
        assert!(store.get(&run, ArtifactKind::RawExtractOnline).is_err());
    }
}

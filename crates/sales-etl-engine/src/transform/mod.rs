//! The transform stage: normalize both raw extracts, aggregate, persist.

pub mod aggregate;
pub mod normalize;

use sales_etl_types::{AggregatedSale, ArtifactKind, RunKey, StageError};

use crate::artifact::{codec, ArtifactStore};

pub use self::aggregate::aggregate;
pub use self::normalize::{normalize, DropReport, MissingReason, SaleField};

/// What the transform stage produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutcome {
    pub rows_online: u64,
    pub rows_instore: u64,
    pub report: DropReport,
    pub aggregates: Vec<AggregatedSale>,
}

/// Read both raw artifacts, drop unusable rows, and write the aggregate
/// artifact.
///
/// # Errors
///
/// Returns an `artifact` [`StageError`] if an input is missing or unreadable,
/// or an `internal` one if a total overflows.
pub fn transform_artifacts(
    store: &dyn ArtifactStore,
    run_key: &RunKey,
) -> Result<TransformOutcome, StageError> {
    let online = codec::decode_raw(&store.get(run_key, ArtifactKind::RawExtractOnline)?)?;
    let instore = codec::decode_raw(&store.get(run_key, ArtifactKind::RawExtractInstore)?)?;

    let (clean, report) = normalize(online.iter().chain(instore.iter()));
    if report.dropped > 0 {
        tracing::warn!(
            run_key = %run_key,
            dropped = report.dropped,
            kept = report.kept,
            reasons = %report.summary(),
            "Dropped rows with missing or invalid fields"
        );
    }

    let aggregates = aggregate(&clean)?;
    store.put(
        run_key,
        ArtifactKind::TransformedAggregate,
        &codec::encode_aggregates(&aggregates)?,
    )?;

    tracing::info!(
        run_key = %run_key,
        rows_online = online.len(),
        rows_instore = instore.len(),
        products = aggregates.len(),
        artifact = %store.location(run_key, ArtifactKind::TransformedAggregate),
        "Transformed sales"
    );

    Ok(TransformOutcome {
        rows_online: online.len() as u64,
        rows_instore: instore.len() as u64,
        report,
        aggregates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactStore;
    use sales_etl_types::{Amount, RawSaleRecord};

    fn put_raw(store: &MemoryArtifactStore, run: &RunKey, kind: ArtifactKind, rows: &[RawSaleRecord]) {
        store.put(run, kind, &codec::encode_raw(rows).unwrap()).unwrap();
    }

    #[test]
    fn online_and_instore_rows_merge() {
        let store = MemoryArtifactStore::new();
        let run = RunKey::new("2024-03-01").unwrap();
        put_raw(
            &store,
            &run,
            ArtifactKind::RawExtractOnline,
            &[RawSaleRecord::new("1", "2", "9.99"), RawSaleRecord::new("2", "1", "19.99")],
        );
        put_raw(
            &store,
            &run,
            ArtifactKind::RawExtractInstore,
            &[RawSaleRecord::new("1", "3", "14.97")],
        );

        let outcome = transform_artifacts(&store, &run).unwrap();
        assert_eq!(outcome.rows_online, 2);
        assert_eq!(outcome.rows_instore, 1);
        assert_eq!(outcome.report.dropped, 0);
        let totals: Vec<(i64, i64, Amount)> = outcome
            .aggregates
            .iter()
            .map(|a| (a.product_id, a.total_quantity, a.total_sale_amount))
            .collect();
        assert_eq!(
            totals,
            vec![(1, 5, Amount::from_cents(2496)), (2, 1, Amount::from_cents(1999))]
        );

        let persisted = codec::decode_aggregates(
            &store.get(&run, ArtifactKind::TransformedAggregate).unwrap(),
        )
        .unwrap();
        assert_eq!(persisted, outcome.aggregates);
    }

    #[test]
    fn invalid_row_contributes_nothing() {
        let store = MemoryArtifactStore::new();
        let run = RunKey::new("k").unwrap();
        put_raw(
            &store,
            &run,
            ArtifactKind::RawExtractOnline,
            &[RawSaleRecord::new("abc", "2", "9.99")],
        );
        put_raw(&store, &run, ArtifactKind::RawExtractInstore, &[]);

        let outcome = transform_artifacts(&store, &run).unwrap();
        assert_eq!(outcome.report.dropped, 1);
        assert!(outcome.aggregates.is_empty());
    }

    #[test]
    fn missing_extract_fails_stage() {
        let store = MemoryArtifactStore::new();
        let run = RunKey::new("k").unwrap();
        put_raw(&store, &run, ArtifactKind::RawExtractOnline, &[]);
        let err = transform_artifacts(&store, &run).unwrap_err();
        assert_eq!(err.code, "ARTIFACT_MISSING");
    }
}

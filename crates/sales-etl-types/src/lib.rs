//! Shared sales-etl data model: sale records, amounts, run identity, and the
//! stage error taxonomy.
//!
//! This crate has no I/O; both the state crate and the engine build on it.

pub mod amount;
pub mod error;
pub mod record;
pub mod run;
pub mod state;

pub use amount::Amount;
pub use error::{CommitState, ErrorCategory, StageError};
pub use record::{AggregatedSale, NormalizedSaleRecord, RawSaleRecord};
pub use run::{ArtifactKind, RunKey, TaskId};

//! Run ledger persistence for the sales-etl pipeline.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation for run history, per-task attempt records, and the
//! single-flight lease that keeps two runs from loading the same warehouse
//! table at once.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::StateBackend;
pub use error::StateError;
pub use sqlite::SqliteStateBackend;

//! Extract, transform and load stages for the retail sales pipeline, plus
//! the orchestrator that runs them as a retrying task graph.

pub mod artifact;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod orchestrator;
pub mod resolve;
pub mod result;
pub mod source;
pub mod transform;
pub mod warehouse;

// Re-export public API for convenience
pub use context::RunContext;
pub use error::PipelineError;
pub use execution::ExecutionOptions;
pub use orchestrator::{check_pipeline, run_pipeline};
pub use resolve::build_run_context;
pub use result::{CheckResult, PipelineResult};

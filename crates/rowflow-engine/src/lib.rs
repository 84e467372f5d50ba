//! Row queues, step runtime and pipeline orchestration for rowflow, plus the
//! built-in streaming operators.

pub mod aggregate;
pub mod config;
pub mod convert;
pub mod dimension;
pub mod errors;
pub mod orchestrator;
pub mod result;
pub mod rowset;
pub(crate) mod runner;
pub mod spill;
pub mod step;
pub mod steps;

// Re-export public API for convenience
pub use errors::PipelineError;
pub use orchestrator::{check_pipeline, run_pipeline, Hop, Pipeline, StepDefinition};
pub use result::{CheckResult, PipelineResult, StepResult};
pub use step::{StepContext, StepFactory, StepUnit};
pub use steps::{build_pipeline, RowCollector};

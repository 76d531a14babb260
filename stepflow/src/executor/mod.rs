//! Incremental execution of step graphs.
//!
//! The [`Executor`] computes every identifier of the requested closure up
//! front, reads complete results from the workspace, and runs the remaining
//! steps once their dependencies have values. Step bodies run through a
//! [`StepRunner`]; [`LocalRunner`] runs them in process, [`RetryRunner`] adds
//! retries on top of any runner.

mod context;
mod engine;
mod options;
mod plan;
mod report;
mod retry;
pub(crate) mod runner;

pub use context::StepContext;
pub use engine::Executor;
pub use options::RunOptions;
pub use plan::{ExecutionPlan, PlanAction, PlannedStep};
pub use report::{AttemptStatus, ExecutionReport, RunRecord, SkipReason, StepOutcome, StepReport};
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig, RetryRunner};
pub use runner::{LocalRunner, RunOutcome, StepRunner};

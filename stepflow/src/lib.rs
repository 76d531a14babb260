//! # Stepflow
//!
//! Incremental orchestration of step graphs over a content-addressed
//! result workspace.
//!
//! A graph is a set of [`StepSpec`](spec::StepSpec)s whose arguments are
//! literals or references to other steps' results. Every step gets a
//! deterministic identifier derived from its type, version, arguments and
//! its dependencies' identifiers, so a result computed once is reused until
//! something upstream of it changes:
//!
//! - **Identifiers**: canonical encoding hashed with SHA-256
//! - **Workspace**: in-memory or on-disk results keyed by identifier, with
//!   a single writer per identifier across processes
//! - **Executor**: runs what is missing, reads what is cached, isolates
//!   failures to their descendants
//! - **Cancellation and events**: cooperative cancellation and lifecycle
//!   events for observers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stepflow::prelude::*;
//!
//! # async fn example() -> Result<(), StepflowError> {
//! let registry = Arc::new(StepRegistry::new().with_any_version(
//!     "double",
//!     Arc::new(FnStep::new("double", |ctx: &StepContext| {
//!         let n: i64 = ctx.arg_as("n")?;
//!         Ok(serde_json::json!(n * 2))
//!     })),
//! ));
//!
//! let graph = StepGraph::build(vec![
//!     StepSpec::new("a", "double", "1").with_arg("n", 21),
//!     StepSpec::new("b", "double", "1").with_ref("n", "a"),
//! ])?;
//!
//! let workspace = Arc::new(LocalWorkspace::open("./.stepflow")?);
//! let executor = Executor::new(workspace, registry);
//! let report = executor.run_all(&graph, &RunOptions::new()).await?;
//! assert!(report.success());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod executor;
pub mod graph;
pub mod observability;
pub mod spec;
pub mod steps;
pub mod testing;
pub mod workspace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{
        ContentionPolicy, ExecutorConfig, FailureMode, StepflowConfig, WorkspaceConfig,
    };
    pub use crate::errors::{
        GraphError, StepError, StepErrorKind, StepflowError, WorkspaceError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, StepEvent};
    pub use crate::executor::{
        ExecutionPlan, ExecutionReport, Executor, PlanAction, RetryConfig, RunOptions,
        SkipReason, StepContext, StepOutcome, StepRunner,
    };
    pub use crate::graph::{GraphBuilder, StepGraph, StepId};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::spec::{ArgumentValue, StepRef, StepResources, StepSpec};
    pub use crate::steps::{AsyncFnStep, FnStep, StepBody, StepRegistry};
    pub use crate::workspace::{InMemoryWorkspace, LocalWorkspace, Workspace};
}

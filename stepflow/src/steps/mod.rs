//! Step bodies and the registry resolving them.

mod body;
mod registry;

pub use body::{AsyncFnStep, FnStep, StepBody};
pub use registry::StepRegistry;

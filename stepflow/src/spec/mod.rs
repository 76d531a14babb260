//! Step specifications.
//!
//! A [`StepSpec`] describes one computation: its type, version, arguments and
//! caching behavior. Arguments are [`ArgumentValue`]s, which may reference
//! other steps' results.

mod argument;
mod step;

pub use argument::{ArgumentValue, StepRef};
pub use step::{StepResources, StepSpec};

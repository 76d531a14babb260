//! Step graphs and step identifiers.
//!
//! A [`StepGraph`] is built from a set of [`StepSpec`](crate::spec::StepSpec)s,
//! validated for unresolved references and cycles, and linearized in a
//! deterministic topological order. Each step gets a [`StepId`] derived from
//! its type, version and canonical arguments, with references contributing
//! the upstream identifier.

mod builder;
mod canonical;
mod dag;
mod identifier;

pub use builder::GraphBuilder;
pub use canonical::CanonicalEncoder;
pub use dag::StepGraph;
pub use identifier::{compute_identifier, InvalidStepId, StepId, DIGEST_BYTES};

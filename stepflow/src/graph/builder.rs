//! Graph builder.

use std::path::Path;

use super::StepGraph;
use crate::errors::{GraphError, StepflowError};
use crate::spec::StepSpec;

/// Builder for collecting step specifications into a [`StepGraph`].
///
/// Steps may be added in any order; references are only resolved by
/// [`GraphBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    /// The specifications, in declaration order.
    specs: Vec<StepSpec>,
}

impl GraphBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step.
    #[must_use]
    pub fn step(mut self, spec: StepSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Adds several steps.
    #[must_use]
    pub fn steps(mut self, specs: impl IntoIterator<Item = StepSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// Adds a step by mutable reference.
    pub fn add_step(&mut self, spec: StepSpec) -> &mut Self {
        self.specs.push(spec);
        self
    }

    /// Merges another builder into this one.
    ///
    /// Steps present in both builders with identical specifications are kept
    /// once.
    ///
    /// # Errors
    ///
    /// Returns an error if the same step name has different specifications.
    pub fn compose(mut self, other: Self) -> Result<Self, GraphError> {
        for spec in other.specs {
            match self.specs.iter().find(|s| s.step_name == spec.step_name) {
                Some(existing) if *existing == spec => {}
                Some(_) => return Err(GraphError::DuplicateStep(spec.step_name)),
                None => self.specs.push(spec),
            }
        }
        Ok(self)
    }

    /// Parses a JSON array of step specifications.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid specification list.
    pub fn from_json_str(json: &str) -> Result<Self, StepflowError> {
        let specs: Vec<StepSpec> = serde_json::from_str(json)?;
        Ok(Self { specs })
    }

    /// Reads a JSON array of step specifications from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StepflowError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Returns the number of steps added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns true if no steps were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Validates and builds the graph.
    ///
    /// # Errors
    ///
    /// See [`StepGraph::build`].
    pub fn build(self) -> Result<StepGraph, GraphError> {
        StepGraph::build(self.specs)
    }
}

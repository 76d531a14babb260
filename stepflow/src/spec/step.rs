//! Step specifications.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::warn;

use super::{ArgumentValue, StepRef};
use crate::errors::{ContractErrorInfo, SpecValidationError};

#[allow(clippy::expect_used)]
static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-zA-Z0-9]+$").expect("version pattern is valid"));

fn default_true() -> bool {
    true
}

/// Resource hints for running a step.
///
/// Hints are never part of a step's identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResources {
    /// Whether the step needs a GPU.
    #[serde(default)]
    pub requires_gpu: bool,
    /// Number of CPUs the step wants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    /// Memory the step wants, in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    /// Per-step timeout in seconds, overriding the executor default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

/// An immutable description of one computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique name of the step within a graph. Not part of the identifier.
    pub step_name: String,
    /// Type of the step, used to find its body.
    pub step_type: String,
    /// Semantic version of the step body. Bumping it invalidates cached results.
    pub version: String,
    /// Named arguments, in declaration order.
    #[serde(default)]
    pub arguments: IndexMap<String, ArgumentValue>,
    /// Whether results are stored in and read from the workspace.
    #[serde(default = "default_true")]
    pub cacheable: bool,
    /// Whether the body produces the same result for the same arguments.
    #[serde(default = "default_true")]
    pub deterministic: bool,
    /// Resource hints.
    #[serde(default)]
    pub resources: StepResources,
    /// Free-form metadata. Not part of the identifier.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl StepSpec {
    /// Creates a new step specification with no arguments.
    #[must_use]
    pub fn new(
        step_name: impl Into<String>,
        step_type: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            step_type: step_type.into(),
            version: version.into(),
            arguments: IndexMap::new(),
            cacheable: true,
            deterministic: true,
            resources: StepResources::default(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Adds an argument.
    #[must_use]
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<ArgumentValue>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Adds an argument referencing another step's whole result.
    #[must_use]
    pub fn with_ref(self, name: impl Into<String>, step: impl Into<String>) -> Self {
        self.with_arg(name, ArgumentValue::reference(step))
    }

    /// Sets whether results are cached.
    #[must_use]
    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Marks the step as non-deterministic.
    #[must_use]
    pub fn non_deterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }

    /// Sets the resource hints.
    #[must_use]
    pub fn with_resources(mut self, resources: StepResources) -> Self {
        self.resources = resources;
        self
    }

    /// Sets the per-step timeout.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: f64) -> Self {
        self.resources.timeout_seconds = Some(seconds);
        self
    }

    /// Adds metadata.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns every reference in argument declaration order.
    #[must_use]
    pub fn references(&self) -> Vec<&StepRef> {
        let mut refs = Vec::new();
        for value in self.arguments.values() {
            value.collect_references(&mut refs);
        }
        refs
    }

    /// Returns the distinct names of referenced steps in declaration order.
    #[must_use]
    pub fn referenced_steps(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for r in self.references() {
            if !names.contains(&r.step.as_str()) {
                names.push(&r.step);
            }
        }
        names
    }

    /// Validates the specification on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is empty, the version contains characters
    /// other than ASCII letters and digits, or an argument cannot be
    /// canonicalized. References to the step itself are cycles and are
    /// reported by the graph builder.
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        if self.step_name.trim().is_empty() {
            return Err(SpecValidationError::new("Step name cannot be empty or whitespace-only"));
        }

        if self.step_type.trim().is_empty() {
            return Err(SpecValidationError::new(format!(
                "Step '{}' has an empty step type",
                self.step_name
            ))
            .with_steps(vec![self.step_name.clone()]));
        }

        if !VERSION_PATTERN.is_match(&self.version) {
            return Err(SpecValidationError::new(format!(
                "Invalid characters in version '{}' of step '{}'",
                self.version, self.step_name
            ))
            .with_steps(vec![self.step_name.clone()])
            .with_error_info(ContractErrorInfo::new(
                "SPEC-INVALID-VERSION",
                format!("Version '{}' is not alphanumeric", self.version),
            )));
        }

        for (name, value) in &self.arguments {
            value
                .validate(name)
                .map_err(|e| e.with_steps(vec![self.step_name.clone()]))?;
        }

        if self.cacheable && !self.deterministic {
            warn!(
                step = %self.step_name,
                "Step is going to be cached despite not being deterministic"
            );
        }

        Ok(())
    }
}

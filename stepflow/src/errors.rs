//! Error types for the stepflow engine.
//!
//! Structural errors (cycles, unresolved references, invalid specifications)
//! abort an invocation before anything runs. Workspace errors describe
//! contention on the durable store, and [`StepError`] wraps a single step's
//! execution failure together with the step's identity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::graph::StepId;

/// The main error type for stepflow operations.
#[derive(Debug, Error)]
pub enum StepflowError {
    /// The step graph could not be built.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// A workspace operation failed.
    #[error("{0}")]
    Workspace(#[from] WorkspaceError),

    /// No body is registered for a step type and version.
    #[error("No step body registered for type '{step_type}' version '{version}' (step '{step_name}')")]
    UnknownStepType {
        /// The step that needs the body.
        step_name: String,
        /// The requested step type.
        step_type: String,
        /// The requested version.
        version: String,
    },

    /// A step failed while producing a requested result.
    #[error("{0}")]
    Step(#[from] StepError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a structural error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    ///
    /// The fix hint defaults to the registered suggestion for `code`, if any.
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            fix_hint: ContractSuggestions::get(&code).map(String::from),
            code,
            summary: summary.into(),
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Errors raised while building a [`StepGraph`](crate::graph::StepGraph).
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// A step specification is invalid on its own.
    #[error("{0}")]
    InvalidSpec(#[from] SpecValidationError),

    /// Two specifications share a step name.
    #[error("Duplicate step name '{0}'")]
    DuplicateStep(String),

    /// A reference names a step that is not in the graph.
    #[error("{0}")]
    UnresolvedReference(#[from] UnresolvedReferenceError),

    /// References form a cycle.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// A requested target is not a step of the graph.
    #[error("Unknown target step '{0}'")]
    UnknownTarget(String),
}

impl GraphError {
    /// Returns the contract error info when the variant carries one.
    #[must_use]
    pub fn error_info(&self) -> Option<&ContractErrorInfo> {
        match self {
            Self::InvalidSpec(e) => e.error_info.as_ref(),
            Self::UnresolvedReference(e) => Some(&e.error_info),
            Self::Cycle(e) => Some(&e.error_info),
            Self::DuplicateStep(_) | Self::UnknownTarget(_) => None,
        }
    }
}

/// Error raised when a step specification fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SpecValidationError {
    /// The error message.
    pub message: String,
    /// The steps involved in the error.
    pub steps: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl SpecValidationError {
    /// Creates a new specification validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            steps: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the steps involved.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }
}

/// Error raised when a cycle is detected in the step graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in step graph: {}", cycle.join(" -> "))]
pub struct CycleError {
    /// The closed path of steps forming the cycle (first == last).
    pub cycle: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleError {
    /// Creates a new cycle error.
    #[must_use]
    pub fn new(cycle: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "GRAPH-CYCLE",
            format!("Step references form a cycle: {}", cycle.join(" -> ")),
        );

        Self {
            cycle,
            error_info: info,
        }
    }

    /// Returns the distinct member steps of the cycle.
    #[must_use]
    pub fn members(&self) -> &[String] {
        match self.cycle.split_last() {
            Some((_, rest)) if !rest.is_empty() => rest,
            _ => &self.cycle,
        }
    }
}

/// Error raised when an argument references a step that does not exist.
#[derive(Debug, Clone, Error)]
#[error("Step '{step}' references unknown step '{reference}'")]
pub struct UnresolvedReferenceError {
    /// The step holding the reference.
    pub step: String,
    /// The referenced step name.
    pub reference: String,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl UnresolvedReferenceError {
    /// Creates a new unresolved reference error.
    #[must_use]
    pub fn new(step: impl Into<String>, reference: impl Into<String>) -> Self {
        let step = step.into();
        let reference = reference.into();
        let info = ContractErrorInfo::new(
            "GRAPH-UNRESOLVED-REF",
            format!("Reference '{reference}' not found"),
        )
        .with_context_entry("step", step.clone());

        Self {
            step,
            reference,
            error_info: info,
        }
    }
}

/// Errors raised by a [`Workspace`](crate::workspace::Workspace).
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Another owner currently holds the running entry.
    #[error("Step {identifier} is already running (owner {owner})")]
    AlreadyRunning {
        /// The contended identifier.
        identifier: StepId,
        /// The current owner token.
        owner: String,
    },

    /// The caller no longer owns the running entry.
    #[error("Stale owner for step {identifier}: run was reclaimed or finished elsewhere")]
    StaleOwner {
        /// The identifier whose ownership was lost.
        identifier: StepId,
    },

    /// Another writer completed the entry first.
    #[error("Step {identifier} is already complete")]
    AlreadyComplete {
        /// The completed identifier.
        identifier: StepId,
    },

    /// The entry is not in the running state.
    #[error("Step {identifier} is not running")]
    NotRunning {
        /// The identifier.
        identifier: StepId,
    },

    /// A complete entry has no readable result.
    #[error("Result for step {identifier} is missing")]
    MissingResult {
        /// The identifier.
        identifier: StepId,
    },

    /// The stored result was written with a different format.
    #[error("Result for step {identifier} was written as '{stored}', cannot read as '{requested}'")]
    FormatMismatch {
        /// The identifier.
        identifier: StepId,
        /// Format recorded in the entry.
        stored: String,
        /// Format of the reader.
        requested: String,
    },

    /// Serialization/deserialization error.
    #[error("Workspace serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("Workspace IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a step execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// The step body returned an error.
    Failed,
    /// The run was cancelled.
    Cancelled,
    /// The run exceeded its timeout.
    TimedOut,
    /// A reference could not be resolved into a concrete argument.
    InvalidArgument,
    /// Another owner held the entry for longer than the wait budget.
    Contention,
    /// The run lost ownership before committing; its result was discarded.
    StaleOwner,
    /// The workspace failed while recording the run.
    Workspace,
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::InvalidArgument => write!(f, "invalid_argument"),
            Self::Contention => write!(f, "contention"),
            Self::StaleOwner => write!(f, "stale_owner"),
            Self::Workspace => write!(f, "workspace"),
        }
    }
}

impl StepErrorKind {
    /// Returns true for kinds that a retry layer may attempt again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// A single step's execution failure, wrapped with the step's identity.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[error("Step '{step_name}' ({kind}): {message}")]
pub struct StepError {
    /// The failing step.
    pub step_name: String,
    /// The failing step's identifier.
    pub identifier: Option<StepId>,
    /// What kind of failure occurred.
    pub kind: StepErrorKind,
    /// Error message, including the source chain for body failures.
    pub message: String,
    /// Captured context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

impl StepError {
    /// Creates a new step error.
    #[must_use]
    pub fn new(step_name: impl Into<String>, kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            identifier: None,
            kind,
            message: message.into(),
            context: HashMap::new(),
        }
    }

    /// Wraps an opaque step-body error, keeping its full cause chain.
    #[must_use]
    pub fn from_body(step_name: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::new(step_name, StepErrorKind::Failed, format!("{err:#}"))
    }

    /// Sets the identifier.
    #[must_use]
    pub fn with_identifier(mut self, identifier: StepId) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Provides default suggestions for structural error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "GRAPH-CYCLE" => Some(
                "Check step arguments for circular references. \
                 A step can only consume results of steps that do not depend on it.",
            ),
            "GRAPH-UNRESOLVED-REF" => Some(
                "Ensure every reference names a step that is part of the same graph. \
                 Check for typos in step names.",
            ),
            "SPEC-INVALID-VERSION" => Some(
                "Versions may only contain ASCII letters and digits, e.g. '002' or 'v2'.",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("step", "my_step");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.summary, "Test error");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("step"), Some(&"my_step".to_string()));
    }

    #[test]
    fn test_cycle_error() {
        let err = CycleError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert_eq!(err.error_info.code, "GRAPH-CYCLE");
        assert_eq!(err.members(), &["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_unresolved_reference_error() {
        let err = UnresolvedReferenceError::new("train", "dataset");
        assert_eq!(err.to_string(), "Step 'train' references unknown step 'dataset'");
        assert_eq!(err.error_info.code, "GRAPH-UNRESOLVED-REF");

        let graph_err = GraphError::from(err);
        assert_eq!(graph_err.error_info().map(|i| i.code.as_str()), Some("GRAPH-UNRESOLVED-REF"));
    }

    #[test]
    fn test_step_error_from_body_keeps_chain() {
        let source = anyhow::anyhow!("disk full").context("writing checkpoint");
        let err = StepError::from_body("train", &source);

        assert_eq!(err.kind, StepErrorKind::Failed);
        assert!(err.message.contains("writing checkpoint"));
        assert!(err.message.contains("disk full"));
    }

    #[test]
    fn test_step_error_kind_retryable() {
        assert!(StepErrorKind::Failed.is_retryable());
        assert!(!StepErrorKind::Cancelled.is_retryable());
        assert!(!StepErrorKind::TimedOut.is_retryable());
        assert_eq!(StepErrorKind::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn test_contract_suggestions() {
        assert!(ContractSuggestions::get("GRAPH-CYCLE").is_some());
        assert!(ContractSuggestions::get("UNKNOWN").is_none());
    }

    #[test]
    fn test_suggestions_become_default_fix_hints() {
        let cycle = CycleError::new(vec!["a".to_string(), "a".to_string()]);
        assert_eq!(
            cycle.error_info.fix_hint.as_deref(),
            ContractSuggestions::get("GRAPH-CYCLE")
        );

        let unresolved = UnresolvedReferenceError::new("b", "a");
        assert_eq!(
            unresolved.error_info.fix_hint.as_deref(),
            ContractSuggestions::get("GRAPH-UNRESOLVED-REF")
        );

        assert_eq!(ContractErrorInfo::new("TEST-001", "no hint").fix_hint, None);
        assert!(ContractSuggestions::get("SPEC-SELF-REFERENCE").is_none());
    }
}

//! Execution reports.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::{StepError, StepErrorKind};
use crate::graph::StepId;

/// Why a step was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency failed or was itself skipped.
    #[serde(rename = "skipped_due_to_upstream_failure")]
    UpstreamFailure,
    /// The invocation was cancelled before the step started.
    Cancelled,
    /// Another owner held the step and the contention policy is to skip.
    Contention,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFailure => write!(f, "skipped_due_to_upstream_failure"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Contention => write!(f, "contention"),
        }
    }
}

/// Terminal state of a step within one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// The result was read from the workspace.
    CacheHit,
    /// The body ran and succeeded.
    Ran,
    /// The step failed.
    Failed,
    /// The step was not attempted.
    Skipped(SkipReason),
}

impl StepOutcome {
    /// Returns true if the step has a usable result.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::CacheHit | Self::Ran)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheHit => write!(f, "cache_hit"),
            Self::Ran => write!(f, "ran"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped(SkipReason::UpstreamFailure) => write!(f, "skipped_due_to_upstream_failure"),
            Self::Skipped(reason) => write!(f, "skipped ({reason})"),
        }
    }
}

/// Status of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// The attempt produced a value.
    Succeeded,
    /// The attempt failed.
    Failed(StepErrorKind),
}

/// Record of one attempt at running a step body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
    /// How the attempt ended.
    pub status: AttemptStatus,
}

/// Per-step section of an [`ExecutionReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Step name.
    pub step_name: String,
    /// Step identifier.
    pub identifier: StepId,
    /// Terminal state.
    pub outcome: StepOutcome,
    /// Wall time spent on the step, including waiting on contention.
    pub duration_ms: f64,
    /// Attempts at running the body. Empty for cache hits and skips.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<RunRecord>,
    /// Failure detail for failed steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl StepReport {
    /// Creates a report for a skipped step.
    #[must_use]
    pub fn skipped(step_name: impl Into<String>, identifier: StepId, reason: SkipReason) -> Self {
        Self {
            step_name: step_name.into(),
            identifier,
            outcome: StepOutcome::Skipped(reason),
            duration_ms: 0.0,
            runs: Vec::new(),
            error: None,
        }
    }
}

/// Result of one executor invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Invocation id.
    pub run_id: Uuid,
    /// Requested targets. Empty means the whole graph.
    pub targets: Vec<String>,
    /// Every step of the target closure, in topological order.
    pub steps: IndexMap<String, StepReport>,
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
}

impl ExecutionReport {
    /// Returns a step's report.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.get(name)
    }

    /// Returns a step's outcome.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<StepOutcome> {
        self.steps.get(name).map(|s| s.outcome)
    }

    /// Returns the names of steps with a given outcome, in topological order.
    #[must_use]
    pub fn steps_with(&self, outcome: StepOutcome) -> Vec<&str> {
        self.steps
            .values()
            .filter(|s| s.outcome == outcome)
            .map(|s| s.step_name.as_str())
            .collect()
    }

    /// Returns the target steps, or every step when no target was given.
    pub fn target_reports(&self) -> impl Iterator<Item = &StepReport> {
        let all = self.targets.is_empty();
        self.steps
            .values()
            .filter(move |s| all || self.targets.contains(&s.step_name))
    }

    /// Returns true unless a target failed or was skipped.
    #[must_use]
    pub fn success(&self) -> bool {
        self.target_reports().all(|s| s.outcome.is_success())
    }

    /// Returns the process exit status for a driving tool.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.success())
    }

    /// Returns the number of body executions across all steps.
    #[must_use]
    pub fn executions(&self) -> usize {
        self.steps.values().map(|s| s.runs.len()).sum()
    }

    /// Returns the first recorded step error, in topological order.
    #[must_use]
    pub fn first_error(&self) -> Option<&StepError> {
        self.steps.values().find_map(|s| s.error.as_ref())
    }

    /// Returns a one-line summary of the outcome counts.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut cache_hit = 0;
        let mut ran = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for report in self.steps.values() {
            match report.outcome {
                StepOutcome::CacheHit => cache_hit += 1,
                StepOutcome::Ran => ran += 1,
                StepOutcome::Failed => failed += 1,
                StepOutcome::Skipped(_) => skipped += 1,
            }
        }
        format!("{cache_hit} cache_hit, {ran} ran, {failed} failed, {skipped} skipped")
    }
}

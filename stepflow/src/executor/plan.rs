//! Dry-run plans.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::graph::StepId;

/// What an invocation would do with a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    /// A complete result is stored.
    ReadFromCache,
    /// The body would run.
    Run,
    /// Another owner is running the step right now.
    InProgress,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::ReadFromCache => "read_from_cache",
            Self::Run => "run",
            Self::InProgress => "in_progress",
        })
    }
}

/// One step of an [`ExecutionPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    /// Step name.
    pub step_name: String,
    /// Step identifier.
    pub identifier: StepId,
    /// `<type>-<version>-<digest>`.
    pub unique_name: String,
    /// Planned action.
    pub action: PlanAction,
}

/// The steps an invocation would touch, in topological order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Planned steps.
    pub steps: Vec<PlannedStep>,
}

impl ExecutionPlan {
    /// Returns the number of planned steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the plan is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the planned action of a step.
    #[must_use]
    pub fn action(&self, step: &str) -> Option<PlanAction> {
        self.steps.iter().find(|s| s.step_name == step).map(|s| s.action)
    }

    /// Returns the names of steps with a given action.
    #[must_use]
    pub fn steps_with(&self, action: PlanAction) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.action == action)
            .map(|s| s.step_name.as_str())
            .collect()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "{:<16} {} ({})", step.action, step.step_name, step.unique_name)?;
        }
        Ok(())
    }
}

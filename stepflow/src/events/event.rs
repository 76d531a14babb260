//! Lifecycle events emitted by the executor.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StepErrorKind;
use crate::executor::SkipReason;
use crate::graph::StepId;

/// A step or run lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum StepEvent {
    /// An invocation started.
    #[serde(rename = "run.started")]
    RunStarted {
        /// Invocation id.
        run_id: Uuid,
        /// Requested targets.
        targets: Vec<String>,
        /// Number of steps in the target closure.
        steps: usize,
    },

    /// A step's result was found in the workspace.
    #[serde(rename = "step.cache_hit")]
    StepCacheHit {
        /// Invocation id.
        run_id: Uuid,
        /// Step name.
        step: String,
        /// Step identifier.
        identifier: StepId,
    },

    /// A step body started.
    #[serde(rename = "step.started")]
    StepStarted {
        /// Invocation id.
        run_id: Uuid,
        /// Step name.
        step: String,
        /// Step identifier.
        identifier: StepId,
    },

    /// A step body finished successfully.
    #[serde(rename = "step.completed")]
    StepCompleted {
        /// Invocation id.
        run_id: Uuid,
        /// Step name.
        step: String,
        /// Step identifier.
        identifier: StepId,
        /// Wall time in milliseconds.
        duration_ms: f64,
    },

    /// A step failed.
    #[serde(rename = "step.failed")]
    StepFailed {
        /// Invocation id.
        run_id: Uuid,
        /// Step name.
        step: String,
        /// Step identifier.
        identifier: StepId,
        /// Failure classification.
        kind: StepErrorKind,
        /// Error message.
        message: String,
    },

    /// A step was not attempted.
    #[serde(rename = "step.skipped")]
    StepSkipped {
        /// Invocation id.
        run_id: Uuid,
        /// Step name.
        step: String,
        /// Step identifier.
        identifier: StepId,
        /// Why the step was skipped.
        reason: SkipReason,
    },

    /// An invocation finished.
    #[serde(rename = "run.completed")]
    RunCompleted {
        /// Invocation id.
        run_id: Uuid,
        /// Whether every target succeeded.
        success: bool,
        /// Wall time in milliseconds.
        duration_ms: f64,
    },
}

impl StepEvent {
    /// Returns the dotted event type, e.g. `step.started`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::StepCacheHit { .. } => "step.cache_hit",
            Self::StepStarted { .. } => "step.started",
            Self::StepCompleted { .. } => "step.completed",
            Self::StepFailed { .. } => "step.failed",
            Self::StepSkipped { .. } => "step.skipped",
            Self::RunCompleted { .. } => "run.completed",
        }
    }

    /// Returns the step name for step events.
    #[must_use]
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::StepCacheHit { step, .. }
            | Self::StepStarted { step, .. }
            | Self::StepCompleted { step, .. }
            | Self::StepFailed { step, .. }
            | Self::StepSkipped { step, .. } => Some(step),
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
        }
    }

    /// Returns the invocation id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StepCacheHit { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::StepFailed { run_id, .. }
            | Self::StepSkipped { run_id, .. }
            | Self::RunCompleted { run_id, .. } => *run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serialized_tag() {
        let event = StepEvent::StepSkipped {
            run_id: Uuid::new_v4(),
            step: "b".to_string(),
            identifier: StepId::from_digest_bytes(&[1u8; 16]),
            reason: SkipReason::UpstreamFailure,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.event_type());
        assert_eq!(json["reason"], "skipped_due_to_upstream_failure");
        assert_eq!(event.step(), Some("b"));
    }
}

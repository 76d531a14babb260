//! Test assertions for execution reports.

use crate::errors::StepErrorKind;
use crate::executor::{ExecutionReport, SkipReason, StepOutcome};

/// Asserts that a step has the expected outcome.
pub fn assert_outcome(report: &ExecutionReport, step: &str, expected: StepOutcome) {
    let actual = report.outcome(step);
    assert_eq!(
        actual,
        Some(expected),
        "Expected step '{}' to be {}, got {:?}. Run: {}",
        step,
        expected,
        actual,
        report.summary()
    );
}

/// Asserts the outcome of several steps at once.
pub fn assert_outcomes(report: &ExecutionReport, expected: &[(&str, StepOutcome)]) {
    for (step, outcome) in expected {
        assert_outcome(report, step, *outcome);
    }
}

/// Asserts that a step ran its body.
pub fn assert_ran(report: &ExecutionReport, step: &str) {
    assert_outcome(report, step, StepOutcome::Ran);
}

/// Asserts that a step was read from the workspace.
pub fn assert_cache_hit(report: &ExecutionReport, step: &str) {
    assert_outcome(report, step, StepOutcome::CacheHit);
}

/// Asserts that a step was skipped because of an upstream failure.
pub fn assert_skipped_upstream(report: &ExecutionReport, step: &str) {
    assert_outcome(report, step, StepOutcome::Skipped(SkipReason::UpstreamFailure));
}

/// Asserts that a step failed with a given kind.
pub fn assert_failed_with(report: &ExecutionReport, step: &str, kind: StepErrorKind) {
    assert_outcome(report, step, StepOutcome::Failed);
    let actual = report.step(step).and_then(|s| s.error.as_ref()).map(|e| e.kind);
    assert_eq!(
        actual,
        Some(kind),
        "Expected step '{step}' to fail with {kind}, got {actual:?}"
    );
}

//! Testing utilities for step graphs.
//!
//! This module provides:
//! - Mock step bodies
//! - A workspace wrapper that records transitions
//! - Graph fixtures and an executor harness
//! - Assertions over execution reports

mod assertions;
mod fixtures;
mod mocks;
mod workspace;

pub use assertions::{
    assert_cache_hit, assert_failed_with, assert_outcome, assert_outcomes, assert_ran,
    assert_skipped_upstream,
};
pub use fixtures::{chain, diamond, TestHarness, TEST_STEP_TYPE};
pub use mocks::{FailingStep, RecordedCall, RecordingStep, SlowStep};
pub use workspace::{RecordingWorkspace, WorkspaceCall};

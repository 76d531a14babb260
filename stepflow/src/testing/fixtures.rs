//! Graph fixtures and an executor harness.

use std::sync::Arc;

use super::{RecordingStep, RecordingWorkspace};
use crate::config::ExecutorConfig;
use crate::events::CollectingEventSink;
use crate::executor::Executor;
use crate::spec::{ArgumentValue, StepSpec};
use crate::steps::{StepBody, StepRegistry};
use crate::workspace::Workspace;

/// Step type served by the harness's recording body.
pub const TEST_STEP_TYPE: &str = "test";

/// Builds a linear chain: the first step takes a literal `seed`, every later
/// step references the previous one through `input`.
#[must_use]
pub fn chain(names: &[&str]) -> Vec<StepSpec> {
    let mut specs = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let spec = StepSpec::new(*name, TEST_STEP_TYPE, "1");
        let spec = match i.checked_sub(1) {
            Some(prev) => spec.with_arg("input", ArgumentValue::reference(names[prev])),
            None => spec.with_arg("seed", *name),
        };
        specs.push(spec);
    }
    specs
}

/// Builds `source -> {left, right} -> join`.
#[must_use]
pub fn diamond() -> Vec<StepSpec> {
    vec![
        StepSpec::new("source", TEST_STEP_TYPE, "1").with_arg("seed", 1),
        StepSpec::new("left", TEST_STEP_TYPE, "1").with_ref("input", "source"),
        StepSpec::new("right", TEST_STEP_TYPE, "1").with_ref("input", "source"),
        StepSpec::new("join", TEST_STEP_TYPE, "1")
            .with_ref("left", "left")
            .with_ref("right", "right"),
    ]
}

/// Executor wiring shared by tests: a recording workspace, a registry whose
/// [`TEST_STEP_TYPE`] is served by a [`RecordingStep`], and a collecting
/// event sink.
#[derive(Debug)]
pub struct TestHarness {
    /// Recording wrapper around the workspace.
    pub workspace: Arc<RecordingWorkspace>,
    /// Registry used by every executor of the harness.
    pub registry: Arc<StepRegistry>,
    /// Collected events.
    pub events: Arc<CollectingEventSink>,
    /// Body of [`TEST_STEP_TYPE`].
    pub body: Arc<RecordingStep>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Creates a harness over a fresh in-memory workspace.
    #[must_use]
    pub fn new() -> Self {
        Self::with_workspace(Arc::new(RecordingWorkspace::in_memory()))
    }

    /// Creates a harness recording calls made against an existing workspace.
    #[must_use]
    pub fn over(workspace: Arc<dyn Workspace>) -> Self {
        Self::with_workspace(Arc::new(RecordingWorkspace::new(workspace)))
    }

    fn with_workspace(workspace: Arc<RecordingWorkspace>) -> Self {
        let body = Arc::new(RecordingStep::new("recording"));
        let registry = Arc::new(StepRegistry::new());
        registry.register_any_version(TEST_STEP_TYPE, body.clone());
        Self {
            workspace,
            registry,
            events: Arc::new(CollectingEventSink::new()),
            body,
        }
    }

    /// Registers an extra body for every version of a type.
    #[must_use]
    pub fn with_body(self, step_type: &str, body: Arc<dyn StepBody>) -> Self {
        self.registry.register_any_version(step_type, body);
        self
    }

    /// Returns an executor with the default configuration.
    #[must_use]
    pub fn executor(&self) -> Executor {
        self.executor_with(ExecutorConfig::default())
    }

    /// Returns an executor with a given configuration.
    #[must_use]
    pub fn executor_with(&self, config: ExecutorConfig) -> Executor {
        Executor::new(self.workspace.clone(), self.registry.clone())
            .with_config(config)
            .with_event_sink(self.events.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StepGraph;

    #[test]
    fn test_fixtures_build() {
        let graph = StepGraph::build(chain(&["a", "b", "c"])).unwrap();
        assert_eq!(graph.topological_order(), vec!["a", "b", "c"]);
        assert_eq!(graph.dependencies_of("c"), vec!["b"]);

        let graph = StepGraph::build(diamond()).unwrap();
        assert_eq!(graph.dependencies_of("join"), vec!["left", "right"]);
    }

    #[test]
    fn test_harness_registers_recording_body() {
        let harness = TestHarness::new();
        assert!(harness.registry.contains(TEST_STEP_TYPE, "7"));
    }
}

//! Mock step bodies for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::executor::StepContext;
use crate::steps::StepBody;

type Arguments = serde_json::Map<String, serde_json::Value>;

/// A body that records every call and returns a configurable value.
///
/// Without a configured output it echoes its materialized arguments as an
/// object.
#[derive(Debug)]
pub struct RecordingStep {
    name: String,
    output: Mutex<Option<serde_json::Value>>,
    calls: Mutex<Vec<RecordedCall>>,
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Step name from the context.
    pub step_name: String,
    /// Version from the context.
    pub version: String,
    /// Materialized arguments.
    pub arguments: Arguments,
}

impl RecordingStep {
    /// Creates a recording body that echoes its arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a recording body that returns a fixed value.
    #[must_use]
    pub fn returning(name: impl Into<String>, value: serde_json::Value) -> Self {
        let step = Self::new(name);
        step.set_output(value);
        step
    }

    /// Returns the body's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the value to return.
    pub fn set_output(&self, value: serde_json::Value) {
        *self.output.lock() = Some(value);
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the names of the steps this body ran for, in call order.
    #[must_use]
    pub fn called_steps(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.step_name.clone()).collect()
    }

    /// Returns the calls made for one step.
    #[must_use]
    pub fn calls_for(&self, step: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.step_name == step)
            .cloned()
            .collect()
    }

    /// Clears recorded calls.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl StepBody for RecordingStep {
    async fn run(&self, ctx: &StepContext) -> anyhow::Result<serde_json::Value> {
        self.calls.lock().push(RecordedCall {
            step_name: ctx.step_name().to_string(),
            version: ctx.version().to_string(),
            arguments: ctx.arguments().clone(),
        });
        Ok(self
            .output
            .lock()
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(ctx.arguments().clone())))
    }
}

/// A body that fails, optionally only for its first few calls.
#[derive(Debug)]
pub struct FailingStep {
    name: String,
    error: String,
    failures: Option<usize>,
    calls: AtomicUsize,
}

impl FailingStep {
    /// Creates a body that always fails.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            failures: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a body that fails `failures` times, then returns `"recovered"`.
    #[must_use]
    pub fn flaky(name: impl Into<String>, failures: usize) -> Self {
        Self {
            failures: Some(failures),
            ..Self::new(name, "transient failure")
        }
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepBody for FailingStep {
    async fn run(&self, ctx: &StepContext) -> anyhow::Result<serde_json::Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures {
            Some(limit) if call >= limit => Ok(serde_json::json!("recovered")),
            _ => anyhow::bail!("{} ({}): {}", ctx.step_name(), self.name, self.error),
        }
    }
}

/// A body that takes time and tracks how many of its calls overlap.
///
/// The delay is cut short when the invocation is cancelled, in which case
/// the body returns an error.
#[derive(Debug)]
pub struct SlowStep {
    name: String,
    delay: Duration,
    started: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowStep {
    /// Creates a new slow body.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            started: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Creates a slow body with a delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }

    /// Returns the number of calls started.
    #[must_use]
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Returns the highest number of calls that were running at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepBody for SlowStep {
    async fn run(&self, ctx: &StepContext) -> anyhow::Result<serde_json::Value> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let finished = tokio::select! {
            () = tokio::time::sleep(self.delay) => true,
            () = ctx.cancel_token().cancelled() => false,
        };
        self.active.fetch_sub(1, Ordering::SeqCst);

        if finished {
            Ok(serde_json::json!({ "step": ctx.step_name(), "body": self.name }))
        } else {
            anyhow::bail!("{} interrupted", self.name)
        }
    }
}

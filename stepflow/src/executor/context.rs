//! Execution context handed to step bodies.

use anyhow::{anyhow, Context as _};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::graph::StepId;
use crate::spec::StepSpec;

/// Everything a step body sees while it runs.
///
/// Arguments are fully materialized: every reference has been replaced by
/// the referenced step's value.
#[derive(Debug, Clone)]
pub struct StepContext {
    run_id: Uuid,
    step_name: String,
    step_type: String,
    version: String,
    identifier: StepId,
    arguments: serde_json::Map<String, serde_json::Value>,
    metadata: serde_json::Map<String, serde_json::Value>,
    attempt: u32,
    timeout: Option<Duration>,
    work_dir: PathBuf,
    cancel: Arc<CancellationToken>,
    /// Keeps a temporary working directory alive for the context's lifetime.
    _scratch: Option<Arc<TempDir>>,
}

impl StepContext {
    /// Creates a context for a step.
    #[must_use]
    pub fn new(
        run_id: Uuid,
        spec: &StepSpec,
        identifier: StepId,
        arguments: serde_json::Map<String, serde_json::Value>,
        work_dir: PathBuf,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        Self {
            run_id,
            step_name: spec.step_name.clone(),
            step_type: spec.step_type.clone(),
            version: spec.version.clone(),
            identifier,
            arguments,
            metadata: spec.metadata.clone(),
            attempt: 1,
            timeout: None,
            work_dir,
            cancel,
            _scratch: None,
        }
    }

    /// Creates a context whose working directory is a fresh temporary
    /// directory, removed once the last clone of the context is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_scratch_dir(
        run_id: Uuid,
        spec: &StepSpec,
        identifier: StepId,
        arguments: serde_json::Map<String, serde_json::Value>,
        cancel: Arc<CancellationToken>,
    ) -> std::io::Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("stepflow-{}-", identifier.short()))
            .tempdir()?;
        let mut ctx = Self::new(
            run_id,
            spec,
            identifier,
            arguments,
            scratch.path().to_path_buf(),
            cancel,
        );
        ctx._scratch = Some(Arc::new(scratch));
        Ok(ctx)
    }

    /// Returns a copy of the context for another attempt.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Sets the time limit of each attempt.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the invocation id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the step name.
    #[must_use]
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Returns the step type.
    #[must_use]
    pub fn step_type(&self) -> &str {
        &self.step_type
    }

    /// Returns the step version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the step identifier.
    #[must_use]
    pub fn identifier(&self) -> &StepId {
        &self.identifier
    }

    /// Returns all materialized arguments.
    #[must_use]
    pub fn arguments(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.arguments
    }

    /// Returns one argument, if present.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&serde_json::Value> {
        self.arguments.get(name)
    }

    /// Returns one argument or an error naming the missing argument.
    pub fn require(&self, name: &str) -> anyhow::Result<&serde_json::Value> {
        self.arguments
            .get(name)
            .ok_or_else(|| anyhow!("step '{}' is missing argument '{name}'", self.step_name))
    }

    /// Deserializes one argument into a typed value.
    pub fn arg_as<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self.require(name)?.clone();
        serde_json::from_value(value)
            .with_context(|| format!("argument '{name}' of step '{}' has the wrong shape", self.step_name))
    }

    /// Returns the step metadata.
    #[must_use]
    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }

    /// Returns the attempt number, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the time limit of each attempt.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the working directory of this step.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Returns the invocation's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Returns true once the invocation has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> StepContext {
        let spec = StepSpec::new("train", "train_model", "1");
        let mut args = serde_json::Map::new();
        args.insert("epochs".to_string(), json!(3));
        args.insert("rows".to_string(), json!([1, 2]));
        StepContext::with_scratch_dir(
            Uuid::new_v4(),
            &spec,
            StepId::from_digest_bytes(&[9u8; 16]),
            args,
            Arc::new(CancellationToken::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_typed_arguments() {
        let ctx = context();
        assert_eq!(ctx.arg_as::<u32>("epochs").unwrap(), 3);
        assert_eq!(ctx.arg_as::<Vec<i64>>("rows").unwrap(), vec![1, 2]);
        assert!(ctx.arg_as::<String>("epochs").is_err());

        let err = ctx.require("missing").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_scratch_dir_lives_with_context() {
        let ctx = context();
        let dir = ctx.work_dir().to_path_buf();
        assert!(dir.is_dir());

        let clone = ctx.clone();
        drop(ctx);
        assert!(dir.is_dir());
        drop(clone);
        assert!(!dir.exists());
    }

    #[test]
    fn test_attempt_and_cancellation() {
        let ctx = context().with_attempt(2);
        assert_eq!(ctx.attempt(), 2);
        assert!(!ctx.is_cancelled());
        ctx.cancel_token().cancel("stop");
        assert!(ctx.is_cancelled());
    }
}

//! Executor and workspace configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::StepflowError;
use crate::executor::RetryConfig;
use crate::workspace::{InMemoryWorkspace, LocalWorkspace, Workspace};

/// Environment variable overriding [`ExecutorConfig::max_workers`].
pub const ENV_MAX_WORKERS: &str = "STEPFLOW_MAX_WORKERS";
/// Environment variable overriding [`WorkspaceConfig::root`].
pub const ENV_WORKSPACE_DIR: &str = "STEPFLOW_WORKSPACE_DIR";
/// Environment variable overriding [`WorkspaceConfig::stale_after_seconds`].
pub const ENV_STALE_AFTER_SECONDS: &str = "STEPFLOW_STALE_AFTER_SECONDS";
/// Environment variable overriding [`ExecutorConfig::step_timeout_seconds`].
pub const ENV_STEP_TIMEOUT_SECONDS: &str = "STEPFLOW_STEP_TIMEOUT_SECONDS";

/// What happens to the rest of an invocation when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Skip the failed step's dependents, keep running independent branches.
    #[default]
    ContinueOnFailure,
    /// Cancel the invocation at the first failure.
    FailFast,
}

/// What a step does when another owner is already running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ContentionPolicy {
    /// Poll until the other owner finishes, then use its result or run.
    Wait {
        /// Delay between polls in milliseconds.
        poll_interval_ms: u64,
        /// Give up after this long; `None` waits until cancelled.
        #[serde(default)]
        max_wait_ms: Option<u64>,
    },
    /// Report the step skipped.
    Skip,
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        Self::Wait {
            poll_interval_ms: 200,
            max_wait_ms: None,
        }
    }
}

/// Configuration for the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of steps running at once.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Timeout applied to steps without their own.
    #[serde(default)]
    pub step_timeout_seconds: Option<f64>,
    /// Failure handling.
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Contention handling.
    #[serde(default)]
    pub contention: ContentionPolicy,
    /// Retry layer wrapped around the default runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            step_timeout_seconds: None,
            failure_mode: FailureMode::default(),
            contention: ContentionPolicy::default(),
            retry: None,
        }
    }
}

impl ExecutorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker limit.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Sets the default step timeout.
    #[must_use]
    pub fn with_step_timeout_seconds(mut self, seconds: f64) -> Self {
        self.step_timeout_seconds = Some(seconds);
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Sets the contention policy.
    #[must_use]
    pub fn with_contention(mut self, policy: ContentionPolicy) -> Self {
        self.contention = policy;
        self
    }

    /// Enables retries.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Returns the default step timeout.
    #[must_use]
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_seconds.and_then(seconds_to_duration)
    }

    /// Checks the configuration for invalid values.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field.
    pub fn validate(&self) -> Result<(), StepflowError> {
        if self.max_workers == 0 {
            return Err(StepflowError::Config("max_workers must be at least 1".to_string()));
        }
        check_seconds("step_timeout_seconds", self.step_timeout_seconds)?;
        if let ContentionPolicy::Wait { poll_interval_ms: 0, .. } = self.contention {
            return Err(StepflowError::Config(
                "contention.poll_interval_ms must be positive".to_string(),
            ));
        }
        if let Some(retry) = &self.retry {
            if retry.max_attempts == 0 {
                return Err(StepflowError::Config("retry.max_attempts must be at least 1".to_string()));
            }
        }
        Ok(())
    }
}

/// Configuration for the workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directory of a local workspace. `None` selects an in-memory one.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Age after which a running entry may be reclaimed.
    ///
    /// `None` never reclaims automatically.
    #[serde(default)]
    pub stale_after_seconds: Option<f64>,
}

impl WorkspaceConfig {
    /// Creates a configuration for an in-memory workspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the local workspace root.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Sets the reclaim threshold.
    #[must_use]
    pub fn with_stale_after_seconds(mut self, seconds: f64) -> Self {
        self.stale_after_seconds = Some(seconds);
        self
    }

    /// Returns the reclaim threshold.
    #[must_use]
    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_seconds.and_then(seconds_to_duration)
    }

    /// Opens the configured workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the local root cannot be created.
    pub fn open(&self) -> Result<Arc<dyn Workspace>, StepflowError> {
        check_seconds("stale_after_seconds", self.stale_after_seconds)?;
        let stale_after = self.stale_after();

        Ok(match &self.root {
            Some(root) => {
                let mut ws = LocalWorkspace::open(root)?;
                if let Some(limit) = stale_after {
                    ws = ws.with_stale_after(limit);
                }
                Arc::new(ws)
            }
            None => {
                let mut ws = InMemoryWorkspace::new();
                if let Some(limit) = stale_after {
                    ws = ws.with_stale_after(limit);
                }
                Arc::new(ws)
            }
        })
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepflowConfig {
    /// Executor settings.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Workspace settings.
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

impl StepflowConfig {
    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or invalid.
    pub fn from_json_str(json: &str) -> Result<Self, StepflowError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| StepflowError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StepflowError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            StepflowError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_json_str(&json)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unparsable value.
    pub fn apply_env(self) -> Result<Self, StepflowError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unparsable value.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, StepflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_WORKERS) {
            self.executor.max_workers = parse_env(ENV_MAX_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_WORKSPACE_DIR) {
            self.workspace.root = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup(ENV_STALE_AFTER_SECONDS) {
            self.workspace.stale_after_seconds = Some(parse_env(ENV_STALE_AFTER_SECONDS, &value)?);
        }
        if let Some(value) = lookup(ENV_STEP_TIMEOUT_SECONDS) {
            self.executor.step_timeout_seconds = Some(parse_env(ENV_STEP_TIMEOUT_SECONDS, &value)?);
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field.
    pub fn validate(&self) -> Result<(), StepflowError> {
        self.executor.validate()?;
        check_seconds("stale_after_seconds", self.workspace.stale_after_seconds)
    }

    /// Opens the configured workspace.
    ///
    /// # Errors
    ///
    /// See [`WorkspaceConfig::open`].
    pub fn open_workspace(&self) -> Result<Arc<dyn Workspace>, StepflowError> {
        self.workspace.open()
    }
}

fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(seconds).ok()
}

fn check_seconds(field: &str, value: Option<f64>) -> Result<(), StepflowError> {
    match value {
        Some(s) if !(s.is_finite() && s > 0.0) => Err(StepflowError::Config(format!(
            "{field} must be a positive number of seconds, got {s}"
        ))),
        _ => Ok(()),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, StepflowError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| StepflowError::Config(format!("{key}={value:?} is invalid: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = StepflowConfig::default();
        assert!(config.executor.max_workers >= 1);
        assert_eq!(config.executor.failure_mode, FailureMode::ContinueOnFailure);
        assert!(config.workspace.root.is_none());
        assert!(config.workspace.stale_after().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json() {
        let config = StepflowConfig::from_json_str(
            r#"{
                "executor": {
                    "max_workers": 2,
                    "step_timeout_seconds": 30,
                    "failure_mode": "fail_fast",
                    "contention": {"policy": "skip"}
                },
                "workspace": {"root": "/tmp/ws", "stale_after_seconds": 600}
            }"#,
        )
        .unwrap();

        assert_eq!(config.executor.max_workers, 2);
        assert_eq!(config.executor.failure_mode, FailureMode::FailFast);
        assert_eq!(config.executor.contention, ContentionPolicy::Skip);
        assert_eq!(config.executor.step_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.workspace.stale_after(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(StepflowConfig::from_json_str(r#"{"executor": {"max_workers": 0}}"#).is_err());
        assert!(StepflowConfig::from_json_str(r#"{"workspace": {"stale_after_seconds": -1}}"#).is_err());
        assert!(StepflowConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_MAX_WORKERS, "3"),
            (ENV_WORKSPACE_DIR, "/var/cache/steps"),
            (ENV_STALE_AFTER_SECONDS, "120"),
            (ENV_STEP_TIMEOUT_SECONDS, "1.5"),
        ]);

        let config = StepflowConfig::default()
            .apply_env_from(|key| vars.get(key).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.executor.max_workers, 3);
        assert_eq!(config.workspace.root, Some(PathBuf::from("/var/cache/steps")));
        assert_eq!(config.workspace.stale_after_seconds, Some(120.0));
        assert_eq!(config.executor.step_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_env_parse_error() {
        let err = StepflowConfig::default()
            .apply_env_from(|key| (key == ENV_MAX_WORKERS).then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_WORKERS));
    }

    #[test]
    fn test_open_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let local = WorkspaceConfig::new().with_root(dir.path().join("cache"));
        assert!(local.open().is_ok());
        assert!(dir.path().join("cache").is_dir());

        assert!(WorkspaceConfig::new().with_stale_after_seconds(5.0).open().is_ok());
    }
}

//! The seam between the executor and whatever runs step bodies.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::{AttemptStatus, RunRecord, StepContext};
use crate::errors::{StepError, StepErrorKind};
use crate::steps::StepBody;

/// What a runner reports back for one step.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The value, or the failure of the last attempt.
    pub result: Result<serde_json::Value, StepError>,
    /// One record per attempt.
    pub runs: Vec<RunRecord>,
}

impl RunOutcome {
    /// Returns true if the step produced a value.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs a step body given its fully materialized context.
///
/// Local, subprocess and remote backends implement this same contract. A
/// runner must honour the context's cancellation token and timeout, and must
/// not assume the body returns promptly.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Runs the body and reports the outcome.
    async fn run(&self, body: Arc<dyn StepBody>, ctx: StepContext) -> RunOutcome;
}

/// Runs bodies in process, each attempt on its own tokio task.
///
/// Cancellation and timeouts abort the task, dropping the body's future.
/// A panicking body is reported as a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl LocalRunner {
    /// Creates a local runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepRunner for LocalRunner {
    async fn run(&self, body: Arc<dyn StepBody>, ctx: StepContext) -> RunOutcome {
        let started_at = Utc::now();
        let start = Instant::now();
        let step_name = ctx.step_name().to_string();
        let identifier = ctx.identifier().clone();
        let cancel = Arc::clone(ctx.cancel_token());
        let timeout = ctx.timeout();
        let attempt = ctx.attempt();

        let handle = tokio::spawn(async move { body.run(&ctx).await });
        let abort = handle.abort_handle();
        let joined = async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, handle).await.ok(),
                None => Some(handle.await),
            }
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                abort.abort();
                let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
                Err(StepError::new(&step_name, StepErrorKind::Cancelled, reason))
            }
            joined = joined => match joined {
                None => {
                    abort.abort();
                    let limit = timeout.map_or(0.0, |t| t.as_secs_f64());
                    Err(StepError::new(
                        &step_name,
                        StepErrorKind::TimedOut,
                        format!("step exceeded its timeout of {limit}s"),
                    ))
                }
                Some(Ok(Ok(value))) => Ok(value),
                Some(Ok(Err(e))) => Err(StepError::from_body(&step_name, &e)),
                Some(Err(join_error)) => {
                    warn!(step = %step_name, error = %join_error, "Step body task did not finish");
                    Err(StepError::new(
                        &step_name,
                        StepErrorKind::Failed,
                        format!("step body panicked: {join_error}"),
                    ))
                }
            },
        };

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        let status = match &result {
            Ok(_) => AttemptStatus::Succeeded,
            Err(e) => AttemptStatus::Failed(e.kind),
        };
        debug!(step = %step_name, attempt, duration_ms, ?status, "Step attempt finished");

        RunOutcome {
            result: result.map_err(|e| e.with_identifier(identifier)),
            runs: vec![RunRecord {
                attempt,
                started_at,
                duration_ms,
                status,
            }],
        }
    }
}

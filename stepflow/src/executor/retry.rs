//! Optional retry layer for step runners.
//!
//! The core never retries a failed step. Wrapping a runner in a
//! [`RetryRunner`] re-runs failed attempts with configurable backoff and
//! jitter. Cancelled and timed-out attempts are never retried.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{RunOutcome, StepContext, StepRunner};
use crate::errors::StepErrorKind;
use crate::steps::StepBody;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

fn default_retry_on() -> Vec<StepErrorKind> {
    vec![StepErrorKind::Failed]
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
    /// Failure kinds that trigger another attempt.
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<StepErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
            retry_on: default_retry_on(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Returns true if a failure of this kind may be retried.
    #[must_use]
    pub fn retries(&self, kind: StepErrorKind) -> bool {
        kind.is_retryable() && self.retry_on.contains(&kind)
    }

    /// Calculates the delay before the attempt following `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;
        let exponent = attempt.saturating_sub(1);

        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(exponent)).min(max),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt)).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Runner decorator that retries failed attempts.
#[derive(Debug, Clone)]
pub struct RetryRunner<R> {
    inner: R,
    config: RetryConfig,
}

impl<R: StepRunner> RetryRunner<R> {
    /// Wraps a runner.
    #[must_use]
    pub fn new(inner: R, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Returns the retry configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl<R: StepRunner> StepRunner for RetryRunner<R> {
    async fn run(&self, body: Arc<dyn StepBody>, ctx: StepContext) -> RunOutcome {
        let mut runs = Vec::new();
        let mut attempt = ctx.attempt();

        loop {
            let outcome = self
                .inner
                .run(Arc::clone(&body), ctx.clone().with_attempt(attempt))
                .await;
            runs.extend(outcome.runs);

            let failed_kind = outcome.result.as_ref().err().map(|e| e.kind);
            let Some(kind) = failed_kind else {
                return RunOutcome { result: outcome.result, runs };
            };

            if attempt >= self.config.max_attempts || !self.config.retries(kind) || ctx.is_cancelled() {
                return RunOutcome { result: outcome.result, runs };
            }

            let delay = self.config.delay_after(attempt);
            debug!(
                step = %ctx.step_name(),
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retrying step after failure"
            );

            tokio::select! {
                biased;
                () = ctx.cancel_token().cancelled() => return RunOutcome { result: outcome.result, runs },
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::errors::StepError;
    use crate::executor::runner::MockStepRunner;
    use crate::executor::{AttemptStatus, LocalRunner, RunRecord};
    use crate::graph::StepId;
    use crate::spec::StepSpec;
    use crate::steps::FnStep;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn context() -> StepContext {
        StepContext::with_scratch_dir(
            Uuid::new_v4(),
            &StepSpec::new("flaky", "t", "1"),
            StepId::from_digest_bytes(&[4u8; 16]),
            serde_json::Map::new(),
            Arc::new(CancellationToken::new()),
        )
        .unwrap()
    }

    fn fast_config(attempts: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    fn failed(kind: StepErrorKind, attempt: u32) -> RunOutcome {
        RunOutcome {
            result: Err(StepError::new("flaky", kind, "nope")),
            runs: vec![RunRecord {
                attempt,
                started_at: Utc::now(),
                duration_ms: 0.0,
                status: AttemptStatus::Failed(kind),
            }],
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_max_delay_ms(250)
            .with_jitter(JitterStrategy::None);

        assert_eq!(config.delay_after(1), Duration::from_millis(100));
        assert_eq!(config.delay_after(2), Duration::from_millis(200));
        assert_eq!(config.delay_after(3), Duration::from_millis(250));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let config = RetryConfig::new().with_base_delay_ms(100).with_backoff(BackoffStrategy::Constant);
        for _ in 0..20 {
            assert!(config.delay_after(1) <= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let body: Arc<dyn StepBody> = Arc::new(FnStep::new("flaky", move |_ctx: &StepContext| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("transient");
            }
            Ok(json!("ok"))
        }));

        let runner = RetryRunner::new(LocalRunner, fast_config(5));
        let outcome = runner.run(body, context()).await;

        assert_eq!(outcome.result.unwrap(), json!("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let attempts: Vec<u32> = outcome.runs.iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut mock = MockStepRunner::new();
        mock.expect_run()
            .times(2)
            .returning(|_, ctx| failed(StepErrorKind::Failed, ctx.attempt()));

        let runner = RetryRunner::new(mock, fast_config(2));
        let body: Arc<dyn StepBody> = Arc::new(FnStep::new("unused", |_ctx: &StepContext| Ok(json!(null))));
        let outcome = runner.run(body, context()).await;

        assert!(!outcome.is_ok());
        assert_eq!(outcome.runs.len(), 2);
    }

    #[tokio::test]
    async fn test_timeouts_are_not_retried() {
        let mut mock = MockStepRunner::new();
        mock.expect_run()
            .times(1)
            .returning(|_, ctx| failed(StepErrorKind::TimedOut, ctx.attempt()));

        let runner = RetryRunner::new(mock, fast_config(5));
        let body: Arc<dyn StepBody> = Arc::new(FnStep::new("unused", |_ctx: &StepContext| Ok(json!(null))));
        let outcome = runner.run(body, context()).await;

        assert_eq!(outcome.result.unwrap_err().kind, StepErrorKind::TimedOut);
    }
}

//! The incremental executor.
//!
//! Steps become ready once every dependency has a result. Ready steps are
//! started in topological order on a bounded set of tokio tasks, and each
//! finished task unlocks its dependents, as in a classic in-degree scheduler.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{
    ExecutionPlan, ExecutionReport, LocalRunner, PlanAction, PlannedStep, RetryRunner, RunOptions,
    RunRecord, SkipReason, StepContext, StepOutcome, StepReport, StepRunner,
};
use crate::cancellation::CancellationToken;
use crate::config::{ContentionPolicy, ExecutorConfig, FailureMode, StepflowConfig};
use crate::errors::{GraphError, StepError, StepErrorKind, StepflowError, WorkspaceError};
use crate::events::{EventSink, NoOpEventSink, StepEvent};
use crate::graph::{StepGraph, StepId};
use crate::observability::SpanTimer;
use crate::spec::{StepRef, StepSpec};
use crate::steps::{StepBody, StepRegistry};
use crate::workspace::{LookupResult, OwnerToken, ResultHandle, RunFailure, Workspace};

/// Runs step graphs incrementally against a [`Workspace`].
///
/// A step whose identifier already has a complete entry is never run again;
/// everything else runs at most once per invocation, after its dependencies.
pub struct Executor {
    workspace: Arc<dyn Workspace>,
    registry: Arc<StepRegistry>,
    runner: Arc<dyn StepRunner>,
    config: ExecutorConfig,
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor with the default configuration and a local runner.
    #[must_use]
    pub fn new(workspace: Arc<dyn Workspace>, registry: Arc<StepRegistry>) -> Self {
        Self {
            workspace,
            registry,
            runner: Arc::new(LocalRunner),
            config: ExecutorConfig::default(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Creates an executor from a full configuration, opening its workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the workspace
    /// cannot be opened.
    pub fn from_config(config: &StepflowConfig, registry: Arc<StepRegistry>) -> Result<Self, StepflowError> {
        config.validate()?;
        let workspace = config.open_workspace()?;
        Ok(Self::new(workspace, registry).with_config(config.executor.clone()))
    }

    /// Sets the configuration.
    ///
    /// A configured retry policy replaces the runner with a retrying local
    /// runner; call [`with_runner`](Self::with_runner) afterwards to override.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        if let Some(retry) = &config.retry {
            self.runner = Arc::new(RetryRunner::new(LocalRunner, retry.clone()));
        }
        self.config = config;
        self
    }

    /// Sets the runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the workspace.
    #[must_use]
    pub fn workspace(&self) -> &Arc<dyn Workspace> {
        &self.workspace
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Brings the targets and all their ancestors up to date.
    ///
    /// An empty target list runs the whole graph. Step failures are reported
    /// in the [`ExecutionReport`], never as an `Err`.
    ///
    /// # Errors
    ///
    /// Returns an error before anything runs if a target is unknown or a step
    /// type has no registered body.
    pub async fn run<S: AsRef<str>>(
        &self,
        graph: &StepGraph,
        targets: &[S],
        options: &RunOptions,
    ) -> Result<ExecutionReport, StepflowError> {
        self.execute(graph, targets, options).await.map(|(report, _)| report)
    }

    /// Brings every step of the graph up to date.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn run_all(&self, graph: &StepGraph, options: &RunOptions) -> Result<ExecutionReport, StepflowError> {
        self.run::<&str>(graph, &[], options).await
    }

    /// Runs one step's closure and returns its value.
    ///
    /// # Errors
    ///
    /// Returns the step's failure, or the upstream failure that caused it to
    /// be skipped.
    pub async fn result(
        &self,
        graph: &StepGraph,
        step: &str,
        options: &RunOptions,
    ) -> Result<serde_json::Value, StepflowError> {
        let (report, mut values) = self.execute(graph, &[step], options).await?;
        match values.remove(step) {
            Some(Upstream::Value(value)) => Ok(Arc::unwrap_or_clone(value)),
            Some(Upstream::Stored(handle)) => Ok(self.workspace.load(&handle).await?),
            None => {
                let error = report
                    .step(step)
                    .and_then(|r| r.error.clone())
                    .or_else(|| report.first_error().cloned());
                if let Some(error) = error {
                    return Err(error.into());
                }
                let kind = match report.outcome(step) {
                    Some(StepOutcome::Skipped(SkipReason::Contention)) => StepErrorKind::Contention,
                    _ => StepErrorKind::Cancelled,
                };
                let outcome = report
                    .outcome(step)
                    .map_or_else(|| "not run".to_string(), |o| o.to_string());
                Err(StepError::new(step, kind, format!("no result available: {outcome}")).into())
            }
        }
    }

    /// Reports what an invocation of the targets would do, without running
    /// anything.
    ///
    /// A cacheable step is looked up by identifier even if an upstream step
    /// is going to run, since its identifier does not depend on upstream
    /// values.
    ///
    /// # Errors
    ///
    /// Returns an error if a target is unknown or the workspace fails.
    pub async fn plan<S: AsRef<str>>(&self, graph: &StepGraph, targets: &[S]) -> Result<ExecutionPlan, StepflowError> {
        let closure = graph.closure(targets)?;
        let mut steps = Vec::with_capacity(closure.len());
        for name in closure {
            let spec = graph
                .spec(name)
                .ok_or_else(|| GraphError::UnknownTarget(name.to_string()))?;
            let identifier = graph.identifier_of(name)?;
            let action = if spec.cacheable {
                match self.workspace.lookup(&identifier).await? {
                    LookupResult::Present(_) => PlanAction::ReadFromCache,
                    LookupResult::Absent => PlanAction::Run,
                    LookupResult::InProgress(_) => PlanAction::InProgress,
                }
            } else {
                PlanAction::Run
            };
            steps.push(PlannedStep {
                step_name: name.to_string(),
                unique_name: graph.unique_name(name)?,
                identifier,
                action,
            });
        }
        Ok(ExecutionPlan { steps })
    }

    async fn execute<S: AsRef<str>>(
        &self,
        graph: &StepGraph,
        targets: &[S],
        options: &RunOptions,
    ) -> Result<(ExecutionReport, HashMap<String, Upstream>), StepflowError> {
        let run_id = options.run_id.unwrap_or_else(Uuid::new_v4);
        let targets: Vec<String> = targets.iter().map(|t| t.as_ref().to_string()).collect();
        self.execute_in_span(graph, targets, options, run_id)
            .instrument(info_span!("run", run_id = %run_id))
            .await
    }

    async fn execute_in_span(
        &self,
        graph: &StepGraph,
        targets: Vec<String>,
        options: &RunOptions,
        run_id: Uuid,
    ) -> Result<(ExecutionReport, HashMap<String, Upstream>), StepflowError> {
        let started_at = Utc::now();
        let timer = SpanTimer::start("run");

        // Structural checks happen before anything runs.
        let closure = graph.closure(targets.as_slice())?;
        let mut resolved = self.registry.resolve_graph(graph, closure.as_slice())?;
        let mut bodies = Vec::with_capacity(closure.len());
        let mut identifiers = Vec::with_capacity(closure.len());
        for &name in &closure {
            let body = resolved
                .remove(name)
                .ok_or_else(|| StepflowError::Internal(format!("no body resolved for step '{name}'")))?;
            bodies.push(body);
            identifiers.push(graph.identifier_of(name)?);
        }
        let position: HashMap<&str, usize> = closure.iter().enumerate().map(|(i, &n)| (n, i)).collect();

        // FailFast cancels this token without touching the caller's.
        let run_token = options.cancel.child();

        info!(steps = closure.len(), targets = ?targets, "Starting run");
        self.event_sink
            .emit(&StepEvent::RunStarted {
                run_id,
                targets: targets.clone(),
                steps: closure.len(),
            })
            .await;

        let mut pending: Vec<usize> = closure.iter().map(|&n| graph.dependencies_of(n).len()).collect();
        let mut ready: BTreeSet<usize> = (0..closure.len()).filter(|&i| pending[i] == 0).collect();
        let mut reports: HashMap<usize, StepReport> = HashMap::with_capacity(closure.len());
        let mut values: HashMap<String, Upstream> = HashMap::new();
        let mut tasks = FuturesUnordered::new();
        let max_workers = self.config.max_workers.max(1);

        loop {
            while tasks.len() < max_workers {
                let Some(i) = ready.pop_first() else {
                    break;
                };
                let name = closure[i];

                if run_token.is_cancelled() {
                    self.record_skip(run_id, &mut reports, i, name, &identifiers[i], SkipReason::Cancelled)
                        .await;
                    self.skip_descendants(graph, run_id, name, SkipReason::Cancelled, &position, &identifiers, &mut reports)
                        .await;
                    continue;
                }

                let Some(spec) = graph.spec(name) else {
                    continue;
                };
                let upstream = graph
                    .dependencies_of(name)
                    .into_iter()
                    .filter_map(|d| values.get(d).map(|v| (d.to_string(), v.clone())))
                    .collect();
                let job = StepJob {
                    run_id,
                    spec: spec.clone(),
                    identifier: identifiers[i].clone(),
                    upstream,
                    body: Arc::clone(&bodies[i]),
                    workspace: Arc::clone(&self.workspace),
                    runner: Arc::clone(&self.runner),
                    events: Arc::clone(&self.event_sink),
                    contention: self.config.contention,
                    default_timeout: self.config.step_timeout(),
                    cancel: Arc::clone(&run_token),
                };
                let span = info_span!("step", step = %name, identifier = %identifiers[i]);
                let handle = tokio::spawn(job.execute().instrument(span));
                tasks.push(async move { (i, handle.await) });
            }

            let Some((i, joined)) = tasks.next().await else {
                break;
            };
            let name = closure[i];
            let output = match joined {
                Ok(output) => output,
                Err(join_error) => {
                    warn!(step = %name, error = %join_error, "Step task did not finish");
                    let error = StepError::new(name, StepErrorKind::Failed, format!("step task panicked: {join_error}"))
                        .with_identifier(identifiers[i].clone());
                    StepOutput {
                        report: StepReport {
                            error: Some(error),
                            outcome: StepOutcome::Failed,
                            ..StepReport::skipped(name, identifiers[i].clone(), SkipReason::UpstreamFailure)
                        },
                        value: None,
                    }
                }
            };

            let outcome = output.report.outcome;
            let downstream = downstream_skip_reason(&output.report);
            reports.insert(i, output.report);
            if let Some(value) = output.value {
                values.insert(name.to_string(), value);
            }

            if outcome.is_success() {
                for dependent in graph.dependents_of(name) {
                    let Some(&d) = position.get(dependent) else {
                        continue;
                    };
                    pending[d] = pending[d].saturating_sub(1);
                    if pending[d] == 0 && !reports.contains_key(&d) {
                        ready.insert(d);
                    }
                }
            } else {
                if outcome == StepOutcome::Failed && self.config.failure_mode == FailureMode::FailFast {
                    run_token.cancel(format!("step '{name}' failed"));
                }
                self.skip_descendants(graph, run_id, name, downstream, &position, &identifiers, &mut reports)
                    .await;
            }
        }

        let mut steps = IndexMap::with_capacity(closure.len());
        for (i, &name) in closure.iter().enumerate() {
            let report = reports
                .remove(&i)
                .ok_or_else(|| StepflowError::Internal(format!("step '{name}' finished without a report")))?;
            steps.insert(name.to_string(), report);
        }

        let report = ExecutionReport {
            run_id,
            targets,
            steps,
            started_at,
            duration_ms: timer.finish(),
        };
        let success = report.success();
        info!(success, duration_ms = report.duration_ms, summary = %report.summary(), "Run finished");
        self.event_sink
            .emit(&StepEvent::RunCompleted {
                run_id,
                success,
                duration_ms: report.duration_ms,
            })
            .await;

        Ok((report, values))
    }

    #[allow(clippy::too_many_arguments)]
    async fn skip_descendants(
        &self,
        graph: &StepGraph,
        run_id: Uuid,
        step: &str,
        reason: SkipReason,
        position: &HashMap<&str, usize>,
        identifiers: &[StepId],
        reports: &mut HashMap<usize, StepReport>,
    ) {
        let mut doomed: Vec<(usize, &str)> = graph
            .descendants_of(step)
            .into_iter()
            .filter_map(|d| position.get(d).map(|&i| (i, d)))
            .filter(|(i, _)| !reports.contains_key(i))
            .collect();
        doomed.sort_unstable();
        for (i, name) in doomed {
            self.record_skip(run_id, reports, i, name, &identifiers[i], reason).await;
        }
    }

    async fn record_skip(
        &self,
        run_id: Uuid,
        reports: &mut HashMap<usize, StepReport>,
        i: usize,
        step: &str,
        identifier: &StepId,
        reason: SkipReason,
    ) {
        debug!(step, %reason, "Skipping step");
        reports.insert(i, StepReport::skipped(step, identifier.clone(), reason));
        self.event_sink
            .emit(&StepEvent::StepSkipped {
                run_id,
                step: step.to_string(),
                identifier: identifier.clone(),
                reason,
            })
            .await;
    }
}

/// Why the dependents of an unsuccessful step are skipped.
///
/// Only a step that was itself cancelled passes cancellation on; any other
/// failure is an upstream failure, even if it triggered the cancellation.
fn downstream_skip_reason(report: &StepReport) -> SkipReason {
    let cancelled = match report.outcome {
        StepOutcome::Skipped(reason) => reason == SkipReason::Cancelled,
        _ => report
            .error
            .as_ref()
            .is_some_and(|e| e.kind == StepErrorKind::Cancelled),
    };
    if cancelled {
        SkipReason::Cancelled
    } else {
        SkipReason::UpstreamFailure
    }
}

/// A result available to dependents.
#[derive(Debug, Clone)]
enum Upstream {
    /// Produced during this invocation.
    Value(Arc<serde_json::Value>),
    /// Read from the workspace; loaded only when a dependent needs it.
    Stored(ResultHandle),
}

struct StepOutput {
    report: StepReport,
    value: Option<Upstream>,
}

enum Claim {
    Hit(ResultHandle),
    Owned(OwnerToken),
    Skipped(SkipReason),
    Failed(StepError),
}

/// Everything a spawned step task needs.
struct StepJob {
    run_id: Uuid,
    spec: StepSpec,
    identifier: StepId,
    upstream: HashMap<String, Upstream>,
    body: Arc<dyn StepBody>,
    workspace: Arc<dyn Workspace>,
    runner: Arc<dyn StepRunner>,
    events: Arc<dyn EventSink>,
    contention: ContentionPolicy,
    default_timeout: Option<Duration>,
    cancel: Arc<CancellationToken>,
}

impl StepJob {
    async fn execute(self) -> StepOutput {
        let timer = SpanTimer::start(self.spec.step_name.clone());

        let owner = if self.spec.cacheable {
            match self.claim().await {
                Claim::Owned(owner) => Some(owner),
                Claim::Hit(handle) => {
                    debug!("Using stored result");
                    self.events
                        .emit(&StepEvent::StepCacheHit {
                            run_id: self.run_id,
                            step: self.spec.step_name.clone(),
                            identifier: self.identifier.clone(),
                        })
                        .await;
                    return StepOutput {
                        report: self.report(StepOutcome::CacheHit, &timer, Vec::new(), None),
                        value: Some(Upstream::Stored(handle)),
                    };
                }
                Claim::Skipped(reason) => {
                    debug!(%reason, "Skipping step");
                    self.events
                        .emit(&StepEvent::StepSkipped {
                            run_id: self.run_id,
                            step: self.spec.step_name.clone(),
                            identifier: self.identifier.clone(),
                            reason,
                        })
                        .await;
                    return StepOutput {
                        report: self.report(StepOutcome::Skipped(reason), &timer, Vec::new(), None),
                        value: None,
                    };
                }
                Claim::Failed(error) => return self.failed(error, Vec::new(), &timer).await,
            }
        } else {
            None
        };

        let ctx = match self.prepare().await {
            Ok(ctx) => ctx,
            Err(error) => {
                self.record_failure(owner.as_ref(), &error).await;
                return self.failed(error, Vec::new(), &timer).await;
            }
        };

        info!(cacheable = self.spec.cacheable, "Running step");
        self.events
            .emit(&StepEvent::StepStarted {
                run_id: self.run_id,
                step: self.spec.step_name.clone(),
                identifier: self.identifier.clone(),
            })
            .await;

        let outcome = self.runner.run(Arc::clone(&self.body), ctx).await;
        let runs = outcome.runs;
        match outcome.result {
            Ok(value) => {
                if let Some(owner) = &owner {
                    if let Err(error) = self.commit(owner, &value).await {
                        return self.failed(error, runs, &timer).await;
                    }
                }
                let report = self.report(StepOutcome::Ran, &timer, runs, None);
                info!(duration_ms = report.duration_ms, "Step completed");
                self.events
                    .emit(&StepEvent::StepCompleted {
                        run_id: self.run_id,
                        step: self.spec.step_name.clone(),
                        identifier: self.identifier.clone(),
                        duration_ms: report.duration_ms,
                    })
                    .await;
                StepOutput {
                    report,
                    value: Some(Upstream::Value(Arc::new(value))),
                }
            }
            Err(error) => {
                self.record_failure(owner.as_ref(), &error).await;
                self.failed(error, runs, &timer).await
            }
        }
    }

    /// Reads a stored result or takes ownership of a new run, waiting on
    /// other owners as the contention policy allows.
    async fn claim(&self) -> Claim {
        let deadline = match self.contention {
            ContentionPolicy::Wait {
                max_wait_ms: Some(ms), ..
            } => Some(Instant::now() + Duration::from_millis(ms)),
            _ => None,
        };

        loop {
            if self.cancel.is_cancelled() {
                return Claim::Skipped(SkipReason::Cancelled);
            }

            let holder = match self.workspace.lookup(&self.identifier).await {
                Ok(LookupResult::Present(handle)) => return Claim::Hit(handle),
                // A running entry may be stale, in which case begin_run reclaims it.
                Ok(LookupResult::Absent | LookupResult::InProgress(_)) => {
                    match self.workspace.begin_run(&self.identifier).await {
                        Ok(owner) => return Claim::Owned(owner),
                        Err(WorkspaceError::AlreadyComplete { .. }) => continue,
                        Err(WorkspaceError::AlreadyRunning { owner, .. }) => owner,
                        Err(e) => return Claim::Failed(self.workspace_error(&e)),
                    }
                }
                Err(e) => return Claim::Failed(self.workspace_error(&e)),
            };

            let ContentionPolicy::Wait { poll_interval_ms, .. } = self.contention else {
                info!(owner = %holder, "Step is running elsewhere");
                return Claim::Skipped(SkipReason::Contention);
            };
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Claim::Failed(StepError::new(
                    &self.spec.step_name,
                    StepErrorKind::Contention,
                    format!("still running under owner {holder} when the wait budget ran out"),
                ));
            }

            debug!(owner = %holder, poll_interval_ms, "Waiting for another owner");
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Claim::Skipped(SkipReason::Cancelled),
                () = tokio::time::sleep(Duration::from_millis(poll_interval_ms)) => {}
            }
        }
    }

    async fn prepare(&self) -> Result<StepContext, StepError> {
        let arguments = self.materialize().await?;
        let timeout = self
            .spec
            .resources
            .timeout_seconds
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .or(self.default_timeout);

        let work_dir = if self.spec.cacheable {
            self.workspace
                .work_dir(&self.identifier)
                .await
                .map_err(|e| self.workspace_error(&e))?
        } else {
            None
        };

        let ctx = match work_dir {
            Some(dir) => StepContext::new(
                self.run_id,
                &self.spec,
                self.identifier.clone(),
                arguments,
                dir,
                Arc::clone(&self.cancel),
            ),
            None => StepContext::with_scratch_dir(
                self.run_id,
                &self.spec,
                self.identifier.clone(),
                arguments,
                Arc::clone(&self.cancel),
            )
            .map_err(|e| {
                StepError::new(
                    &self.spec.step_name,
                    StepErrorKind::Workspace,
                    format!("cannot create working directory: {e}"),
                )
            })?,
        };
        Ok(ctx.with_timeout(timeout))
    }

    /// Replaces every reference with the referenced step's value.
    async fn materialize(&self) -> Result<serde_json::Map<String, serde_json::Value>, StepError> {
        let mut values: HashMap<&str, Arc<serde_json::Value>> = HashMap::with_capacity(self.upstream.len());
        for (name, upstream) in &self.upstream {
            let value = match upstream {
                Upstream::Value(value) => Arc::clone(value),
                Upstream::Stored(handle) => Arc::new(self.workspace.load(handle).await.map_err(|e| {
                    StepError::new(
                        &self.spec.step_name,
                        StepErrorKind::InvalidArgument,
                        format!("cannot load result of '{name}': {e}"),
                    )
                })?),
            };
            values.insert(name.as_str(), value);
        }

        let mut arguments = serde_json::Map::new();
        for (key, argument) in &self.spec.arguments {
            let value = argument.materialize(&mut |r: &StepRef| {
                let result = values
                    .get(r.step.as_str())
                    .ok_or_else(|| self.invalid_argument(key, format!("no value for step '{}'", r.step)))?;
                r.select(result)
                    .cloned()
                    .ok_or_else(|| self.invalid_argument(key, format!("{r} does not exist in the result")))
            })?;
            arguments.insert(key.clone(), value);
        }
        Ok(arguments)
    }

    async fn commit(&self, owner: &OwnerToken, value: &serde_json::Value) -> Result<(), StepError> {
        match self.workspace.commit(&self.identifier, owner, value).await {
            Ok(handle) => {
                debug!(location = %handle.location, "Stored result");
                Ok(())
            }
            Err(WorkspaceError::StaleOwner { .. }) => {
                warn!("Ownership lost before commit, discarding result");
                Err(StepError::new(
                    &self.spec.step_name,
                    StepErrorKind::StaleOwner,
                    "run was reclaimed by another owner before it could commit; result discarded",
                ))
            }
            Err(e) => {
                let error = self.workspace_error(&e);
                self.record_failure(Some(owner), &error).await;
                Err(error)
            }
        }
    }

    async fn record_failure(&self, owner: Option<&OwnerToken>, error: &StepError) {
        let Some(owner) = owner else {
            return;
        };
        let failure = RunFailure::new(error.kind, error.message.clone());
        if let Err(e) = self.workspace.fail(&self.identifier, owner, failure).await {
            warn!(error = %e, "Could not record step failure");
        }
    }

    async fn failed(&self, error: StepError, runs: Vec<RunRecord>, timer: &SpanTimer) -> StepOutput {
        let error = if error.identifier.is_some() {
            error
        } else {
            error.with_identifier(self.identifier.clone())
        };
        warn!(kind = %error.kind, error = %error.message, "Step failed");
        self.events
            .emit(&StepEvent::StepFailed {
                run_id: self.run_id,
                step: self.spec.step_name.clone(),
                identifier: self.identifier.clone(),
                kind: error.kind,
                message: error.message.clone(),
            })
            .await;
        StepOutput {
            report: self.report(StepOutcome::Failed, timer, runs, Some(error)),
            value: None,
        }
    }

    fn report(
        &self,
        outcome: StepOutcome,
        timer: &SpanTimer,
        runs: Vec<RunRecord>,
        error: Option<StepError>,
    ) -> StepReport {
        StepReport {
            step_name: self.spec.step_name.clone(),
            identifier: self.identifier.clone(),
            outcome,
            duration_ms: timer.elapsed_ms(),
            runs,
            error,
        }
    }

    fn workspace_error(&self, e: &WorkspaceError) -> StepError {
        StepError::new(&self.spec.step_name, StepErrorKind::Workspace, e.to_string())
    }

    fn invalid_argument(&self, argument: &str, message: String) -> StepError {
        StepError::new(
            &self.spec.step_name,
            StepErrorKind::InvalidArgument,
            format!("argument '{argument}': {message}"),
        )
        .with_context_entry("argument", argument)
    }
}

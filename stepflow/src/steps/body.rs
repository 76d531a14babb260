//! The step body contract and closure adapters.

use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

use crate::executor::StepContext;

/// The computation behind a step type and version.
///
/// A body receives fully materialized arguments and returns a value or an
/// error. Caching is only sound when the body is a pure function of its
/// arguments; the engine does not check this.
#[async_trait]
pub trait StepBody: Send + Sync + Debug {
    /// Runs the step.
    async fn run(&self, ctx: &StepContext) -> anyhow::Result<serde_json::Value>;
}

/// A step body backed by a synchronous closure.
pub struct FnStep<F>
where
    F: Fn(&StepContext) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn(&StepContext) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    /// Creates a new closure-backed body.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStep<F>
where
    F: Fn(&StepContext) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> StepBody for FnStep<F>
where
    F: Fn(&StepContext) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    async fn run(&self, ctx: &StepContext) -> anyhow::Result<serde_json::Value> {
        (self.func)(ctx)
    }
}

/// A step body backed by an async closure.
///
/// The closure receives an owned copy of the context so the returned future
/// can be `'static`.
pub struct AsyncFnStep<F, Fut>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStep<F, Fut>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    /// Creates a new async closure-backed body.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnStep<F, Fut>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStep").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> StepBody for AsyncFnStep<F, Fut>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    async fn run(&self, ctx: &StepContext) -> anyhow::Result<serde_json::Value> {
        (self.func)(ctx.clone()).await
    }
}

//! A workspace wrapper that records every call.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::{StepErrorKind, WorkspaceError};
use crate::graph::StepId;
use crate::workspace::{
    CacheEntry, InMemoryWorkspace, LookupResult, OwnerToken, ResultHandle, RunFailure, Workspace,
};

/// A call made against a [`RecordingWorkspace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceCall {
    /// `lookup`
    Lookup(StepId),
    /// `begin_run`
    BeginRun(StepId),
    /// `commit`
    Commit(StepId),
    /// `fail`, with the recorded failure kind.
    Fail(StepId, StepErrorKind),
    /// `load`
    Load(StepId),
    /// `remove`
    Remove(StepId),
}

/// Forwards to another workspace and records each transition.
#[derive(Clone)]
pub struct RecordingWorkspace {
    inner: Arc<dyn Workspace>,
    calls: Arc<Mutex<Vec<WorkspaceCall>>>,
}

impl std::fmt::Debug for RecordingWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingWorkspace")
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for RecordingWorkspace {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryWorkspace::new()))
    }
}

impl RecordingWorkspace {
    /// Wraps a workspace.
    #[must_use]
    pub fn new(inner: Arc<dyn Workspace>) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Wraps a fresh in-memory workspace.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Returns the wrapped workspace.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Workspace> {
        &self.inner
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<WorkspaceCall> {
        self.calls.lock().clone()
    }

    /// Returns the identifiers passed to `begin_run`.
    #[must_use]
    pub fn begin_runs(&self) -> Vec<StepId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                WorkspaceCall::BeginRun(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the identifiers passed to `commit`.
    #[must_use]
    pub fn commits(&self) -> Vec<StepId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                WorkspaceCall::Commit(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns true if any call touched the identifier.
    #[must_use]
    pub fn touched(&self, identifier: &StepId) -> bool {
        self.calls.lock().iter().any(|c| match c {
            WorkspaceCall::Lookup(id)
            | WorkspaceCall::BeginRun(id)
            | WorkspaceCall::Commit(id)
            | WorkspaceCall::Fail(id, _)
            | WorkspaceCall::Load(id)
            | WorkspaceCall::Remove(id) => id == identifier,
        })
    }

    /// Clears recorded calls.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: WorkspaceCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl Workspace for RecordingWorkspace {
    async fn lookup(&self, identifier: &StepId) -> Result<LookupResult, WorkspaceError> {
        self.record(WorkspaceCall::Lookup(identifier.clone()));
        self.inner.lookup(identifier).await
    }

    async fn begin_run(&self, identifier: &StepId) -> Result<OwnerToken, WorkspaceError> {
        self.record(WorkspaceCall::BeginRun(identifier.clone()));
        self.inner.begin_run(identifier).await
    }

    async fn commit(
        &self,
        identifier: &StepId,
        owner: &OwnerToken,
        value: &serde_json::Value,
    ) -> Result<ResultHandle, WorkspaceError> {
        self.record(WorkspaceCall::Commit(identifier.clone()));
        self.inner.commit(identifier, owner, value).await
    }

    async fn fail(
        &self,
        identifier: &StepId,
        owner: &OwnerToken,
        failure: RunFailure,
    ) -> Result<(), WorkspaceError> {
        self.record(WorkspaceCall::Fail(identifier.clone(), failure.kind));
        self.inner.fail(identifier, owner, failure).await
    }

    async fn load(&self, handle: &ResultHandle) -> Result<serde_json::Value, WorkspaceError> {
        self.record(WorkspaceCall::Load(handle.identifier.clone()));
        self.inner.load(handle).await
    }

    async fn remove(&self, identifier: &StepId) -> Result<bool, WorkspaceError> {
        self.record(WorkspaceCall::Remove(identifier.clone()));
        self.inner.remove(identifier).await
    }

    async fn entry(&self, identifier: &StepId) -> Result<Option<CacheEntry>, WorkspaceError> {
        self.inner.entry(identifier).await
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, WorkspaceError> {
        self.inner.entries().await
    }

    async fn work_dir(&self, identifier: &StepId) -> Result<Option<PathBuf>, WorkspaceError> {
        self.inner.work_dir(identifier).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_records_transitions() {
        let ws = RecordingWorkspace::in_memory();
        let id = StepId::from_digest_bytes(&[8u8; 16]);

        assert_eq!(ws.lookup(&id).await.unwrap(), LookupResult::Absent);
        let owner = ws.begin_run(&id).await.unwrap();
        let handle = ws.commit(&id, &owner, &json!(1)).await.unwrap();
        assert_eq!(ws.load(&handle).await.unwrap(), json!(1));

        assert_eq!(
            ws.calls(),
            vec![
                WorkspaceCall::Lookup(id.clone()),
                WorkspaceCall::BeginRun(id.clone()),
                WorkspaceCall::Commit(id.clone()),
                WorkspaceCall::Load(id.clone()),
            ]
        );
        assert_eq!(ws.begin_runs(), vec![id.clone()]);
        assert!(ws.touched(&id));

        ws.reset();
        assert!(!ws.touched(&id));
    }
}

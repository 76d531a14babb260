//! Durable store mapping step identifiers to run status and results.
//!
//! A [`Workspace`] is the single shared mutable resource of the engine. Its
//! `begin_run` / `commit` / `fail` transitions are atomic per identifier, so
//! at most one writer runs a given computation at a time, across executor
//! instances sharing the same backend.
//!
//! Lifecycle of an entry:
//!
//! ```text
//! absent ──begin_run──▶ running ──commit──▶ complete
//!    ▲                     │
//!    └──── (lookup) ◀── failed ◀──fail──┘
//! ```
//!
//! A failed entry looks absent to lookups and may be started again. A
//! complete entry is immutable until [`Workspace::remove`].

mod entry;
mod format;
mod local;
mod memory;

pub use entry::{CacheEntry, EntryStatus, LookupResult, OwnerToken, ResultHandle, RunFailure};
pub use format::{JsonFormat, ResultFormat};
pub use local::LocalWorkspace;
pub use memory::InMemoryWorkspace;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::errors::WorkspaceError;
use crate::graph::StepId;

/// Backend-agnostic cache and run-state store.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Returns the current view of an identifier.
    async fn lookup(&self, identifier: &StepId) -> Result<LookupResult, WorkspaceError>;

    /// Atomically claims an identifier for a new run.
    ///
    /// Succeeds from the absent and failed states, and from a running state
    /// that the backend considers stale.
    ///
    /// # Errors
    ///
    /// [`WorkspaceError::AlreadyRunning`] if a live owner holds the entry,
    /// [`WorkspaceError::AlreadyComplete`] if a result is already stored.
    async fn begin_run(&self, identifier: &StepId) -> Result<OwnerToken, WorkspaceError>;

    /// Stores a result and marks the entry complete.
    ///
    /// # Errors
    ///
    /// [`WorkspaceError::StaleOwner`] if `owner` no longer holds the entry.
    async fn commit(
        &self,
        identifier: &StepId,
        owner: &OwnerToken,
        value: &serde_json::Value,
    ) -> Result<ResultHandle, WorkspaceError>;

    /// Marks a running entry failed, keeping the failure for diagnostics.
    ///
    /// # Errors
    ///
    /// [`WorkspaceError::StaleOwner`] if `owner` no longer holds the entry.
    async fn fail(
        &self,
        identifier: &StepId,
        owner: &OwnerToken,
        failure: RunFailure,
    ) -> Result<(), WorkspaceError>;

    /// Materializes a stored result.
    async fn load(&self, handle: &ResultHandle) -> Result<serde_json::Value, WorkspaceError>;

    /// Evicts an identifier. Returns whether anything was removed.
    ///
    /// Only used by explicit cache management, never by normal execution.
    async fn remove(&self, identifier: &StepId) -> Result<bool, WorkspaceError>;

    /// Returns the full record of an identifier.
    async fn entry(&self, identifier: &StepId) -> Result<Option<CacheEntry>, WorkspaceError>;

    /// Lists every known entry.
    async fn entries(&self) -> Result<Vec<CacheEntry>, WorkspaceError>;

    /// Returns a persistent working directory for an identifier, if the
    /// backend provides one.
    async fn work_dir(&self, _identifier: &StepId) -> Result<Option<PathBuf>, WorkspaceError> {
        Ok(None)
    }
}

//! In-process workspace.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CacheEntry, EntryStatus, LookupResult, OwnerToken, ResultHandle, RunFailure, Workspace};
use crate::errors::WorkspaceError;
use crate::graph::StepId;

#[derive(Debug, Clone)]
struct Slot {
    entry: CacheEntry,
    value: Option<serde_json::Value>,
}

/// Workspace held in process memory.
///
/// Each transition runs under the per-key shard lock of a [`DashMap`], which
/// makes it atomic with respect to the identifier. Contents do not survive
/// the process; cloning shares the same store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkspace {
    slots: Arc<DashMap<StepId, Slot>>,
    stale_after: Option<Duration>,
}

impl InMemoryWorkspace {
    /// Creates an empty workspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `begin_run` reclaim running entries older than `stale_after`.
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the workspace holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.slots.clear();
    }

    fn location(identifier: &StepId) -> String {
        format!("memory://{identifier}")
    }

    fn check_owner(slot: &Slot, identifier: &StepId, owner: &OwnerToken) -> Result<(), WorkspaceError> {
        if slot.entry.status == EntryStatus::Running && slot.entry.owner_token.as_ref() == Some(owner) {
            Ok(())
        } else {
            Err(WorkspaceError::StaleOwner {
                identifier: identifier.clone(),
            })
        }
    }
}

#[async_trait]
impl Workspace for InMemoryWorkspace {
    async fn lookup(&self, identifier: &StepId) -> Result<LookupResult, WorkspaceError> {
        Ok(self
            .slots
            .get(identifier)
            .map_or(LookupResult::Absent, |slot| slot.entry.lookup()))
    }

    async fn begin_run(&self, identifier: &StepId) -> Result<OwnerToken, WorkspaceError> {
        let owner = OwnerToken::new();
        let now = Utc::now();

        match self.slots.entry(identifier.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    entry: CacheEntry::running(identifier.clone(), owner, now),
                    value: None,
                });
            }
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                match slot.entry.status {
                    EntryStatus::Complete => {
                        return Err(WorkspaceError::AlreadyComplete {
                            identifier: identifier.clone(),
                        });
                    }
                    EntryStatus::Running if !slot.entry.is_stale(self.stale_after, now) => {
                        return Err(WorkspaceError::AlreadyRunning {
                            identifier: identifier.clone(),
                            owner: slot
                                .entry
                                .owner_token
                                .map(|t| t.to_string())
                                .unwrap_or_default(),
                        });
                    }
                    EntryStatus::Running => {
                        warn!(
                            identifier = %identifier,
                            started_at = ?slot.entry.started_at,
                            "Reclaiming stale running entry"
                        );
                    }
                    EntryStatus::Absent | EntryStatus::Failed => {}
                }
                let failure = slot.entry.failure.take();
                slot.entry = CacheEntry::running(identifier.clone(), owner, now);
                slot.entry.failure = failure;
                slot.value = None;
            }
        }

        debug!(identifier = %identifier, owner = %owner, "Began run");
        Ok(owner)
    }

    async fn commit(
        &self,
        identifier: &StepId,
        owner: &OwnerToken,
        value: &serde_json::Value,
    ) -> Result<ResultHandle, WorkspaceError> {
        let mut slot = self
            .slots
            .get_mut(identifier)
            .ok_or_else(|| WorkspaceError::NotRunning {
                identifier: identifier.clone(),
            })?;
        Self::check_owner(&slot, identifier, owner)?;

        let handle = ResultHandle::new(identifier.clone(), "json", Self::location(identifier));
        slot.value = Some(value.clone());
        slot.entry.complete(handle.clone());

        debug!(identifier = %identifier, "Committed result");
        Ok(handle)
    }

    async fn fail(
        &self,
        identifier: &StepId,
        owner: &OwnerToken,
        failure: RunFailure,
    ) -> Result<(), WorkspaceError> {
        let mut slot = self
            .slots
            .get_mut(identifier)
            .ok_or_else(|| WorkspaceError::NotRunning {
                identifier: identifier.clone(),
            })?;
        Self::check_owner(&slot, identifier, owner)?;

        debug!(identifier = %identifier, kind = %failure.kind, "Recorded failed run");
        slot.entry.fail(failure);
        Ok(())
    }

    async fn load(&self, handle: &ResultHandle) -> Result<serde_json::Value, WorkspaceError> {
        self.slots
            .get(&handle.identifier)
            .and_then(|slot| slot.value.clone())
            .ok_or_else(|| WorkspaceError::MissingResult {
                identifier: handle.identifier.clone(),
            })
    }

    async fn remove(&self, identifier: &StepId) -> Result<bool, WorkspaceError> {
        Ok(self.slots.remove(identifier).is_some())
    }

    async fn entry(&self, identifier: &StepId) -> Result<Option<CacheEntry>, WorkspaceError> {
        Ok(self.slots.get(identifier).map(|slot| slot.entry.clone()))
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, WorkspaceError> {
        let mut entries: Vec<CacheEntry> = self.slots.iter().map(|slot| slot.entry.clone()).collect();
        entries.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(entries)
    }
}

//! Cache entry records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::StepErrorKind;
use crate::graph::StepId;

/// Token identifying the current holder of a running entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerToken(Uuid);

impl OwnerToken {
    /// Creates a fresh random token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Nothing is known about the identifier.
    Absent,
    /// An owner is currently producing the result.
    Running,
    /// The result is stored and immutable until removed.
    Complete,
    /// The last run failed; treated as absent by lookups.
    Failed,
}

impl EntryStatus {
    /// Returns true if a new run may start from this state.
    #[must_use]
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::Absent | Self::Failed)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Opaque reference to a stored result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultHandle {
    /// Identifier the result belongs to.
    pub identifier: StepId,
    /// Name of the format the result was written with.
    pub format: String,
    /// Backend-specific location of the stored bytes.
    pub location: String,
}

impl ResultHandle {
    /// Creates a new handle.
    #[must_use]
    pub fn new(identifier: StepId, format: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            identifier,
            format: format.into(),
            location: location.into(),
        }
    }
}

/// Diagnostics kept for a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    /// The kind of failure.
    pub kind: StepErrorKind,
    /// Error message.
    pub message: String,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

impl RunFailure {
    /// Creates a failure record stamped with the current time.
    #[must_use]
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Result of a workspace lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// A complete result is stored.
    Present(ResultHandle),
    /// No usable result. Failed entries also look absent.
    Absent,
    /// Another owner is producing the result.
    InProgress(OwnerToken),
}

/// The workspace record for one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The identifier.
    pub identifier: StepId,
    /// Current state.
    pub status: EntryStatus,
    /// Handle of the stored result, once complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_handle: Option<ResultHandle>,
    /// When the latest run started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the latest run ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Holder of a running entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_token: Option<OwnerToken>,
    /// Diagnostics of the latest failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl CacheEntry {
    /// Creates an absent entry.
    #[must_use]
    pub fn absent(identifier: StepId) -> Self {
        Self {
            identifier,
            status: EntryStatus::Absent,
            result_handle: None,
            started_at: None,
            ended_at: None,
            owner_token: None,
            failure: None,
        }
    }

    /// Creates a running entry held by `owner`.
    #[must_use]
    pub fn running(identifier: StepId, owner: OwnerToken, started_at: DateTime<Utc>) -> Self {
        Self {
            status: EntryStatus::Running,
            started_at: Some(started_at),
            owner_token: Some(owner),
            ..Self::absent(identifier)
        }
    }

    /// Converts the entry into the lookup view.
    #[must_use]
    pub fn lookup(&self) -> LookupResult {
        match (self.status, &self.result_handle, self.owner_token) {
            (EntryStatus::Complete, Some(handle), _) => LookupResult::Present(handle.clone()),
            (EntryStatus::Running, _, Some(owner)) => LookupResult::InProgress(owner),
            _ => LookupResult::Absent,
        }
    }

    /// Returns true if the entry is running and older than `stale_after`.
    #[must_use]
    pub fn is_stale(&self, stale_after: Option<Duration>, now: DateTime<Utc>) -> bool {
        let (Some(limit), Some(started)) = (stale_after, self.started_at) else {
            return false;
        };
        if self.status != EntryStatus::Running {
            return false;
        }
        (now - started).to_std().is_ok_and(|age| age > limit)
    }

    /// Marks the entry complete.
    pub fn complete(&mut self, handle: ResultHandle) {
        self.status = EntryStatus::Complete;
        self.result_handle = Some(handle);
        self.ended_at = Some(Utc::now());
        self.owner_token = None;
        self.failure = None;
    }

    /// Marks the entry failed.
    pub fn fail(&mut self, failure: RunFailure) {
        self.status = EntryStatus::Failed;
        self.ended_at = Some(failure.at);
        self.owner_token = None;
        self.failure = Some(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> StepId {
        StepId::from_digest_bytes(&[7u8; 16])
    }

    #[test]
    fn test_lookup_views() {
        let owner = OwnerToken::new();
        let mut entry = CacheEntry::running(id(), owner, Utc::now());
        assert_eq!(entry.lookup(), LookupResult::InProgress(owner));

        entry.fail(RunFailure::new(StepErrorKind::Failed, "boom"));
        assert_eq!(entry.lookup(), LookupResult::Absent);
        assert!(entry.status.is_startable());
        assert_eq!(entry.failure.as_ref().map(|f| f.message.as_str()), Some("boom"));

        let handle = ResultHandle::new(id(), "json", "memory");
        entry.complete(handle.clone());
        assert_eq!(entry.lookup(), LookupResult::Present(handle));
        assert!(entry.failure.is_none());
    }

    #[test]
    fn test_staleness() {
        let started = Utc::now() - chrono::Duration::seconds(10);
        let entry = CacheEntry::running(id(), OwnerToken::new(), started);

        assert!(!entry.is_stale(None, Utc::now()));
        assert!(!entry.is_stale(Some(Duration::from_secs(60)), Utc::now()));
        assert!(entry.is_stale(Some(Duration::from_secs(5)), Utc::now()));
    }

    #[test]
    fn test_entry_serialization() {
        let entry = CacheEntry::running(id(), OwnerToken::new(), Utc::now());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "running");
        assert!(json.get("result_handle").is_none());

        let back: CacheEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}

//! Directory-backed durable workspace.
//!
//! Layout, one directory per identifier:
//!
//! ```text
//! <root>/<identifier>/entry.json    entry record
//! <root>/<identifier>/result.<ext>  stored result
//! <root>/<identifier>/run.lock      owner token of a running entry
//! <root>/<identifier>/work/         persistent working directory
//! ```
//!
//! `run.lock` is published by hard-linking a fully written temporary file,
//! which fails if the lock already exists. This keeps `begin_run` atomic
//! across processes sharing the same root. An existing lock is only replaced
//! or removed while holding `run.lock.guard`, created exclusively, and only
//! after re-reading the owner token under it: a stale lock is reclaimed by
//! exactly one writer, and a former owner can never drop its successor's
//! lock. Every other write goes through a temporary file and a rename. A
//! commit writes the result, then the entry, then drops the lock, so a crash
//! at any point never yields a complete entry without its result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    CacheEntry, EntryStatus, JsonFormat, LookupResult, OwnerToken, ResultFormat, ResultHandle,
    RunFailure, Workspace,
};
use crate::errors::WorkspaceError;
use crate::graph::StepId;

const ENTRY_FILE: &str = "entry.json";
const LOCK_FILE: &str = "run.lock";
const GUARD_FILE: &str = "run.lock.guard";
const WORK_DIR: &str = "work";

/// A guard older than this was left behind by a crashed process.
const GUARD_STALE_AFTER: Duration = Duration::from_secs(30);
const GUARD_RETRY: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunLock {
    owner_token: OwnerToken,
    started_at: DateTime<Utc>,
    pid: u32,
}

impl RunLock {
    fn new() -> Self {
        Self {
            owner_token: OwnerToken::new(),
            started_at: Utc::now(),
            pid: std::process::id(),
        }
    }
}

/// Exclusive right to replace or remove one identifier's `run.lock`.
///
/// Released on drop.
#[derive(Debug)]
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    async fn acquire(path: PathBuf) -> Result<Self, WorkspaceError> {
        loop {
            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match created {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if guard_is_abandoned(&path).await {
                        warn!(path = %path.display(), "Breaking abandoned lock guard");
                        remove_if_exists(&path).await?;
                        continue;
                    }
                    tokio::time::sleep(GUARD_RETRY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to release lock guard");
            }
        }
    }
}

/// Workspace persisted under a root directory.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
    format: Arc<dyn ResultFormat>,
    stale_after: Option<Duration>,
}

impl LocalWorkspace {
    /// Opens a workspace rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        info!(root = %root.display(), "Opened local workspace");
        Ok(Self {
            root,
            format: Arc::new(JsonFormat::new()),
            stale_after: None,
        })
    }

    /// Sets the result format.
    #[must_use]
    pub fn with_format(mut self, format: Arc<dyn ResultFormat>) -> Self {
        self.format = format;
        self
    }

    /// Lets `begin_run` reclaim running entries older than `stale_after`.
    ///
    /// Without a threshold, an entry left running by a crashed process stays
    /// claimed until its `run.lock` is removed.
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding an identifier's files.
    #[must_use]
    pub fn step_dir(&self, identifier: &StepId) -> PathBuf {
        self.root.join(identifier.as_str())
    }

    fn entry_path(&self, identifier: &StepId) -> PathBuf {
        self.step_dir(identifier).join(ENTRY_FILE)
    }

    fn lock_path(&self, identifier: &StepId) -> PathBuf {
        self.step_dir(identifier).join(LOCK_FILE)
    }

    async fn guard(&self, identifier: &StepId) -> Result<LockGuard, WorkspaceError> {
        let dir = self.step_dir(identifier);
        if !path_exists(&dir).await {
            return Err(WorkspaceError::NotRunning {
                identifier: identifier.clone(),
            });
        }
        LockGuard::acquire(dir.join(GUARD_FILE)).await
    }

    fn result_path(&self, identifier: &StepId) -> PathBuf {
        self.step_dir(identifier)
            .join(format!("result.{}", self.format.extension()))
    }

    async fn read_entry(&self, identifier: &StepId) -> Result<Option<CacheEntry>, WorkspaceError> {
        read_json(&self.entry_path(identifier)).await
    }

    async fn write_entry(&self, entry: &CacheEntry) -> Result<(), WorkspaceError> {
        let bytes = serde_json::to_vec_pretty(entry)?;
        write_atomic(&self.entry_path(&entry.identifier), &bytes).await
    }

    async fn read_lock(&self, identifier: &StepId) -> Result<Option<RunLock>, WorkspaceError> {
        read_json(&self.lock_path(identifier)).await
    }

    /// Publishes a new lock, failing with `AlreadyExists` if one is present.
    async fn publish_lock(&self, identifier: &StepId, lock: &RunLock) -> std::io::Result<()> {
        let path = self.lock_path(identifier);
        let tmp = temp_sibling(&path);
        let bytes = serde_json::to_vec(lock).map_err(std::io::Error::other)?;
        tokio::fs::write(&tmp, &bytes).await?;
        let linked = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        linked
    }

    /// Replaces the lock held by `observed` with `lock` if it is stale.
    ///
    /// Only the lock that was seen blocking `begin_run` is replaced: if another
    /// writer reclaimed it first, its fresh lock is left alone. Returns `false`
    /// if the lock vanished and publishing should be retried.
    async fn reclaim_lock(
        &self,
        identifier: &StepId,
        observed: &OwnerToken,
        lock: &RunLock,
    ) -> Result<bool, WorkspaceError> {
        let _guard = self.guard(identifier).await?;

        let Some(current) = self.read_lock(identifier).await? else {
            return Ok(false);
        };
        let held = CacheEntry::running(identifier.clone(), current.owner_token, current.started_at);
        if current.owner_token != *observed || !held.is_stale(self.stale_after, Utc::now()) {
            return Err(WorkspaceError::AlreadyRunning {
                identifier: identifier.clone(),
                owner: current.owner_token.to_string(),
            });
        }

        warn!(
            identifier = %identifier,
            owner = %current.owner_token,
            pid = current.pid,
            started_at = %current.started_at,
            "Reclaiming stale running entry"
        );
        // Rename over the old lock: `run.lock` never disappears, so no
        // publisher can slip in between.
        let bytes = serde_json::to_vec(lock)?;
        write_atomic(&self.lock_path(identifier), &bytes).await?;
        Ok(true)
    }

    /// Removes the lock if `owner` still holds it.
    async fn release_lock(&self, identifier: &StepId, owner: &OwnerToken) -> Result<(), WorkspaceError> {
        let _guard = self.guard(identifier).await?;
        match self.read_lock(identifier).await? {
            Some(lock) if lock.owner_token == *owner => {
                remove_if_exists(&self.lock_path(identifier)).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn is_complete(&self, identifier: &StepId) -> Result<Option<ResultHandle>, WorkspaceError> {
        let Some(entry) = self.read_entry(identifier).await? else {
            return Ok(None);
        };
        match (entry.status, entry.result_handle) {
            (EntryStatus::Complete, Some(handle)) if path_exists(Path::new(&handle.location)).await => {
                Ok(Some(handle))
            }
            _ => Ok(None),
        }
    }

    /// Records the running entry for a freshly acquired lock.
    async fn start_entry(&self, identifier: &StepId, lock: &RunLock) -> Result<(), WorkspaceError> {
        let previous_failure = self
            .read_entry(identifier)
            .await?
            .and_then(|e| e.failure);
        let mut entry = CacheEntry::running(identifier.clone(), lock.owner_token, lock.started_at);
        entry.failure = previous_failure;
        self.write_entry(&entry).await
    }

    /// Checks that `owner` holds the lock of `identifier`.
    ///
    /// Callers that go on to drop the lock hold the guard.
    async fn check_owner(&self, identifier: &StepId, owner: &OwnerToken) -> Result<RunLock, WorkspaceError> {
        match self.read_lock(identifier).await? {
            Some(lock) if lock.owner_token == *owner => Ok(lock),
            Some(_) => Err(WorkspaceError::StaleOwner {
                identifier: identifier.clone(),
            }),
            None => match self.read_entry(identifier).await? {
                Some(_) => Err(WorkspaceError::StaleOwner {
                    identifier: identifier.clone(),
                }),
                None => Err(WorkspaceError::NotRunning {
                    identifier: identifier.clone(),
                }),
            },
        }
    }
}

#[async_trait]
impl Workspace for LocalWorkspace {
    async fn lookup(&self, identifier: &StepId) -> Result<LookupResult, WorkspaceError> {
        if let Some(handle) = self.is_complete(identifier).await? {
            return Ok(LookupResult::Present(handle));
        }
        Ok(match self.read_lock(identifier).await? {
            Some(lock) => LookupResult::InProgress(lock.owner_token),
            None => LookupResult::Absent,
        })
    }

    async fn begin_run(&self, identifier: &StepId) -> Result<OwnerToken, WorkspaceError> {
        tokio::fs::create_dir_all(self.step_dir(identifier)).await?;

        if self.is_complete(identifier).await?.is_some() {
            return Err(WorkspaceError::AlreadyComplete {
                identifier: identifier.clone(),
            });
        }

        let lock = RunLock::new();
        // One retry covers a lock released between our two reads.
        for _ in 0..2 {
            match self.publish_lock(identifier, &lock).await {
                Ok(()) => {
                    // A concurrent writer may have committed before we locked.
                    if self.is_complete(identifier).await?.is_some() {
                        self.release_lock(identifier, &lock.owner_token).await?;
                        return Err(WorkspaceError::AlreadyComplete {
                            identifier: identifier.clone(),
                        });
                    }
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let Some(observed) = self.read_lock(identifier).await? else {
                        continue;
                    };
                    if !self.reclaim_lock(identifier, &observed.owner_token, &lock).await? {
                        continue;
                    }
                }
                Err(e) => return Err(e.into()),
            }
            self.start_entry(identifier, &lock).await?;
            debug!(identifier = %identifier, owner = %lock.owner_token, "Began run");
            return Ok(lock.owner_token);
        }

        Err(WorkspaceError::AlreadyRunning {
            identifier: identifier.clone(),
            owner: String::new(),
        })
    }

    async fn commit(
        &self,
        identifier: &StepId,
        owner: &OwnerToken,
        value: &serde_json::Value,
    ) -> Result<ResultHandle, WorkspaceError> {
        let _guard = self.guard(identifier).await?;
        let lock = self.check_owner(identifier, owner).await?;

        let path = self.result_path(identifier);
        let bytes = self.format.encode(value)?;
        write_atomic(&path, &bytes).await?;

        let handle = ResultHandle::new(
            identifier.clone(),
            self.format.name(),
            path.to_string_lossy().into_owned(),
        );
        let mut entry = CacheEntry::running(identifier.clone(), *owner, lock.started_at);
        entry.complete(handle.clone());
        self.write_entry(&entry).await?;
        remove_if_exists(&self.lock_path(identifier)).await?;

        debug!(identifier = %identifier, bytes = bytes.len(), "Committed result");
        Ok(handle)
    }

    async fn fail(
        &self,
        identifier: &StepId,
        owner: &OwnerToken,
        failure: RunFailure,
    ) -> Result<(), WorkspaceError> {
        let _guard = self.guard(identifier).await?;
        let lock = self.check_owner(identifier, owner).await?;

        debug!(identifier = %identifier, kind = %failure.kind, "Recorded failed run");
        let mut entry = CacheEntry::running(identifier.clone(), *owner, lock.started_at);
        entry.fail(failure);
        self.write_entry(&entry).await?;
        remove_if_exists(&self.lock_path(identifier)).await?;
        Ok(())
    }

    async fn load(&self, handle: &ResultHandle) -> Result<serde_json::Value, WorkspaceError> {
        if handle.format != self.format.name() {
            return Err(WorkspaceError::FormatMismatch {
                identifier: handle.identifier.clone(),
                stored: handle.format.clone(),
                requested: self.format.name().to_string(),
            });
        }
        let bytes = match tokio::fs::read(&handle.location).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(WorkspaceError::MissingResult {
                    identifier: handle.identifier.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        self.format.decode(&bytes)
    }

    async fn remove(&self, identifier: &StepId) -> Result<bool, WorkspaceError> {
        match tokio::fs::remove_dir_all(self.step_dir(identifier)).await {
            Ok(()) => {
                info!(identifier = %identifier, "Removed workspace entry");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn entry(&self, identifier: &StepId) -> Result<Option<CacheEntry>, WorkspaceError> {
        let entry = self.read_entry(identifier).await?;
        let lock = self.read_lock(identifier).await?;
        Ok(match (entry, lock) {
            (Some(entry), _) => Some(entry),
            (None, Some(lock)) => Some(CacheEntry::running(
                identifier.clone(),
                lock.owner_token,
                lock.started_at,
            )),
            (None, None) => None,
        })
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, WorkspaceError> {
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let Some(identifier) = item
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<StepId>().ok())
            else {
                continue;
            };
            if let Some(entry) = self.entry(&identifier).await? {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(entries)
    }

    async fn work_dir(&self, identifier: &StepId) -> Result<Option<PathBuf>, WorkspaceError> {
        let path = self.step_dir(identifier).join(WORK_DIR);
        tokio::fs::create_dir_all(&path).await?;
        Ok(Some(path))
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), WorkspaceError> {
    let tmp = temp_sibling(path);
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, WorkspaceError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn guard_is_abandoned(path: &Path) -> bool {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified
            .elapsed()
            .is_ok_and(|age| age > GUARD_STALE_AFTER),
        Err(_) => false,
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StepErrorKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn id(n: u8) -> StepId {
        StepId::from_digest_bytes(&[n; 16])
    }

    fn workspace() -> (TempDir, LocalWorkspace) {
        let dir = TempDir::new().unwrap();
        let ws = LocalWorkspace::open(dir.path().join("ws")).unwrap();
        (dir, ws)
    }

    #[tokio::test]
    async fn test_commit_and_load() {
        let (_dir, ws) = workspace();
        let key = id(1);

        let owner = ws.begin_run(&key).await.unwrap();
        assert!(ws.lock_path(&key).exists());

        let handle = ws.commit(&key, &owner, &json!({"rows": [1, 2]})).await.unwrap();
        assert!(!ws.lock_path(&key).exists());
        assert_eq!(ws.lookup(&key).await.unwrap(), LookupResult::Present(handle.clone()));
        assert_eq!(ws.load(&handle).await.unwrap(), json!({"rows": [1, 2]}));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let (dir, ws) = workspace();
        let key = id(2);

        let owner = ws.begin_run(&key).await.unwrap();
        let handle = ws.commit(&key, &owner, &json!("kept")).await.unwrap();
        drop(ws);

        let reopened = LocalWorkspace::open(dir.path().join("ws")).unwrap();
        assert_eq!(reopened.lookup(&key).await.unwrap(), LookupResult::Present(handle.clone()));
        assert_eq!(reopened.load(&handle).await.unwrap(), json!("kept"));
    }

    #[tokio::test]
    async fn test_two_instances_single_writer() {
        let (dir, ws) = workspace();
        let other = LocalWorkspace::open(dir.path().join("ws")).unwrap();
        let key = id(3);

        let (a, b) = tokio::join!(ws.begin_run(&key), other.begin_run(&key));
        let wins = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(wins, 1);
        let err = if let Err(e) = a { e } else { b.unwrap_err() };
        assert!(matches!(err, WorkspaceError::AlreadyRunning { .. }));
    }

    #[tokio::test]
    async fn test_crash_leaves_running_until_reclaimed() {
        let (dir, ws) = workspace();
        let key = id(4);

        // simulated crash: lock taken, never committed
        let orphan = ws.begin_run(&key).await.unwrap();
        assert!(matches!(ws.lookup(&key).await.unwrap(), LookupResult::InProgress(o) if o == orphan));

        let strict = LocalWorkspace::open(dir.path().join("ws")).unwrap();
        assert!(matches!(
            strict.begin_run(&key).await,
            Err(WorkspaceError::AlreadyRunning { .. })
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        let lenient = LocalWorkspace::open(dir.path().join("ws"))
            .unwrap()
            .with_stale_after(Duration::from_millis(10));
        let owner = lenient.begin_run(&key).await.unwrap();
        assert_ne!(owner, orphan);

        let err = ws.commit(&key, &orphan, &json!(0)).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::StaleOwner { .. }));
        assert!(lenient.commit(&key, &owner, &json!(1)).await.is_ok());
    }

    fn plant_stale_lock(ws: &LocalWorkspace, key: &StepId) -> OwnerToken {
        std::fs::create_dir_all(ws.step_dir(key)).unwrap();
        let lock = RunLock {
            owner_token: OwnerToken::new(),
            started_at: Utc::now() - chrono::Duration::hours(1),
            pid: 0,
        };
        std::fs::write(ws.lock_path(key), serde_json::to_vec(&lock).unwrap()).unwrap();
        lock.owner_token
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reclaim_has_single_winner() {
        let (dir, ws) = workspace();

        for trial in 0..20u8 {
            let key = id(100 + trial);
            let stale = plant_stale_lock(&ws, &key);

            let tasks: Vec<_> = (0..6)
                .map(|_| {
                    let racer = LocalWorkspace::open(dir.path().join("ws"))
                        .unwrap()
                        .with_stale_after(Duration::from_secs(60));
                    let key = key.clone();
                    tokio::spawn(async move { racer.begin_run(&key).await })
                })
                .collect();

            let mut winners = Vec::new();
            for task in tasks {
                match task.await.unwrap() {
                    Ok(owner) => winners.push(owner),
                    Err(e) => assert!(matches!(e, WorkspaceError::AlreadyRunning { .. }), "{e}"),
                }
            }

            assert_eq!(winners.len(), 1, "trial {trial}");
            let lock = ws.read_lock(&key).await.unwrap().unwrap();
            assert_eq!(lock.owner_token, winners[0]);
            assert_ne!(lock.owner_token, stale);
            assert!(!ws.step_dir(&key).join(GUARD_FILE).exists());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_racing_reclaimers_with_short_threshold() {
        let (dir, ws) = workspace();
        let open = || {
            LocalWorkspace::open(dir.path().join("ws"))
                .unwrap()
                .with_stale_after(Duration::from_millis(20))
        };

        for trial in 0..50u8 {
            let key = id(150 + trial);
            let orphan = ws.begin_run(&key).await.unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;

            let (left, right) = (open(), open());
            let (k1, k2) = (key.clone(), key.clone());
            let (a, b) = tokio::join!(
                tokio::spawn(async move { left.begin_run(&k1).await }),
                tokio::spawn(async move { right.begin_run(&k2).await }),
            );
            let owners: Vec<OwnerToken> = [a.unwrap(), b.unwrap()]
                .into_iter()
                .filter_map(Result::ok)
                .collect();

            assert_eq!(owners.len(), 1, "trial {trial}");
            assert_ne!(owners[0], orphan);
            let err = ws.commit(&key, &orphan, &json!("orphan")).await.unwrap_err();
            assert!(matches!(err, WorkspaceError::StaleOwner { .. }));
        }
    }

    #[tokio::test]
    async fn test_stale_owner_cannot_release_successor() {
        let (dir, ws) = workspace();
        let key = id(8);

        let orphan = ws.begin_run(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let lenient = LocalWorkspace::open(dir.path().join("ws"))
            .unwrap()
            .with_stale_after(Duration::from_millis(10));
        let successor = lenient.begin_run(&key).await.unwrap();

        let err = ws
            .fail(&key, &orphan, RunFailure::new(StepErrorKind::Failed, "late"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::StaleOwner { .. }));
        ws.release_lock(&key, &orphan).await.unwrap();
        assert_eq!(
            ws.read_lock(&key).await.unwrap().map(|l| l.owner_token),
            Some(successor)
        );

        let handle = lenient.commit(&key, &successor, &json!("successor")).await.unwrap();
        let err = ws.commit(&key, &orphan, &json!("orphan")).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::StaleOwner { .. }));

        let entry = ws.entry(&key).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Complete);
        assert_eq!(ws.load(&handle).await.unwrap(), json!("successor"));
    }

    #[tokio::test]
    async fn test_commit_without_run_is_not_running() {
        let (_dir, ws) = workspace();
        let err = ws.commit(&id(9), &OwnerToken::new(), &json!(1)).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::NotRunning { .. }));
    }

    #[tokio::test]
    async fn test_fail_then_retry() {
        let (_dir, ws) = workspace();
        let key = id(5);

        let owner = ws.begin_run(&key).await.unwrap();
        ws.fail(&key, &owner, RunFailure::new(StepErrorKind::TimedOut, "too slow"))
            .await
            .unwrap();
        assert_eq!(ws.lookup(&key).await.unwrap(), LookupResult::Absent);

        let entry = ws.entry(&key).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Failed);

        let again = ws.begin_run(&key).await.unwrap();
        let entry = ws.entry(&key).await.unwrap().unwrap();
        assert_eq!(entry.owner_token, Some(again));
        assert_eq!(entry.failure.map(|f| f.kind), Some(StepErrorKind::TimedOut));
    }

    #[tokio::test]
    async fn test_missing_result_file_is_not_present() {
        let (_dir, ws) = workspace();
        let key = id(6);

        let owner = ws.begin_run(&key).await.unwrap();
        let handle = ws.commit(&key, &owner, &json!(1)).await.unwrap();
        std::fs::remove_file(&handle.location).unwrap();

        assert_eq!(ws.lookup(&key).await.unwrap(), LookupResult::Absent);
        assert!(matches!(
            ws.load(&handle).await,
            Err(WorkspaceError::MissingResult { .. })
        ));
    }

    #[tokio::test]
    async fn test_format_mismatch() {
        let (_dir, ws) = workspace();
        let key = id(7);

        let owner = ws.begin_run(&key).await.unwrap();
        let mut handle = ws.commit(&key, &owner, &json!(1)).await.unwrap();
        handle.format = "msgpack".to_string();

        assert!(matches!(
            ws.load(&handle).await,
            Err(WorkspaceError::FormatMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_entries_and_work_dir() {
        let (_dir, ws) = workspace();

        for n in [1, 2] {
            let owner = ws.begin_run(&id(n)).await.unwrap();
            ws.commit(&id(n), &owner, &json!(n)).await.unwrap();
        }
        let work = ws.work_dir(&id(1)).await.unwrap().unwrap();
        assert!(work.is_dir());
        std::fs::create_dir_all(ws.root().join("not-an-id")).unwrap();

        assert_eq!(ws.entries().await.unwrap().len(), 2);
        assert!(ws.remove(&id(1)).await.unwrap());
        assert!(!ws.remove(&id(1)).await.unwrap());
        assert_eq!(ws.entries().await.unwrap().len(), 1);
    }
}

//! Single-owner session record with crash recovery.
//!
//! Every read-modify-write of `session.json` happens under an exclusive
//! advisory lock on `session.lock`, and the record itself is replaced
//! atomically.

use crate::errors::SessionError;
use crate::plan::PlanStore;
use crate::plan::types::EntryStatus;
use crate::session::state::{SessionState, SessionStatus};
use crate::util::{write_atomic, write_json_atomic};
use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const SESSION_FILE: &str = "session.json";
const LOCK_FILE: &str = "session.lock";

/// Outcome of taking ownership of a session.
#[derive(Debug, Clone)]
pub struct AcquiredSession {
    pub state: SessionState,
    /// Owner PID of the session that was taken over
    pub previous_owner: Option<u32>,
    /// Seqs reset from `in_progress` to `pending`
    pub recovered: Vec<String>,
}

pub struct SessionManager {
    config_dir: PathBuf,
}

impl SessionManager {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn session_path(&self) -> PathBuf {
        self.config_dir.join(SESSION_FILE)
    }

    fn lock(&self) -> Result<File> {
        fs::create_dir_all(&self.config_dir)
            .with_context(|| format!("Failed to create {}", self.config_dir.display()))?;
        let path = self.config_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        Ok(file)
    }

    /// Current record, or `None` when no session was ever started.
    pub fn load(&self) -> Result<Option<SessionState>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let state = serde_json::from_str(&content).map_err(|e| SessionError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(Some(state))
    }

    fn save(&self, state: &SessionState) -> Result<()> {
        write_json_atomic(&self.session_path(), state)
    }

    /// Take ownership of the session for `plan`.
    ///
    /// A live owner is only displaced with `resume`. Once ownership is taken,
    /// entries still marked `in_progress` belong to no running process and
    /// are reset to `pending`. With `resume`, the previous record's id,
    /// feature branch and pending merge carry over.
    pub fn acquire(
        &self,
        plan: &Path,
        children_dir: &Path,
        store: &PlanStore,
        resume: bool,
    ) -> Result<AcquiredSession> {
        let _lock = self.lock()?;
        ensure_gitignore(&self.config_dir)?;

        let existing = self.load()?;
        let mut previous_owner = None;
        let mut state = SessionState::new(
            plan.to_path_buf(),
            children_dir.to_path_buf(),
            self.config_dir.clone(),
        );

        if let Some(prev) = &existing
            && prev.active
            && !prev.is_owned_by_current_process()
        {
            let alive = is_process_alive(prev.owner_pid);
            if alive && !resume {
                return Err(SessionError::Conflict {
                    plan: prev.parent_plan.clone(),
                    pid: prev.owner_pid,
                }
                .into());
            }
            if alive {
                tracing::warn!(pid = prev.owner_pid, "Taking over session from live process");
            } else {
                tracing::warn!(pid = prev.owner_pid, "Previous session owner is gone");
            }
            previous_owner = Some(prev.owner_pid);
        }

        if let Some(prev) = existing
            && resume
            && prev.parent_plan == state.parent_plan
        {
            state.session_id = prev.session_id;
            state.started_at = prev.started_at;
            state.feature_branch = prev.feature_branch;
            state.pending_merge = prev.pending_merge;
        }

        let recovered = recover_in_progress(store)?;

        state.updated_at = Some(Utc::now());
        self.save(&state)?;
        tracing::info!(session = %state.session_id, plan = %plan.display(), "Session acquired");

        Ok(AcquiredSession {
            state,
            previous_owner,
            recovered,
        })
    }

    /// Apply a change to the stored record.
    pub fn update<F>(&self, change: F) -> Result<SessionState>
    where
        F: FnOnce(&mut SessionState),
    {
        let _lock = self.lock()?;
        let mut state = self
            .load()?
            .context("No session to update; run `cascade run` first")?;
        change(&mut state);
        state.updated_at = Some(Utc::now());
        self.save(&state)?;
        Ok(state)
    }

    /// Mark the session finished. A cancellation recorded by another
    /// process is kept.
    pub fn release(&self, status: SessionStatus, reason: Option<String>) -> Result<SessionState> {
        self.update(|state| {
            state.active = false;
            state.current_child = None;
            if !state.is_cancelled() {
                state.status = status;
                state.reason = reason;
            }
        })
    }

    /// Ask the owning process to stop after its current step.
    pub fn cancel(&self) -> Result<Option<SessionState>> {
        if self.load()?.is_none_or(|s| !s.active) {
            return Ok(None);
        }
        let state = self.update(|state| {
            state.status = SessionStatus::Cancelled;
            state.reason = Some("cancelled by operator".to_string());
            if !is_process_alive(state.owner_pid) {
                state.active = false;
            }
        })?;
        Ok(Some(state))
    }
}

/// Reset entries stuck `in_progress` to `pending`. Returns their seqs.
pub fn recover_in_progress(store: &PlanStore) -> Result<Vec<String>> {
    let mut entries = store.load_entries()?;
    let mut recovered = Vec::new();
    for entry in entries
        .iter_mut()
        .filter(|e| e.status == EntryStatus::InProgress)
    {
        entry.reset();
        recovered.push(entry.seq.clone());
    }
    if !recovered.is_empty() {
        store.save_entries(&entries)?;
        tracing::warn!(seqs = ?recovered, "Reset interrupted entries to pending");
    }
    Ok(recovered)
}

/// Keep orchestration state out of commits.
pub fn ensure_gitignore(config_dir: &Path) -> Result<()> {
    let path = config_dir.join(".gitignore");
    if !path.exists() {
        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;
        write_atomic(&path, b"*\n")?;
    }
    Ok(())
}

#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    const PLAN: &str = "# Plan: Demo

## Execution Table
| Seq | Child | Status | Depends On | Started | Completed |
|-----|-------|--------|------------|---------|-----------|
| 01 | 01-a.md | completed | — | 2026-01-01T00:00:00Z | 2026-01-01T00:01:00Z |
| 02 | 02-b.md | in_progress | 01 | 2026-01-01T00:02:00Z | |
";

    fn setup() -> (TempDir, SessionManager, PlanStore, PathBuf) {
        let dir = tempdir().unwrap();
        let plan = dir.path().join("plan.md");
        fs::write(&plan, PLAN).unwrap();
        let manager = SessionManager::new(dir.path().join(".cascade"));
        let store = PlanStore::new(&plan);
        (dir, manager, store, plan)
    }

    fn write_foreign_session(manager: &SessionManager, plan: &Path, pid: u32) {
        let mut state = SessionState::new(
            plan.to_path_buf(),
            PathBuf::from("children"),
            PathBuf::from(".cascade"),
        );
        state.owner_pid = pid;
        state.feature_branch = Some("feat/demo".into());
        fs::create_dir_all(manager.session_path().parent().unwrap()).unwrap();
        fs::write(
            manager.session_path(),
            serde_json::to_string(&state).unwrap(),
        )
        .unwrap();
    }

    /// PID of a process that has already exited.
    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_acquire_fresh_session_writes_gitignore() {
        let (dir, manager, store, plan) = setup();
        let acquired = manager
            .acquire(&plan, dir.path(), &store, false)
            .unwrap();
        assert!(acquired.state.active);
        assert_eq!(acquired.state.owner_pid, std::process::id());
        assert_eq!(acquired.previous_owner, None);
        assert_eq!(
            fs::read_to_string(dir.path().join(".cascade/.gitignore")).unwrap(),
            "*\n"
        );
        assert_eq!(manager.load().unwrap().unwrap(), acquired.state);
    }

    #[test]
    fn test_live_owner_conflicts_without_resume() {
        let (dir, manager, store, plan) = setup();
        // PID 1 is always alive.
        write_foreign_session(&manager, &plan, 1);
        let err = manager
            .acquire(&plan, dir.path(), &store, false)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::Conflict { pid: 1, .. })
        ));

        let acquired = manager.acquire(&plan, dir.path(), &store, true).unwrap();
        assert_eq!(acquired.previous_owner, Some(1));
        assert_eq!(acquired.state.feature_branch.as_deref(), Some("feat/demo"));
    }

    #[test]
    fn test_resume_carries_over_released_session() {
        let (dir, manager, store, plan) = setup();
        let first = manager.acquire(&plan, dir.path(), &store, false).unwrap();
        manager
            .update(|s| {
                s.feature_branch = Some("feat/demo".into());
                s.pending_merge = Some(crate::session::PendingMerge {
                    seq: "02".into(),
                    branch: "feat/demo--02-b".into(),
                });
            })
            .unwrap();
        manager
            .release(SessionStatus::Paused, Some("merge conflict".into()))
            .unwrap();

        let resumed = manager.acquire(&plan, dir.path(), &store, true).unwrap();
        assert_eq!(resumed.state.session_id, first.state.session_id);
        assert_eq!(resumed.previous_owner, None);
        assert_eq!(
            resumed.state.pending_merge.map(|p| p.branch).as_deref(),
            Some("feat/demo--02-b")
        );

        let fresh = manager.acquire(&plan, dir.path(), &store, false).unwrap();
        assert_ne!(fresh.state.session_id, first.state.session_id);
        assert!(fresh.state.pending_merge.is_none());
    }

    #[test]
    fn test_dead_owner_is_taken_over_and_entries_recovered() {
        let (dir, manager, store, plan) = setup();
        write_foreign_session(&manager, &plan, dead_pid());
        let acquired = manager
            .acquire(&plan, dir.path(), &store, false)
            .unwrap();
        assert!(acquired.previous_owner.is_some());
        assert_eq!(acquired.recovered, vec!["02"]);
        let entries = store.load_entries().unwrap();
        assert_eq!(entries[1].status, EntryStatus::Pending);
        assert!(entries[1].started.is_none());
    }

    #[test]
    fn test_release_and_cancel() {
        let (dir, manager, store, plan) = setup();
        manager.acquire(&plan, dir.path(), &store, false).unwrap();

        let cancelled = manager.cancel().unwrap().unwrap();
        assert!(cancelled.is_cancelled());
        // Owner (this process) is alive, so the session stays active until released.
        assert!(cancelled.active);

        let released = manager
            .release(SessionStatus::Completed, None)
            .unwrap();
        assert!(!released.active);
        assert_eq!(released.status, SessionStatus::Cancelled);
        assert!(manager.cancel().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_session_file() {
        let (_dir, manager, _store, _plan) = setup();
        fs::create_dir_all(manager.session_path().parent().unwrap()).unwrap();
        fs::write(manager.session_path(), "{not json").unwrap();
        let err = manager.load().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_process_liveness() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(dead_pid()));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_liveness_edge_pids() {
        // pid 0 would signal the whole process group
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(u32::MAX));
        // init exists; EPERM for unprivileged callers still means alive
        assert!(is_process_alive(1));
    }
}

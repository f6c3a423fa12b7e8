//! Per-kind session state: advisory lock, status file, failure counter
//!
//! One session per loop kind may initialize at a time, enforced by a
//! best-effort `fs2` advisory lock. The status file is display state
//! for operators; a torn concurrent write reads as "no data yet".

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::registry::LoopKind;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A {0} session is already running")]
    AlreadyRunning(LoopKind),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operator-visible session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Running,
    Paused,
    Stopped,
}

/// Snapshot persisted to the status file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub stats: RunStats,
}

/// Counters for one session run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub tasks_attempted: u32,
    pub tasks_succeeded: u32,
    pub tasks_failed: u32,
    pub tasks_skipped: u32,
}

impl RunStats {
    pub fn summary(&self) -> String {
        format!(
            "{} attempted, {} succeeded, {} failed, {} skipped",
            self.tasks_attempted, self.tasks_succeeded, self.tasks_failed, self.tasks_skipped
        )
    }
}

/// A live session of one loop kind, holding the advisory lock
pub struct LoopSession {
    kind: LoopKind,
    dir: PathBuf,
    // Held open for the session's lifetime; dropping releases the lock
    lock_file: Option<File>,
    started_at: DateTime<Utc>,
    failure_threshold: u32,
    consecutive_failures: u32,
    pub stats: RunStats,
}

fn lock_path(dir: &Path, kind: LoopKind) -> PathBuf {
    dir.join(format!("{kind}.lock"))
}

fn status_path(dir: &Path, kind: LoopKind) -> PathBuf {
    dir.join(format!("{kind}.status.json"))
}

impl LoopSession {
    /// Acquire the session lock for a loop kind. Fails when another
    /// live process of the same kind holds it.
    pub fn acquire(dir: impl Into<PathBuf>, kind: LoopKind, failure_threshold: u32) -> Result<Self, SessionError> {
        let dir = dir.into();
        debug!(%kind, dir = %dir.display(), "LoopSession::acquire: called");
        fs::create_dir_all(&dir)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path(&dir, kind))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(SessionError::AlreadyRunning(kind));
        }

        let session = Self {
            kind,
            dir,
            lock_file: Some(lock_file),
            started_at: Utc::now(),
            failure_threshold,
            consecutive_failures: 0,
            stats: RunStats::default(),
        };
        session.write_status(SessionState::Running);
        info!(%kind, "Session started");
        Ok(session)
    }

    /// Fresh conversation id for one task dispatch. Never reused: a
    /// worker must not resume a prior task's context.
    pub fn new_worker_session_id(&self) -> String {
        queuestore::generate_id()
    }

    /// Record a task success; resets the consecutive-failure counter
    pub fn record_success(&mut self) {
        self.stats.tasks_attempted += 1;
        self.stats.tasks_succeeded += 1;
        self.consecutive_failures = 0;
        self.write_status(SessionState::Running);
    }

    /// Record a task failure. Returns true exactly when the counter
    /// reaches the threshold, at which point the session should pause.
    pub fn record_failure(&mut self) -> bool {
        self.stats.tasks_attempted += 1;
        self.stats.tasks_failed += 1;
        self.consecutive_failures += 1;
        let tripped = self.consecutive_failures == self.failure_threshold;
        self.write_status(if tripped { SessionState::Paused } else { SessionState::Running });
        if tripped {
            warn!(
                failures = self.consecutive_failures,
                "Consecutive-failure threshold reached, pausing session"
            );
        }
        tripped
    }

    /// Record a skipped task; does not touch the failure counter
    pub fn record_skip(&mut self) {
        self.stats.tasks_attempted += 1;
        self.stats.tasks_skipped += 1;
        self.write_status(SessionState::Running);
    }

    /// Resume after an operator cleared the pause
    pub fn resumed(&mut self) {
        self.consecutive_failures = 0;
        self.write_status(SessionState::Running);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Release the lock and mark the session stopped
    pub fn release(mut self) -> RunStats {
        debug!(kind = %self.kind, "LoopSession::release: called");
        self.write_status(SessionState::Stopped);
        if let Some(lock_file) = self.lock_file.take() {
            if let Err(e) = fs2::FileExt::unlock(&lock_file) {
                warn!(error = %e, "Failed to release session lock");
            }
        }
        info!(kind = %self.kind, stats = %self.stats.summary(), "Session stopped");
        self.stats.clone()
    }

    // Best-effort: status is display state, losing a write is fine
    fn write_status(&self, state: SessionState) {
        let status = SessionStatus {
            state,
            started_at: self.started_at,
            updated_at: Utc::now(),
            consecutive_failures: self.consecutive_failures,
            stats: self.stats.clone(),
        };
        let path = status_path(&self.dir, self.kind);
        let tmp = path.with_extension("json.tmp");
        let write = serde_json::to_string_pretty(&status)
            .map_err(std::io::Error::other)
            .and_then(|json| fs::write(&tmp, json))
            .and_then(|()| fs::rename(&tmp, &path));
        if let Err(e) = write {
            warn!(error = %e, "Failed to write session status");
        }
    }
}

/// Read a session's status file. Torn or missing reads as None.
pub fn read_status(dir: &Path, kind: LoopKind) -> Option<SessionStatus> {
    let content = fs::read_to_string(status_path(dir, kind)).ok()?;
    serde_json::from_str(&content).ok()
}

/// Escape hatch for `reset`: delete lock and force status to stopped
/// without owning the session
pub fn force_stopped(dir: &Path, kind: LoopKind) {
    let _ = fs::remove_file(lock_path(dir, kind));
    if let Some(mut status) = read_status(dir, kind) {
        status.state = SessionState::Stopped;
        status.updated_at = Utc::now();
        if let Ok(json) = serde_json::to_string_pretty(&status) {
            let _ = fs::write(status_path(dir, kind), json);
        }
    }
    info!(%kind, "Session forcibly stopped");
}

//! Control signal subsystem
//!
//! Signals are sentinel files in a shared control directory: presence
//! means asserted, absence means clear. Any payload is display-only
//! metadata. Consumers that act on a signal (the execution loop) always
//! re-check the filesystem at the decision point; the cached
//! [`SignalWatcher`] exists only to make passive display cheap, since
//! change notifications are not guaranteed to arrive across runtime
//! contexts.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::registry::LoopKind;

/// Poll granularity for every suspension point
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Display-only metadata stored inside a sentinel file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMeta {
    /// When the signal was asserted
    pub at: chrono::DateTime<Utc>,

    /// Who asserted it (cli, dashboard, loop id)
    pub by: String,
}

/// Scope of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopScope {
    /// Stops every loop
    Global,
    /// Stops loops of one kind only
    Kind(LoopKind),
}

/// Outcome of a pause wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    /// Pause cleared, keep going
    Resumed,
    /// A stop asserted while paused
    Stopped,
}

/// Handle on the control directory
#[derive(Debug, Clone)]
pub struct ControlSignals {
    dir: PathBuf,
}

impl ControlSignals {
    /// Open the control directory, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> eyre::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Control directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stop_path(&self, scope: StopScope) -> PathBuf {
        match scope {
            StopScope::Global => self.dir.join("stop"),
            StopScope::Kind(kind) => self.dir.join(format!("stop-{}", kind)),
        }
    }

    fn pause_path(&self) -> PathBuf {
        self.dir.join("pause")
    }

    fn assert_sentinel(&self, path: &Path, by: &str) {
        let meta = SignalMeta {
            at: Utc::now(),
            by: by.to_string(),
        };
        let payload = serde_json::to_string(&meta).unwrap_or_default();
        if let Err(e) = fs::write(path, payload) {
            warn!(path = %path.display(), error = %e, "Failed to write signal sentinel");
        }
    }

    fn clear_sentinel(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to clear signal sentinel"),
        }
    }

    /// Assert a stop signal
    pub fn assert_stop(&self, scope: StopScope, by: &str) {
        debug!(?scope, %by, "ControlSignals::assert_stop: called");
        self.assert_sentinel(&self.stop_path(scope), by);
        info!(?scope, "Stop signal asserted");
    }

    /// True when a stop applies to the given loop kind (scoped or global)
    pub fn stop_requested(&self, kind: LoopKind) -> bool {
        self.stop_path(StopScope::Global).exists() || self.stop_path(StopScope::Kind(kind)).exists()
    }

    /// Assert the pause signal
    pub fn pause(&self, by: &str) {
        debug!(%by, "ControlSignals::pause: called");
        self.assert_sentinel(&self.pause_path(), by);
        info!("Pause signal asserted");
    }

    /// True while the pause sentinel exists
    pub fn paused(&self) -> bool {
        self.pause_path().exists()
    }

    /// Clear pause and any stop scoped to the given kind
    pub fn resume(&self, kind: LoopKind) {
        debug!(%kind, "ControlSignals::resume: called");
        self.clear_sentinel(&self.pause_path());
        self.clear_sentinel(&self.stop_path(StopScope::Kind(kind)));
        info!(%kind, "Resumed");
    }

    /// Clear every signal sentinel. Part of the `reset` escape hatch;
    /// process records and the session lock are handled by the caller.
    pub fn clear_all(&self) {
        debug!("ControlSignals::clear_all: called");
        self.clear_sentinel(&self.stop_path(StopScope::Global));
        for kind in LoopKind::all() {
            self.clear_sentinel(&self.stop_path(StopScope::Kind(kind)));
        }
        self.clear_sentinel(&self.pause_path());
        info!("All control signals cleared");
    }

    /// Block while paused, polling at ≤1s granularity, until the pause
    /// clears or a stop for this kind asserts
    pub async fn wait_while_paused(&self, kind: LoopKind) -> PauseOutcome {
        if self.paused() {
            info!(%kind, "Paused; waiting");
        }
        while self.paused() {
            if self.stop_requested(kind) {
                return PauseOutcome::Stopped;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        PauseOutcome::Resumed
    }

    /// Sleep for `duration` in ≤1s increments, returning early if a stop
    /// for this kind asserts. Returns true if the stop cut the wait short.
    pub async fn interruptible_sleep(&self, duration: Duration, kind: LoopKind) -> bool {
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.stop_requested(kind) {
                return true;
            }
            let step = remaining.min(POLL_INTERVAL);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
        self.stop_requested(kind)
    }
}

/// Cached view of signal state for passive display.
///
/// Never used for control flow: refresh happens by explicit polling and
/// may lag the filesystem arbitrarily.
#[derive(Debug)]
pub struct SignalWatcher {
    signals: ControlSignals,
    stop_global: bool,
    stop_analysis: bool,
    stop_execution: bool,
    paused: bool,
}

impl SignalWatcher {
    /// Create a watcher with an immediate first refresh
    pub fn new(signals: ControlSignals) -> Self {
        let mut watcher = Self {
            signals,
            stop_global: false,
            stop_analysis: false,
            stop_execution: false,
            paused: false,
        };
        watcher.refresh();
        watcher
    }

    /// Re-read the filesystem into the cache
    pub fn refresh(&mut self) {
        self.stop_global = self.signals.stop_path(StopScope::Global).exists();
        self.stop_analysis = self
            .signals
            .stop_path(StopScope::Kind(LoopKind::Analysis))
            .exists();
        self.stop_execution = self
            .signals
            .stop_path(StopScope::Kind(LoopKind::Execution))
            .exists();
        self.paused = self.signals.paused();
    }

    /// Cached snapshot as display strings
    pub fn summary(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("stop", self.stop_global),
            ("stop-analysis", self.stop_analysis),
            ("stop-execution", self.stop_execution),
            ("pause", self.paused),
        ]
    }
}

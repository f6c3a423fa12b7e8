//! Overseer - filesystem-coordinated agent loop orchestrator
//!
//! Overseer runs autonomous coding-agent workers against a task queue.
//! Independent OS processes coordinate purely through the filesystem:
//! task status is a directory, claims are atomic renames, liveness is
//! a registry of pid records swept lazily on read, and control is a
//! handful of sentinel files. Each task executes on its own git branch
//! in its own worktree and lands back on the base branch as a single
//! squash commit.
//!
//! # Modules
//!
//! - [`registry`] - process records, sweeps, stop/kill/whisper
//! - [`signals`] - sentinel-file control plane (stop, pause, resume)
//! - [`worktree`] - per-task branches, junction mounts, squash merge
//! - [`ratelimit`] - provider limit messages to wake times
//! - [`r#loop`] - the fetch/dispatch/classify engine and session state
//! - [`worker`] - the seam to the external agent command
//!
//! Task storage itself lives in the `queuestore` crate.

pub mod cli;
pub mod config;
pub mod prompt;
pub mod ratelimit;
pub mod registry;
pub mod signals;
pub mod worker;
pub mod worktree;

// Note: 'loop' is a reserved keyword, so we use r#loop
#[path = "loop/mod.rs"]
pub mod r#loop;

pub use config::Config;
pub use r#loop::{Classification, Engine, EngineConfig, FailureKind, LoopSession, RunStats, classify};
pub use ratelimit::{RateLimitPause, WaitOutcome, parse_pause};
pub use registry::{
    LoopKind, ProcessKind, ProcessRecord, ProcessRegistry, ProcessStatus, ProcessTarget,
};
pub use signals::{ControlSignals, PauseOutcome, SignalWatcher, StopScope};
pub use worker::{CommandWorker, MockWorker, Worker, WorkerOutcome};
pub use worktree::{CompleteResult, WorktreeConfig, WorktreeError, WorktreeInfo, WorktreeManager};

//! The worker loop: fetch, claim, dispatch, classify, route
//!
//! One engine instance is one OS process registered in the process
//! registry. All coordination is through the filesystem: the task
//! store for work, sentinel files for control, the registry for
//! liveness. Every suspension point polls at 1-second granularity so
//! stop requests land within a second.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eyre::Context;
use queuestore::{StoreError, Task, TaskStatus, TaskStore};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::prompt;
use crate::ratelimit::{self, WaitOutcome};
use crate::registry::{ActivityEntry, LoopKind, ProcessRegistry, ProcessStatus};
use crate::signals::{ControlSignals, PauseOutcome};
use crate::worker::Worker;
use crate::worktree::WorktreeManager;

use super::classify::{FailureKind, classify};
use super::session::{LoopSession, RunStats};

/// Engine tuning, filled from the config file
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub kind: LoopKind,
    /// Retries per task for recoverable failures
    pub max_retries: u32,
    /// Consecutive failures before the session pauses itself
    pub failure_threshold: u32,
    /// Execution fetches from `analysed` instead of `todo`
    pub preflight_analysis: bool,
    pub cooldown: Duration,
    pub idle_poll: Duration,
    /// Session lock and status files live here
    pub session_dir: PathBuf,
    /// Ephemeral worker artifacts, wiped at startup
    pub scratch_dir: PathBuf,
    pub prompt_template: String,
    /// Exit once the queue runs dry instead of idling (one-shot runs)
    pub exit_on_idle: bool,
    /// Launch record to adopt, handed down by the spawning process;
    /// None means register a fresh record
    pub record_id: Option<String>,
}

/// How one task dispatch ended
enum TaskRun {
    Succeeded,
    Failed(String),
    Skipped(String),
    /// Another process won the claim race
    Lost,
    /// A stop signal arrived mid-task
    Stopped,
}

pub struct Engine {
    config: EngineConfig,
    store: TaskStore,
    registry: ProcessRegistry,
    signals: ControlSignals,
    worktrees: WorktreeManager,
    worker: Arc<dyn Worker>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: TaskStore,
        registry: ProcessRegistry,
        signals: ControlSignals,
        worktrees: WorktreeManager,
        worker: Arc<dyn Worker>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            signals,
            worktrees,
            worker,
        }
    }

    /// Run the loop until stopped (or the queue drains, when
    /// `exit_on_idle` is set). Always deregisters and releases the
    /// session lock on the way out.
    pub async fn run(self) -> eyre::Result<RunStats> {
        let kind = self.config.kind;
        info!(%kind, "Engine starting");

        self.clean_scratch();
        let reset = self.store.reset_in_progress().context("reset_in_progress failed")?;
        if reset > 0 {
            info!(reset, "Returned interrupted tasks to the queue");
        }
        let live_claimed = self
            .registry
            .live_claimed_task_ids()
            .context("registry scan failed")?;
        self.store
            .reset_analysing(&live_claimed)
            .context("reset_analysing failed")?;
        if kind == LoopKind::Execution {
            self.worktrees
                .reconcile_orphans(&self.store)
                .await
                .context("worktree reconciliation failed")?;
        }

        // Adopt the launcher's record when one was handed down, so the
        // id an operator got back from `launch` names this loop
        let record = match self.config.record_id.as_deref() {
            Some(id) => self.registry.adopt(id, kind.into()).context("adoption failed")?,
            None => self.registry.register_self(kind.into()).context("registration failed")?,
        };
        let mut session = LoopSession::acquire(
            &self.config.session_dir,
            kind,
            self.config.failure_threshold,
        )?;

        let session = loop {
            if self.stop_requested(&record.id) {
                info!(%kind, "Stop requested, shutting down");
                break session;
            }
            if self.signals.paused() {
                match self.signals.wait_while_paused(kind).await {
                    PauseOutcome::Stopped => break session,
                    PauseOutcome::Resumed => session.resumed(),
                }
            }

            let task = match self.fetch(kind) {
                Ok(task) => task,
                Err(e) => {
                    error!(error = %e, "Fetch failed");
                    if self.signals.interruptible_sleep(self.config.idle_poll, kind).await {
                        break session;
                    }
                    continue;
                }
            };
            let task = match task {
                Some(task) => task,
                None => {
                    if self.config.exit_on_idle {
                        info!(%kind, "Queue drained");
                        break session;
                    }
                    debug!(%kind, "No tasks, waiting");
                    if self.signals.interruptible_sleep(self.config.idle_poll, kind).await {
                        break session;
                    }
                    continue;
                }
            };

            let run = match kind {
                LoopKind::Execution => self.run_execution_task(&record.id, &session, task).await,
                LoopKind::Analysis => self.run_analysis_task(&record.id, &session, task).await,
            };
            let _ = self.registry.set_current_task(&record.id, None, None);

            match run {
                TaskRun::Succeeded => session.record_success(),
                TaskRun::Skipped(reason) => {
                    info!(%reason, "Task skipped");
                    session.record_skip();
                }
                TaskRun::Failed(reason) => {
                    warn!(%reason, "Task failed");
                    if session.record_failure() {
                        // Pause via the signal so operators see it and
                        // `resume` clears it
                        self.signals.pause("failure-threshold");
                    }
                }
                TaskRun::Lost => {
                    debug!("Lost the claim race, refetching");
                    continue;
                }
                TaskRun::Stopped => break session,
            }

            if self.signals.interruptible_sleep(self.config.cooldown, kind).await {
                break session;
            }
        };

        let final_status = if self.stop_requested(&record.id) {
            ProcessStatus::Stopped
        } else {
            ProcessStatus::Completed
        };
        if let Err(e) = self.registry.set_status(&record.id, final_status) {
            warn!(error = %e, "Failed to deregister");
        }
        let stats = session.release();
        info!(%kind, stats = %stats.summary(), "Engine stopped");
        Ok(stats)
    }

    fn stop_requested(&self, process_id: &str) -> bool {
        self.signals.stop_requested(self.config.kind) || self.registry.stop_requested(process_id)
    }

    fn fetch(&self, kind: LoopKind) -> Result<Option<Task>, StoreError> {
        match kind {
            LoopKind::Execution => self.store.fetch_next(self.config.preflight_analysis),
            // Analysis always feeds from the raw queue
            LoopKind::Analysis => self.store.fetch_next(false),
        }
    }

    /// Dispatch one task to the worker inside its own worktree and
    /// route the outcome
    async fn run_execution_task(&self, process_id: &str, session: &LoopSession, task: Task) -> TaskRun {
        let claimed = match self.store.mark_in_progress(&task.id) {
            Ok(claimed) => claimed,
            Err(StoreError::AlreadyClaimed(_)) | Err(StoreError::NotFound(_)) => return TaskRun::Lost,
            Err(e) => return TaskRun::Failed(e.to_string()),
        };
        let _ = self.registry.set_current_task(process_id, Some(claimed.id.clone()), None);
        info!(id = %claimed.id, name = %claimed.name, "Dispatching task");

        let worktree = match self.worktrees.create(&claimed.id, &claimed.name).await {
            Ok(info) => info,
            Err(e) => return self.skip(&claimed.id, format!("worktree creation failed: {e}")),
        };

        let context = prompt::task_context(&claimed, &worktree.worktree_path);
        let rendered = prompt::render(&self.config.prompt_template, &context);

        let mut attempts = 0u32;
        loop {
            if self.stop_requested(process_id) {
                // Leave the task in-progress; startup reset reclaims it
                return TaskRun::Stopped;
            }

            let session_id = session.new_worker_session_id();
            let _ = self.registry.set_current_task(
                process_id,
                Some(claimed.id.clone()),
                Some(session_id.clone()),
            );
            let outcome = match self.worker.run(&rendered, &session_id, &worktree.worktree_path).await {
                Ok(outcome) => outcome,
                Err(e) => return self.skip(&claimed.id, format!("worker spawn failed: {e}")),
            };
            self.registry.logs().append_activity(
                process_id,
                &ActivityEntry::info(format!(
                    "worker exited {} after attempt {}",
                    outcome.exit_code,
                    attempts + 1
                ))
                .for_task(&claimed.id),
            );

            let classification = match classify(&outcome) {
                None => return self.land(&claimed).await,
                Some(c) => c,
            };

            if classification.kind == FailureKind::RateLimit {
                // Rate limits consume no retry
                let pause = ratelimit::parse_pause(&outcome.combined_output, Utc::now());
                info!(id = %claimed.id, wait_secs = pause.wait.as_secs(), "Rate limited");
                match ratelimit::wait(&pause, &self.signals, self.config.kind).await {
                    WaitOutcome::Stopped => return TaskRun::Stopped,
                    WaitOutcome::Elapsed => continue,
                }
            }

            if !classification.recoverable {
                let reason = format!("non-recoverable failure: {:?}", classification.kind);
                let _ = self.store.mark_skipped(&claimed.id, &reason);
                return TaskRun::Failed(reason);
            }

            attempts += 1;
            if attempts > self.config.max_retries {
                let reason = format!(
                    "retries exhausted after {attempts} attempts, last failure {:?}",
                    classification.kind
                );
                let _ = self.store.mark_skipped(&claimed.id, &reason);
                return TaskRun::Failed(reason);
            }
            warn!(
                id = %claimed.id,
                kind = ?classification.kind,
                attempt = attempts,
                "Recoverable failure, retrying"
            );
        }
    }

    /// Merge the finished branch and close the task out
    async fn land(&self, task: &Task) -> TaskRun {
        let result = self.worktrees.complete(&task.id).await;
        if result.success {
            // The worker may have marked the task done itself
            let already_done = matches!(
                self.store.get(&task.id),
                Ok(Some(t)) if t.status == TaskStatus::Done
            );
            if !already_done {
                if let Err(e) = self.store.mark_done(&task.id) {
                    return TaskRun::Failed(format!("merge landed but mark_done failed: {e}"));
                }
            }
            info!(id = %task.id, commit = ?result.merge_commit, "Task done");
            return TaskRun::Succeeded;
        }
        if !result.conflict_files.is_empty() {
            return self.skip(
                &task.id,
                format!("merge conflict in: {}", result.conflict_files.join(", ")),
            );
        }
        let reason = format!("merge failed: {}", result.message);
        let _ = self.store.mark_skipped(&task.id, &reason);
        TaskRun::Failed(reason)
    }

    /// Run pre-flight analysis for one task in the main checkout
    async fn run_analysis_task(&self, process_id: &str, session: &LoopSession, task: Task) -> TaskRun {
        let claimed = match self.store.mark_analysing(&task.id) {
            Ok(claimed) => claimed,
            Err(StoreError::AlreadyClaimed(_)) | Err(StoreError::NotFound(_)) => return TaskRun::Lost,
            Err(e) => return TaskRun::Failed(e.to_string()),
        };
        let _ = self.registry.set_current_task(process_id, Some(claimed.id.clone()), None);
        info!(id = %claimed.id, name = %claimed.name, "Analysing task");

        let root = self.worktrees.project_root().to_path_buf();
        let context = prompt::task_context(&claimed, &root);
        let rendered = prompt::render(&self.config.prompt_template, &context);

        let mut attempts = 0u32;
        loop {
            if self.stop_requested(process_id) {
                let _ = self.store.abort_analysing(&claimed.id);
                return TaskRun::Stopped;
            }

            let session_id = session.new_worker_session_id();
            let outcome = match self.worker.run(&rendered, &session_id, &root).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let _ = self.store.abort_analysing(&claimed.id);
                    return TaskRun::Failed(format!("worker spawn failed: {e}"));
                }
            };

            let classification = match classify(&outcome) {
                None => {
                    // Open questions route to the operator
                    if outcome.combined_output.contains("QUESTION:") {
                        self.registry.logs().append_activity(
                            process_id,
                            &ActivityEntry::warn("analysis raised questions").for_task(&claimed.id),
                        );
                        let _ = self.store.mark_needs_input(&claimed.id);
                    } else {
                        let _ = self.store.mark_analysed(&claimed.id);
                    }
                    info!(id = %claimed.id, "Analysis complete");
                    return TaskRun::Succeeded;
                }
                Some(c) => c,
            };

            if classification.kind == FailureKind::RateLimit {
                let pause = ratelimit::parse_pause(&outcome.combined_output, Utc::now());
                match ratelimit::wait(&pause, &self.signals, self.config.kind).await {
                    WaitOutcome::Stopped => {
                        let _ = self.store.abort_analysing(&claimed.id);
                        return TaskRun::Stopped;
                    }
                    WaitOutcome::Elapsed => continue,
                }
            }

            attempts += 1;
            if !classification.recoverable || attempts > self.config.max_retries {
                let _ = self.store.abort_analysing(&claimed.id);
                return TaskRun::Failed(format!("analysis failed: {:?}", classification.kind));
            }
            warn!(id = %claimed.id, kind = ?classification.kind, attempt = attempts, "Analysis retry");
        }
    }

    fn skip(&self, id: &str, reason: String) -> TaskRun {
        if let Err(e) = self.store.mark_skipped(id, &reason) {
            warn!(%id, error = %e, "Failed to record skip");
        }
        TaskRun::Skipped(reason)
    }

    fn clean_scratch(&self) {
        let scratch = &self.config.scratch_dir;
        if scratch.exists() {
            if let Err(e) = fs::remove_dir_all(scratch) {
                warn!(path = %scratch.display(), error = %e, "Failed to clean scratch dir");
            }
        }
        if let Err(e) = fs::create_dir_all(scratch) {
            warn!(path = %scratch.display(), error = %e, "Failed to recreate scratch dir");
        }
    }
}

//! Worker seam: the engine dispatches prompts to an opaque worker
//!
//! The production worker shells out to a coding-agent CLI inside the
//! task's worktree and collects whatever it prints. The engine only
//! ever sees a [`WorkerOutcome`], which keeps the loop testable with a
//! scripted mock.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Context;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// What a worker run produced
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    /// Stdout and stderr, interleaved per stream
    pub combined_output: String,

    /// Worker process exit code; -1 when killed or unknowable
    pub exit_code: i32,

    /// True when the run hit the wall-clock timeout
    pub timed_out: bool,
}

impl WorkerOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Anything that can take a prompt and produce an outcome. Every task
/// gets a fresh `session_id`; workers never resume a prior session.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn run(&self, prompt: &str, session_id: &str, working_dir: &Path)
    -> eyre::Result<WorkerOutcome>;
}

/// Worker that spawns an external agent command with the prompt on
/// stdin. `{{session-id}}` and `{{model}}` placeholders in the
/// configured args are substituted per run.
pub struct CommandWorker {
    program: String,
    args: Vec<String>,
    model: String,
    timeout: Duration,
}

impl CommandWorker {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Worker for CommandWorker {
    async fn run(
        &self,
        prompt: &str,
        session_id: &str,
        working_dir: &Path,
    ) -> eyre::Result<WorkerOutcome> {
        debug!(program = %self.program, %session_id, dir = %working_dir.display(), "CommandWorker::run: called");

        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{{session-id}}", session_id).replace("{{model}}", &self.model))
            .collect();

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn worker '{}'", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to worker stdin")?;
            drop(stdin);
        }

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output.context("Failed to collect worker output")?;
                let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    if !combined.is_empty() {
                        combined.push('\n');
                    }
                    combined.push_str(&stderr);
                }
                Ok(WorkerOutcome {
                    combined_output: combined,
                    exit_code: output.status.code().unwrap_or(-1),
                    timed_out: false,
                })
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Worker timed out, killing");
                // kill_on_drop reaps the child when `child` is dropped here
                Ok(WorkerOutcome {
                    combined_output: String::new(),
                    exit_code: -1,
                    timed_out: true,
                })
            }
        }
    }
}

/// Scripted worker: pops pre-baked outcomes in order and records
/// every prompt it was given. Exists for tests; dispatch goes through
/// the [`Worker`] trait so the engine never knows the difference.
pub struct MockWorker {
    outcomes: std::sync::Mutex<std::collections::VecDeque<WorkerOutcome>>,
    pub prompts: std::sync::Mutex<Vec<String>>,
}

impl MockWorker {
    pub fn new(outcomes: Vec<WorkerOutcome>) -> Self {
        Self {
            outcomes: std::sync::Mutex::new(outcomes.into()),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(vec![])
    }
}

#[async_trait]
impl Worker for MockWorker {
    async fn run(
        &self,
        prompt: &str,
        _session_id: &str,
        _working_dir: &Path,
    ) -> eyre::Result<WorkerOutcome> {
        self.prompts
            .lock()
            .map_err(|_| eyre::eyre!("mock prompt log poisoned"))?
            .push(prompt.to_string());
        let next = self
            .outcomes
            .lock()
            .map_err(|_| eyre::eyre!("mock outcome queue poisoned"))?
            .pop_front();
        Ok(next.unwrap_or(WorkerOutcome {
            combined_output: "done".to_string(),
            exit_code: 0,
            timed_out: false,
        }))
    }
}

//! Directory-partitioned task store
//!
//! One JSON file per task, living in a directory named after its status.
//! A status transition is a `rename` of the file between directories, so
//! whichever process wins the rename owns the transition. There is no
//! locking: `mark_in_progress` claiming via the move is the only thing
//! preventing double dispatch.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::task::{Task, TaskStatus};

/// Tasks stuck in `analysing` are only reclaimed once `updated_at` is
/// this much in the past, so a just-launched worker is never raced.
const ANALYSING_SAFETY_BUFFER_SECS: i64 = 300;

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task already claimed: {0}")]
    AlreadyClaimed(String),

    #[error("Task has no proposed subtasks: {0}")]
    NothingToSplit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed task record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The task store rooted at a directory of status subdirectories
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    /// Open or create a store at the given root, creating every status
    /// directory up front
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        debug!(root = %root.display(), "TaskStore::open: called");

        for status in TaskStatus::all() {
            fs::create_dir_all(root.join(status.dir_name()))?;
        }

        Ok(Self { root })
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding records of the given status
    pub fn status_dir(&self, status: TaskStatus) -> PathBuf {
        self.root.join(status.dir_name())
    }

    fn task_path(&self, status: TaskStatus, id: &str) -> PathBuf {
        self.status_dir(status).join(format!("{}.json", id))
    }

    /// Create a new task record in the directory matching its status
    pub fn create(&self, task: &Task) -> Result<(), StoreError> {
        debug!(id = %task.id, status = %task.status, "TaskStore::create: called");
        let path = self.task_path(task.status, &task.id);
        write_atomic(&path, task)?;
        info!(id = %task.id, name = %task.name, "Task created");
        Ok(())
    }

    /// Find the status directory currently holding a task
    pub fn locate(&self, id: &str) -> Option<(TaskStatus, PathBuf)> {
        for status in TaskStatus::all() {
            let path = self.task_path(status, id);
            if path.exists() {
                return Some((status, path));
            }
        }
        None
    }

    /// Read a task by id, wherever it lives
    pub fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        match self.locate(id) {
            Some((_, path)) => Ok(read_task(&path)),
            None => Ok(None),
        }
    }

    /// List tasks, optionally restricted to one status. Malformed
    /// records are logged and skipped; a scan never fails on them.
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError> {
        let statuses: Vec<TaskStatus> = match status {
            Some(s) => vec![s],
            None => TaskStatus::all().to_vec(),
        };

        let mut tasks = Vec::new();
        for status in statuses {
            tasks.extend(self.scan_dir(status)?);
        }
        tasks.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(tasks)
    }

    fn scan_dir(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let dir = self.status_dir(status);
        let mut tasks = Vec::new();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            // A missing directory between check and read is absence
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(tasks),
            Err(e) => return Err(e.into()),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match read_task(&path) {
                Some(mut task) => {
                    // The directory is authoritative when a crash left
                    // the embedded field behind.
                    task.status = status;
                    tasks.push(task);
                }
                None => {
                    warn!(path = %path.display(), "Skipping unreadable task record");
                }
            }
        }

        Ok(tasks)
    }

    /// Return the next task to dispatch: lowest priority number first,
    /// then oldest. Reads from `analysed` when pre-flight analysis is
    /// enabled, from `todo` otherwise.
    pub fn fetch_next(&self, preflight_analysis: bool) -> Result<Option<Task>, StoreError> {
        let status = if preflight_analysis {
            TaskStatus::Analysed
        } else {
            TaskStatus::Todo
        };
        debug!(%status, "TaskStore::fetch_next: called");
        Ok(self.list(Some(status))?.into_iter().next())
    }

    /// Claim a task by moving its file into `in-progress`. The rename is
    /// the claim: losing the race surfaces as `AlreadyClaimed`.
    pub fn mark_in_progress(&self, id: &str) -> Result<Task, StoreError> {
        debug!(%id, "TaskStore::mark_in_progress: called");
        let (status, src) = self.locate(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if status == TaskStatus::InProgress {
            return Err(StoreError::AlreadyClaimed(id.to_string()));
        }

        let dst = self.task_path(TaskStatus::InProgress, id);
        match fs::rename(&src, &dst) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::AlreadyClaimed(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        // We own the file now; stamp the claim fields in place.
        let mut task = read_task(&dst).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        task.set_status(TaskStatus::InProgress);
        task.started_at = Some(Utc::now());
        write_atomic(&dst, &task)?;

        info!(%id, name = %task.name, "Task claimed");
        Ok(task)
    }

    /// Move a task to `done` and stamp `completed_at`
    pub fn mark_done(&self, id: &str) -> Result<Task, StoreError> {
        debug!(%id, "TaskStore::mark_done: called");
        self.transition(id, TaskStatus::Done, |task| {
            task.completed_at = Some(Utc::now());
        })
    }

    /// Move a task to `cancelled`
    pub fn mark_cancelled(&self, id: &str) -> Result<Task, StoreError> {
        debug!(%id, "TaskStore::mark_cancelled: called");
        self.transition(id, TaskStatus::Cancelled, |_| {})
    }

    /// Record a skip and return the task to `todo`, history preserved
    pub fn mark_skipped(&self, id: &str, reason: &str) -> Result<Task, StoreError> {
        debug!(%id, %reason, "TaskStore::mark_skipped: called");
        let reason = reason.to_string();
        let task = self.transition(id, TaskStatus::Todo, move |task| {
            task.skip_history.push(crate::task::SkipEntry {
                reason,
                at: Utc::now(),
            });
            task.started_at = None;
        })?;
        info!(%id, "Task skipped back to todo");
        Ok(task)
    }

    /// Move a task to `needs-input` (analysis raised questions),
    /// closing the open session
    pub fn mark_needs_input(&self, id: &str) -> Result<Task, StoreError> {
        self.transition(id, TaskStatus::NeedsInput, |task| {
            task.close_analysis_sessions();
        })
    }

    /// Move a task to `analysed`, closing the open session
    pub fn mark_analysed(&self, id: &str) -> Result<Task, StoreError> {
        self.transition(id, TaskStatus::Analysed, |task| {
            task.close_analysis_sessions();
        })
    }

    /// Move a task to `analysing` and open an analysis session
    pub fn mark_analysing(&self, id: &str) -> Result<Task, StoreError> {
        self.transition(id, TaskStatus::Analysing, |task| {
            task.analysis_sessions.push(crate::task::AnalysisSession {
                started_at: Utc::now(),
                ended_at: None,
            });
        })
    }

    /// Return a single `analysing` task to `todo`, closing its open
    /// session (analysis failed or was abandoned)
    pub fn abort_analysing(&self, id: &str) -> Result<Task, StoreError> {
        debug!(%id, "TaskStore::abort_analysing: called");
        self.transition(id, TaskStatus::Todo, |task| {
            task.close_analysis_sessions();
        })
    }

    /// Approve replacing a task with its proposed subtasks. Each
    /// proposal becomes a fresh `todo` record inheriting the parent's
    /// priority, category, and dependencies; the parent is cancelled
    /// with the proposals kept on its record for audit.
    pub fn approve_split(&self, id: &str) -> Result<Vec<Task>, StoreError> {
        debug!(%id, "TaskStore::approve_split: called");
        let parent = self.get(id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if parent.proposed_subtasks.is_empty() {
            return Err(StoreError::NothingToSplit(id.to_string()));
        }

        let mut subtasks = Vec::with_capacity(parent.proposed_subtasks.len());
        for proposal in &parent.proposed_subtasks {
            let mut subtask =
                Task::new(&proposal.name, &proposal.description).with_priority(parent.priority);
            subtask.category = parent.category.clone();
            subtask.dependencies = parent.dependencies.clone();
            self.create(&subtask)?;
            subtasks.push(subtask);
        }

        self.transition(id, TaskStatus::Cancelled, |task| {
            task.close_analysis_sessions();
        })?;
        info!(%id, count = subtasks.len(), "Task split into subtasks");
        Ok(subtasks)
    }

    /// Record an operator's answer; the task leaves `needs-input` once
    /// answered
    pub fn answer_question(&self, id: &str, question: &str, answer: &str) -> Result<Task, StoreError> {
        debug!(%id, "TaskStore::answer_question: called");
        let (status, path) = self.locate(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut task = read_task(&path).ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        task.questions_resolved.push(crate::task::ResolvedQuestion {
            question: question.to_string(),
            answer: answer.to_string(),
        });
        task.touch();
        write_atomic(&path, &task)?;

        if status == TaskStatus::NeedsInput {
            return self.transition(id, TaskStatus::Analysed, |_| {});
        }
        Ok(task)
    }

    /// Startup sweep: every `in-progress` task goes back to `analysed`
    /// (if it carries analysis data) or `todo`, with `started_at`
    /// cleared. Safe to run repeatedly.
    pub fn reset_in_progress(&self) -> Result<usize, StoreError> {
        debug!("TaskStore::reset_in_progress: called");
        let mut reset = 0;

        for task in self.scan_dir(TaskStatus::InProgress)? {
            let target = if task.has_analysis_data() {
                TaskStatus::Analysed
            } else {
                TaskStatus::Todo
            };
            warn!(id = %task.id, %target, "Returning interrupted in-progress task");
            self.transition(&task.id, target, |t| {
                t.started_at = None;
            })?;
            reset += 1;
        }

        if reset > 0 {
            info!(reset, "reset_in_progress complete");
        }
        Ok(reset)
    }

    /// Reconcile tasks stuck in `analysing`. A task is orphaned iff no
    /// live process claims it AND its `updated_at` is older than the
    /// 5-minute safety buffer. Orphans return to `todo` with open
    /// analysis sessions closed; audit fields are untouched.
    pub fn reset_analysing(&self, live_claimed_ids: &HashSet<String>) -> Result<usize, StoreError> {
        debug!(claimed = live_claimed_ids.len(), "TaskStore::reset_analysing: called");
        let cutoff = Utc::now() - Duration::seconds(ANALYSING_SAFETY_BUFFER_SECS);
        let mut reset = 0;

        for task in self.scan_dir(TaskStatus::Analysing)? {
            if live_claimed_ids.contains(&task.id) {
                debug!(id = %task.id, "reset_analysing: claimed by a live process");
                continue;
            }
            if task.updated_at > cutoff {
                debug!(id = %task.id, "reset_analysing: inside safety buffer");
                continue;
            }
            warn!(id = %task.id, "Returning orphaned analysing task to todo");
            self.transition(&task.id, TaskStatus::Todo, |t| {
                t.close_analysis_sessions();
            })?;
            reset += 1;
        }

        if reset > 0 {
            info!(reset, "reset_analysing complete");
        }
        Ok(reset)
    }

    /// Move a task between status directories and apply a record edit.
    /// The rename happens first so the transition is owned before the
    /// fields are rewritten.
    fn transition<F>(&self, id: &str, to: TaskStatus, edit: F) -> Result<Task, StoreError>
    where
        F: FnOnce(&mut Task),
    {
        let (from, src) = self.locate(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let dst = self.task_path(to, id);

        if src != dst {
            match fs::rename(&src, &dst) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StoreError::NotFound(id.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut task = read_task(&dst).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        task.set_status(to);
        edit(&mut task);
        write_atomic(&dst, &task)?;

        debug!(%id, %from, %to, "Task transitioned");
        Ok(task)
    }
}

/// Read a task record, treating disappearance or corruption as absence
fn read_task(path: &Path) -> Option<Task> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(task) => Some(task),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed task record");
            None
        }
    }
}

/// Write via temp file + atomic rename so readers never see a torn record
fn write_atomic(path: &Path, task: &Task) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(task)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &Path) -> TaskStore {
        TaskStore::open(dir).unwrap()
    }

    #[test]
    fn test_create_places_record_in_status_dir() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        let task = Task::with_id("abc123", "First", "desc");
        store.create(&task).unwrap();

        assert!(temp.path().join("todo/abc123.json").exists());
    }

    #[test]
    fn test_record_exists_in_exactly_one_status_dir() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        store.create(&Task::with_id("abc123", "First", "d")).unwrap();
        store.mark_in_progress("abc123").unwrap();
        store.mark_done("abc123").unwrap();

        let mut found = 0;
        for status in TaskStatus::all() {
            if temp.path().join(status.dir_name()).join("abc123.json").exists() {
                found += 1;
                assert_eq!(status, TaskStatus::Done);
            }
        }
        assert_eq!(found, 1);
    }

    #[test]
    fn test_fetch_next_prefers_lower_priority_number() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        store
            .create(&Task::with_id("low", "Low urgency", "d").with_priority(3))
            .unwrap();
        store
            .create(&Task::with_id("urgent", "Urgent", "d").with_priority(1))
            .unwrap();

        let next = store.fetch_next(false).unwrap().unwrap();
        assert_eq!(next.id, "urgent");
    }

    #[test]
    fn test_fetch_next_reads_analysed_when_preflight_enabled() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        store.create(&Task::with_id("t1", "Todo task", "d")).unwrap();
        let mut analysed = Task::with_id("a1", "Analysed task", "d");
        analysed.status = TaskStatus::Analysed;
        store.create(&analysed).unwrap();

        assert_eq!(store.fetch_next(false).unwrap().unwrap().id, "t1");
        assert_eq!(store.fetch_next(true).unwrap().unwrap().id, "a1");
    }

    #[test]
    fn test_mark_in_progress_moves_file_and_stamps_started_at() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        store.create(&Task::with_id("abc123", "t", "d").with_priority(5)).unwrap();
        let claimed = store.mark_in_progress("abc123").unwrap();

        assert_eq!(claimed.status, TaskStatus::InProgress);
        assert!(claimed.started_at.is_some());
        assert!(!temp.path().join("todo/abc123.json").exists());
        assert!(temp.path().join("in-progress/abc123.json").exists());
    }

    #[test]
    fn test_double_claim_fails() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        store.create(&Task::with_id("abc123", "t", "d")).unwrap();
        store.mark_in_progress("abc123").unwrap();

        let second = store.mark_in_progress("abc123");
        assert!(matches!(second, Err(StoreError::AlreadyClaimed(_))));
    }

    #[test]
    fn test_mark_skipped_appends_history_and_returns_to_todo() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        store.create(&Task::with_id("abc123", "t", "d")).unwrap();
        store.mark_in_progress("abc123").unwrap();
        let skipped = store.mark_skipped("abc123", "compile error").unwrap();

        assert_eq!(skipped.status, TaskStatus::Todo);
        assert_eq!(skipped.skip_history.len(), 1);
        assert_eq!(skipped.skip_history[0].reason, "compile error");
        assert!(skipped.started_at.is_none());
        assert!(temp.path().join("todo/abc123.json").exists());
    }

    #[test]
    fn test_reset_in_progress_is_idempotent() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        store.create(&Task::with_id("plain", "t", "d")).unwrap();
        store.mark_in_progress("plain").unwrap();

        let mut analysed = Task::with_id("smart", "t", "d");
        analysed.questions_resolved.push(crate::task::ResolvedQuestion {
            question: "q".into(),
            answer: "a".into(),
        });
        store.create(&analysed).unwrap();
        store.mark_in_progress("smart").unwrap();

        assert_eq!(store.reset_in_progress().unwrap(), 2);

        let plain = store.get("plain").unwrap().unwrap();
        assert_eq!(plain.status, TaskStatus::Todo);
        assert!(plain.started_at.is_none());

        let smart = store.get("smart").unwrap().unwrap();
        assert_eq!(smart.status, TaskStatus::Analysed);

        // Second run with no intervening dispatch finds nothing
        assert_eq!(store.reset_in_progress().unwrap(), 0);
        assert_eq!(store.get("plain").unwrap().unwrap().status, TaskStatus::Todo);
    }

    #[test]
    fn test_reset_analysing_respects_live_claims_and_buffer() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        // Recent task: inside the safety buffer, untouched either way
        let mut recent = Task::with_id("recent", "t", "d");
        recent.status = TaskStatus::Analysing;
        store.create(&recent).unwrap();

        // Stale unclaimed task: orphaned
        let mut stale = Task::with_id("stale", "t", "d");
        stale.status = TaskStatus::Analysing;
        stale.analysis_sessions.push(crate::task::AnalysisSession {
            started_at: Utc::now() - Duration::minutes(20),
            ended_at: None,
        });
        stale.updated_at = Utc::now() - Duration::minutes(10);
        store.create(&stale).unwrap();

        // Stale but claimed by a live process: untouched
        let mut claimed = Task::with_id("claimed", "t", "d");
        claimed.status = TaskStatus::Analysing;
        claimed.updated_at = Utc::now() - Duration::minutes(10);
        store.create(&claimed).unwrap();

        let live: HashSet<String> = ["claimed".to_string()].into_iter().collect();
        let reset = store.reset_analysing(&live).unwrap();
        assert_eq!(reset, 1);

        assert_eq!(store.get("recent").unwrap().unwrap().status, TaskStatus::Analysing);
        assert_eq!(store.get("claimed").unwrap().unwrap().status, TaskStatus::Analysing);

        let stale = store.get("stale").unwrap().unwrap();
        assert_eq!(stale.status, TaskStatus::Todo);
        assert!(!stale.has_open_analysis_session());
        assert_eq!(stale.analysis_sessions.len(), 1);
    }

    #[test]
    fn test_malformed_record_is_skipped_not_fatal() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        store.create(&Task::with_id("good", "t", "d")).unwrap();
        fs::write(temp.path().join("todo/bad.json"), "{not json").unwrap();

        let tasks = store.list(Some(TaskStatus::Todo)).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "good");
    }

    #[test]
    fn test_answer_question_moves_needs_input_to_analysed() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        let mut task = Task::with_id("abc123", "t", "d");
        task.status = TaskStatus::NeedsInput;
        store.create(&task).unwrap();

        let answered = store.answer_question("abc123", "Which DB?", "Postgres").unwrap();
        assert_eq!(answered.status, TaskStatus::Analysed);
        assert_eq!(answered.questions_resolved.len(), 1);
    }

    #[test]
    fn test_analysis_lifecycle_opens_and_closes_sessions() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());
        store.create(&Task::with_id("abc123", "t", "d")).unwrap();

        let claimed = store.mark_analysing("abc123").unwrap();
        assert!(claimed.has_open_analysis_session());

        let analysed = store.mark_analysed("abc123").unwrap();
        assert_eq!(analysed.status, TaskStatus::Analysed);
        assert!(!analysed.has_open_analysis_session());
        assert_eq!(analysed.analysis_sessions.len(), 1);
    }

    #[test]
    fn test_abort_analysing_returns_task_to_todo() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());
        store.create(&Task::with_id("abc123", "t", "d")).unwrap();
        store.mark_analysing("abc123").unwrap();

        let aborted = store.abort_analysing("abc123").unwrap();
        assert_eq!(aborted.status, TaskStatus::Todo);
        assert!(!aborted.has_open_analysis_session());
        assert!(temp.path().join("todo/abc123.json").exists());
    }

    #[test]
    fn test_approve_split_replaces_parent_with_subtasks() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        let mut parent = Task::with_id("parent1234567890", "Big task", "d").with_priority(2);
        parent.category = "feature".to_string();
        parent.status = TaskStatus::NeedsInput;
        parent.proposed_subtasks = vec![
            crate::task::SubtaskProposal {
                name: "First half".into(),
                description: "d1".into(),
            },
            crate::task::SubtaskProposal {
                name: "Second half".into(),
                description: "d2".into(),
            },
        ];
        store.create(&parent).unwrap();

        let subtasks = store.approve_split("parent1234567890").unwrap();
        assert_eq!(subtasks.len(), 2);
        for subtask in &subtasks {
            let stored = store.get(&subtask.id).unwrap().unwrap();
            assert_eq!(stored.status, TaskStatus::Todo);
            assert_eq!(stored.priority, 2);
            assert_eq!(stored.category, "feature");
        }

        let parent = store.get("parent1234567890").unwrap().unwrap();
        assert_eq!(parent.status, TaskStatus::Cancelled);
        // Proposals stay on the cancelled record for audit
        assert_eq!(parent.proposed_subtasks.len(), 2);
    }

    #[test]
    fn test_approve_split_without_proposals_fails() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());
        store.create(&Task::with_id("abc123", "t", "d")).unwrap();

        let err = store.approve_split("abc123").unwrap_err();
        assert!(matches!(err, StoreError::NothingToSplit(_)));
        assert_eq!(store.get("abc123").unwrap().unwrap().status, TaskStatus::Todo);
    }

    proptest::proptest! {
        // Filesystem-backed, so keep the case count modest
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

        #[test]
        fn prop_fetch_next_returns_lowest_priority_first(priorities in proptest::collection::vec(1u32..=9, 1..8)) {
            let temp = tempdir().unwrap();
            let store = open_store(temp.path());
            for (i, priority) in priorities.iter().enumerate() {
                let task = Task::with_id(format!("task{i:012}"), "t", "d").with_priority(*priority);
                store.create(&task).unwrap();
            }

            let next = store.fetch_next(false).unwrap().unwrap();
            proptest::prop_assert_eq!(next.priority, *priorities.iter().min().unwrap());
        }
    }

    #[test]
    fn test_happy_path_scenario() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path());

        store
            .create(&Task::with_id("abc123", "Fix login", "d").with_priority(5))
            .unwrap();

        let next = store.fetch_next(false).unwrap().unwrap();
        assert_eq!(next.id, "abc123");

        let claimed = store.mark_in_progress("abc123").unwrap();
        assert!(claimed.started_at.is_some());
        assert!(temp.path().join("in-progress/abc123.json").exists());

        let done = store.mark_done("abc123").unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert!(done.completed_at.is_some());
        assert!(temp.path().join("done/abc123.json").exists());
    }
}

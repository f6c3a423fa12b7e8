//! Completing a task: rebase the task branch, squash-merge it into the
//! base branch, tear the worktree down.
//!
//! Merge conflicts are data here, not errors. Every failure mode comes
//! back as a structured [`CompleteResult`] so the caller can route the
//! task (retry, skip, needs-input) instead of unwinding.

use serde::Serialize;
use tracing::{debug, info, warn};

use queuestore::short_id;

use super::manager::{WorktreeManager, git};

/// Outcome of merging a finished task back into the base branch
#[derive(Debug, Clone, Serialize)]
pub struct CompleteResult {
    /// True only when the branch landed (or had nothing to land)
    pub success: bool,

    /// Commit hash of the squash commit, when one was made
    pub merge_commit: Option<String>,

    /// Conflicting paths when the rebase hit a conflict
    pub conflict_files: Vec<String>,

    /// Human-readable account of what happened
    pub message: String,
}

impl CompleteResult {
    fn ok(merge_commit: Option<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            merge_commit,
            conflict_files: Vec::new(),
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            merge_commit: None,
            conflict_files: Vec::new(),
            message: message.into(),
        }
    }

    fn conflict(files: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            merge_commit: None,
            conflict_files: files,
            message: message.into(),
        }
    }
}

impl WorktreeManager {
    /// Merge a task's branch into the base branch and tear down its
    /// worktree. Never propagates a raw git failure: the result
    /// carries the outcome either way.
    pub async fn complete(&self, task_id: &str) -> CompleteResult {
        debug!(%task_id, "WorktreeManager::complete: called");

        let entry = match self.entry(task_id) {
            Some(entry) => entry,
            None => return CompleteResult::fail(format!("No worktree registered for task {task_id}")),
        };
        let root = self.config.project_root.clone();
        let base = self.config.base_branch.clone();

        // Base branch must be checked out in the main clone before we
        // can merge into it
        let checkout = match git(&root, &["checkout", &base]).await {
            Ok(out) => out,
            Err(e) => return CompleteResult::fail(e.to_string()),
        };
        if !checkout.success {
            return CompleteResult::fail(format!("Failed to checkout {base}: {}", checkout.message));
        }

        // Rebase the task branch onto the current base so the squash
        // merge is a fast-forward in content terms
        let rebase = match git(&entry.worktree_path, &["rebase", &base]).await {
            Ok(out) => out,
            Err(e) => return CompleteResult::fail(e.to_string()),
        };
        if !rebase.success {
            let files = conflicted_files(&entry.worktree_path).await;
            if let Ok(abort) = git(&entry.worktree_path, &["rebase", "--abort"]).await {
                if !abort.success {
                    warn!(%task_id, message = %abort.message, "Rebase abort failed");
                }
            }
            info!(%task_id, conflicts = files.len(), "Rebase conflict, branch left intact");
            return CompleteResult::conflict(
                files,
                format!("Rebase onto {base} conflicted: {}", rebase.message),
            );
        }

        let merge = match git(&root, &["merge", "--squash", &entry.branch_name]).await {
            Ok(out) => out,
            Err(e) => return CompleteResult::fail(e.to_string()),
        };
        if !merge.success {
            let _ = git(&root, &["merge", "--abort"]).await;
            let _ = git(&root, &["reset", "--hard", "HEAD"]).await;
            return CompleteResult::fail(format!("Squash merge failed: {}", merge.message));
        }

        // `diff --cached --quiet` exits nonzero when something is staged.
        // A branch whose changes already landed leaves nothing behind and
        // still counts as success.
        let staged = match git(&root, &["diff", "--cached", "--quiet"]).await {
            Ok(out) => !out.success,
            Err(e) => return CompleteResult::fail(e.to_string()),
        };

        let merge_commit = if staged {
            let subject = format!("Task: {} ({})", entry.task_name, short_id(task_id));
            let commit = match git(&root, &["commit", "-m", &subject]).await {
                Ok(out) => out,
                Err(e) => return CompleteResult::fail(e.to_string()),
            };
            if !commit.success {
                return CompleteResult::fail(format!("Commit failed: {}", commit.message));
            }
            match git(&root, &["rev-parse", "HEAD"]).await {
                Ok(out) if out.success => Some(out.stdout),
                _ => None,
            }
        } else {
            debug!(%task_id, "complete: nothing to commit, branch already merged");
            None
        };

        // Teardown failures do not un-merge the work
        if let Err(e) = self.remove(task_id).await {
            warn!(%task_id, error = %e, "Merged but worktree teardown failed");
            return CompleteResult::ok(
                merge_commit,
                format!("Merged, but worktree cleanup failed: {e}"),
            );
        }

        info!(%task_id, ?merge_commit, "Task branch merged");
        match &merge_commit {
            Some(hash) => CompleteResult::ok(merge_commit.clone(), format!("Squash-merged as {hash}")),
            None => CompleteResult::ok(None, "No changes to merge".to_string()),
        }
    }
}

/// Unmerged paths in a conflicted tree
async fn conflicted_files(dir: &std::path::Path) -> Vec<String> {
    match git(dir, &["diff", "--name-only", "--diff-filter=U"]).await {
        Ok(out) if out.success => out
            .stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

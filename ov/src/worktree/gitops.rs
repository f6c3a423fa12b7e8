//! Repo-level git operations outside any single worktree

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use super::manager::{WorktreeError, git};

/// Snapshot of a checkout's git state
#[derive(Debug, Clone, Serialize)]
pub struct RepoStatus {
    pub branch: String,
    pub dirty_files: Vec<String>,
    pub ahead: u32,
    pub behind: u32,
}

impl RepoStatus {
    pub fn is_clean(&self) -> bool {
        self.dirty_files.is_empty()
    }
}

/// Current branch, dirty files, and divergence from upstream
pub async fn status(dir: &Path) -> Result<RepoStatus, WorktreeError> {
    debug!(dir = %dir.display(), "gitops::status: called");

    let branch = git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
    if !branch.success {
        return Err(WorktreeError::GitError(branch.message));
    }

    let porcelain = git(dir, &["status", "--porcelain"]).await?;
    let dirty_files = porcelain
        .stdout
        .lines()
        .filter_map(|l| l.get(3..))
        .map(|p| p.to_string())
        .collect();

    // No upstream reads as no divergence
    let (ahead, behind) = match git(dir, &["rev-list", "--left-right", "--count", "HEAD...@{upstream}"]).await {
        Ok(out) if out.success => {
            let mut parts = out.stdout.split_whitespace();
            let ahead = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let behind = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            (ahead, behind)
        }
        _ => (0, 0),
    };

    Ok(RepoStatus {
        branch: branch.stdout,
        dirty_files,
        ahead,
        behind,
    })
}

/// Stage everything, commit with the given message, push the current
/// branch. A clean tree commits nothing but still pushes.
pub async fn commit_and_push(dir: &Path, message: &str) -> Result<String, WorktreeError> {
    debug!(dir = %dir.display(), "gitops::commit_and_push: called");

    let add = git(dir, &["add", "-A"]).await?;
    if !add.success {
        return Err(WorktreeError::GitError(add.message));
    }

    let staged = git(dir, &["diff", "--cached", "--quiet"]).await?;
    if !staged.success {
        let commit = git(dir, &["commit", "-m", message]).await?;
        if !commit.success {
            return Err(WorktreeError::GitError(commit.message));
        }
        info!(%message, "Committed local changes");
    }

    let push = git(dir, &["push"]).await?;
    if !push.success {
        return Err(WorktreeError::GitError(push.message));
    }

    let head = git(dir, &["rev-parse", "HEAD"]).await?;
    Ok(head.stdout)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::super::manager::tests::setup_git_repo;
    use super::*;

    #[tokio::test]
    async fn test_status_reports_branch_and_dirty_files() {
        let repo = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let clean = status(repo.path()).await.unwrap();
        assert_eq!(clean.branch, "main");
        assert!(clean.is_clean());

        fs::write(repo.path().join("new.txt"), "x").unwrap();
        let dirty = status(repo.path()).await.unwrap();
        assert_eq!(dirty.dirty_files, vec!["new.txt".to_string()]);
    }
}

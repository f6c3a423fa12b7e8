//! Worktree manager: one branch + worktree per task
//!
//! Worktrees are siblings of the main checkout, never inside it. Each
//! one gets two junction mounts (symlinks) so the task queue and
//! control plane are shared state, not copies, plus a bounded copy of
//! gitignored files the build needs. The task-id-to-worktree mapping
//! lives in a single JSON file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use queuestore::{TaskStore, short_id};

/// Maximum slug length in branch names
const SLUG_MAX_LEN: usize = 50;

/// Error types for worktree operations
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("Failed to create worktree: {0}")]
    CreateFailed(String),

    #[error("Failed to remove worktree: {0}")]
    RemoveFailed(String),

    #[error("Worktree not found for task: {0}")]
    NotFound(String),

    #[error("Git command failed: {0}")]
    GitError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed worktree map: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Configuration for the worktree manager
#[derive(Debug, Clone)]
pub struct WorktreeConfig {
    /// The main checkout
    pub project_root: PathBuf,

    /// Directory holding worktrees and the map file, outside the checkout
    pub shared_root: PathBuf,

    /// Branch worktree branches are created from and merged back into
    pub base_branch: String,

    /// Task queue directory, junction-mounted into each worktree
    pub queue_dir: PathBuf,

    /// Control-plane directory, junction-mounted into each worktree
    pub control_dir: PathBuf,

    /// Mount point of the queue inside a worktree, relative
    pub queue_mount: PathBuf,

    /// Mount point of the control plane inside a worktree, relative
    pub control_mount: PathBuf,

    /// Gitignored-but-needed files copied into each new worktree
    pub copy_files: Vec<String>,

    /// Path segments never copied (large regenerable directories)
    pub deny_dirs: Vec<String>,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            shared_root: PathBuf::from("../overseer-worktrees"),
            base_branch: "main".to_string(),
            queue_dir: PathBuf::from(".overseer/queue"),
            control_dir: PathBuf::from(".overseer/control"),
            queue_mount: PathBuf::from(".overseer/queue"),
            control_mount: PathBuf::from(".overseer/control"),
            copy_files: vec![".env".to_string()],
            deny_dirs: vec![
                "node_modules".to_string(),
                "target".to_string(),
                "dist".to_string(),
                ".git".to_string(),
            ],
        }
    }
}

/// One registered worktree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeEntry {
    pub worktree_path: PathBuf,
    pub branch_name: String,
    pub task_name: String,
    pub created_at: DateTime<Utc>,
}

/// Result of creating a worktree
#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub worktree_path: PathBuf,
    pub branch_name: String,
}

/// Manager for per-task git worktrees
pub struct WorktreeManager {
    pub(crate) config: WorktreeConfig,
}

/// Lower-case, collapse runs of non-alphanumerics to single dashes,
/// trim dashes, cap the length. Pure: same name, same slug.
pub fn slugify(name: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= SLUG_MAX_LEN {
            break;
        }
    }
    slug.truncate(SLUG_MAX_LEN);
    slug.trim_matches('-').to_string()
}

/// Deterministic branch name for a task: `task/<8-char id>-<slug>`
pub fn branch_name(task_id: &str, task_name: &str) -> String {
    format!("task/{}-{}", short_id(task_id), slugify(task_name))
}

impl WorktreeManager {
    /// Create a new worktree manager
    pub fn new(config: WorktreeConfig) -> Self {
        debug!(?config.project_root, ?config.shared_root, "WorktreeManager::new: called");
        Self { config }
    }

    /// The main checkout this manager branches from
    pub fn project_root(&self) -> &Path {
        &self.config.project_root
    }

    fn map_path(&self) -> PathBuf {
        self.config.shared_root.join("worktrees.json")
    }

    /// Load the task-id-to-worktree map. A torn or missing file reads
    /// as empty.
    pub fn load_map(&self) -> HashMap<String, WorktreeEntry> {
        match fs::read_to_string(self.map_path()) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(e) => {
                    warn!(error = %e, "Malformed worktree map, treating as empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        }
    }

    fn save_map(&self, map: &HashMap<String, WorktreeEntry>) -> Result<(), WorktreeError> {
        fs::create_dir_all(&self.config.shared_root)?;
        let path = self.map_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(map)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Registered entry for a task
    pub fn entry(&self, task_id: &str) -> Option<WorktreeEntry> {
        self.load_map().get(task_id).cloned()
    }

    /// Create branch and worktree for a task. Idempotent: an existing
    /// registered path is returned as-is.
    pub async fn create(&self, task_id: &str, task_name: &str) -> Result<WorktreeInfo, WorktreeError> {
        debug!(%task_id, %task_name, "WorktreeManager::create: called");

        let branch = branch_name(task_id, task_name);
        let dir_name = format!("{}-{}", short_id(task_id), slugify(task_name));
        let worktree_path = self.config.shared_root.join(dir_name);

        let mut map = self.load_map();
        if let Some(entry) = map.get(task_id) {
            if entry.worktree_path.exists() {
                debug!(%task_id, "WorktreeManager::create: worktree already exists");
                return Ok(WorktreeInfo {
                    worktree_path: entry.worktree_path.clone(),
                    branch_name: entry.branch_name.clone(),
                });
            }
        }

        fs::create_dir_all(&self.config.shared_root)?;

        // Branch from the base branch; if the branch survived an
        // interrupted prior run, attach it instead.
        let created = git(
            &self.config.project_root,
            &[
                "worktree",
                "add",
                &worktree_path.to_string_lossy(),
                "-b",
                &branch,
                &self.config.base_branch,
            ],
        )
        .await?;

        if !created.success {
            debug!(%branch, "WorktreeManager::create: branch creation failed, attaching existing branch");
            let attached = git(
                &self.config.project_root,
                &["worktree", "add", &worktree_path.to_string_lossy(), &branch],
            )
            .await?;
            if !attached.success {
                return Err(WorktreeError::CreateFailed(attached.message));
            }
        }

        self.mount_junctions(&worktree_path)?;
        self.copy_ignored_files(&worktree_path);

        map.insert(
            task_id.to_string(),
            WorktreeEntry {
                worktree_path: worktree_path.clone(),
                branch_name: branch.clone(),
                task_name: task_name.to_string(),
                created_at: Utc::now(),
            },
        );
        self.save_map(&map)?;

        info!(%task_id, path = %worktree_path.display(), %branch, "Worktree created");
        Ok(WorktreeInfo {
            worktree_path,
            branch_name: branch,
        })
    }

    /// Establish the two junction mounts inside a worktree. Any tracked
    /// placeholder at the queue mount point is replaced by the link.
    fn mount_junctions(&self, worktree_path: &Path) -> Result<(), WorktreeError> {
        let mounts = [
            (&self.config.queue_dir, &self.config.queue_mount),
            (&self.config.control_dir, &self.config.control_mount),
        ];
        for (shared, mount) in mounts {
            let target = worktree_path.join(mount);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            if target.exists() || target.is_symlink() {
                // Tracked placeholder files would shadow the shared state
                if target.is_dir() && !target.is_symlink() {
                    fs::remove_dir_all(&target)?;
                } else {
                    fs::remove_file(&target)?;
                }
            }
            let source = absolutize(shared);
            make_junction(&source, &target)?;
            debug!(source = %source.display(), target = %target.display(), "Junction mounted");
        }
        Ok(())
    }

    /// Remove the junction mounts. Must run before removing the
    /// worktree so removal never recurses into shared state.
    pub(crate) fn unmount_junctions(&self, worktree_path: &Path) {
        for mount in [&self.config.queue_mount, &self.config.control_mount] {
            let target = worktree_path.join(mount);
            if target.is_symlink() {
                if let Err(e) = remove_junction(&target) {
                    warn!(target = %target.display(), error = %e, "Failed to remove junction");
                }
            }
        }
    }

    /// Copy the allow-listed gitignored files into the worktree,
    /// refusing any path with a denylisted segment
    fn copy_ignored_files(&self, worktree_path: &Path) {
        for name in &self.config.copy_files {
            let source = self.config.project_root.join(name);
            if !source.exists() {
                continue;
            }
            if source.is_dir() {
                for entry in walkdir::WalkDir::new(&source).into_iter().flatten() {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = match entry.path().strip_prefix(&self.config.project_root) {
                        Ok(rel) => rel,
                        Err(_) => continue,
                    };
                    if self.denied(rel) {
                        continue;
                    }
                    let dest = worktree_path.join(rel);
                    if let Some(parent) = dest.parent() {
                        let _ = fs::create_dir_all(parent);
                    }
                    if let Err(e) = fs::copy(entry.path(), &dest) {
                        warn!(path = %entry.path().display(), error = %e, "Failed to copy ignored file");
                    }
                }
            } else if !self.denied(Path::new(name)) {
                let dest = worktree_path.join(name);
                if let Some(parent) = dest.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                if let Err(e) = fs::copy(&source, &dest) {
                    warn!(%name, error = %e, "Failed to copy ignored file");
                }
            }
        }
    }

    /// True when any path segment matches the denylist
    fn denied(&self, rel: &Path) -> bool {
        rel.components().any(|c| {
            let segment = c.as_os_str().to_string_lossy();
            self.config.deny_dirs.iter().any(|d| d == segment.as_ref())
        })
    }

    /// Tear down worktree, branch, junctions, and mapping for a task
    pub async fn remove(&self, task_id: &str) -> Result<(), WorktreeError> {
        debug!(%task_id, "WorktreeManager::remove: called");
        let mut map = self.load_map();
        let entry = match map.remove(task_id) {
            Some(entry) => entry,
            None => return Err(WorktreeError::NotFound(task_id.to_string())),
        };

        // Junctions first so worktree removal never touches shared state
        self.unmount_junctions(&entry.worktree_path);

        if entry.worktree_path.exists() {
            let removed = git(
                &self.config.project_root,
                &["worktree", "remove", &entry.worktree_path.to_string_lossy(), "--force"],
            )
            .await?;
            if !removed.success && !removed.message.contains("is not a working tree") {
                // Put the entry back; a half-removed worktree should stay visible
                map.insert(task_id.to_string(), entry);
                self.save_map(&map)?;
                return Err(WorktreeError::RemoveFailed(removed.message));
            }
        }

        let _ = git(&self.config.project_root, &["branch", "-D", &entry.branch_name]).await;
        self.save_map(&map)?;

        info!(%task_id, branch = %entry.branch_name, "Worktree removed");
        Ok(())
    }

    /// Startup reconciliation: tear down every registered worktree whose
    /// task is no longer in an active status (or is missing entirely).
    /// Active-status tasks are never touched.
    pub async fn reconcile_orphans(&self, store: &TaskStore) -> Result<usize, WorktreeError> {
        debug!("WorktreeManager::reconcile_orphans: called");
        let map = self.load_map();
        let mut cleaned = 0;

        for (task_id, entry) in map {
            let active = match store.get(&task_id) {
                Ok(Some(task)) => task.status.is_active(),
                Ok(None) => false,
                Err(e) => {
                    warn!(%task_id, error = %e, "Skipping reconcile for unreadable task");
                    continue;
                }
            };
            if active {
                debug!(%task_id, "reconcile_orphans: task still active");
                continue;
            }
            info!(%task_id, branch = %entry.branch_name, "Reconciling orphaned worktree");
            match self.remove(&task_id).await {
                Ok(()) => cleaned += 1,
                Err(e) => warn!(%task_id, error = %e, "Failed to reconcile orphaned worktree"),
            }
        }

        if cleaned > 0 {
            info!(cleaned, "Orphan reconciliation complete");
        }
        Ok(cleaned)
    }
}

/// Outcome of one git command: success flag plus whichever stream said
/// something useful
pub(crate) struct GitOutcome {
    pub success: bool,
    pub stdout: String,
    pub message: String,
}

/// Run a git command, mapping spawn failure to a structured error
pub(crate) async fn git(dir: &Path, args: &[&str]) -> Result<GitOutcome, WorktreeError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| WorktreeError::GitError(format!("git {}: {}", args.join(" "), e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Ok(GitOutcome {
        success: output.status.success(),
        message: if stderr.is_empty() { stdout.clone() } else { stderr },
        stdout,
    })
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(path)
    }
}

#[cfg(unix)]
fn make_junction(source: &Path, target: &Path) -> Result<(), WorktreeError> {
    std::os::unix::fs::symlink(source, target).map_err(WorktreeError::Io)
}

#[cfg(windows)]
fn make_junction(source: &Path, target: &Path) -> Result<(), WorktreeError> {
    std::os::windows::fs::symlink_dir(source, target).map_err(WorktreeError::Io)
}

fn remove_junction(target: &Path) -> std::io::Result<()> {
    // Removing the link itself, never its contents
    fs::remove_file(target)
}

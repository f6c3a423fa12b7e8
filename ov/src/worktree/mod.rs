//! Git worktree isolation for task execution
//!
//! Every task runs on its own branch in its own worktree, sharing the
//! task queue and control plane through junction mounts. Finished work
//! comes back to the base branch as a single squash commit.

pub mod gitops;
mod manager;
mod merge;

pub use manager::{
    WorktreeConfig, WorktreeEntry, WorktreeError, WorktreeInfo, WorktreeManager, branch_name,
    slugify,
};
pub use merge::CompleteResult;

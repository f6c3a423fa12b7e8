//! QueueStore - directory-partitioned task queue
//!
//! Task records are single JSON files whose containing directory names
//! their status. A status transition is an atomic rename between
//! directories, which makes the filesystem itself the claim mechanism:
//! whichever process wins the move owns the transition, with no locks.
//!
//! # Layout
//!
//! ```text
//! .queue/
//! ├── todo/
//! │   └── {task_id}.json
//! ├── analysing/
//! ├── needs-input/
//! ├── analysed/
//! ├── in-progress/
//! ├── skipped/
//! ├── cancelled/
//! └── done/
//! ```
//!
//! # Example
//!
//! ```ignore
//! use queuestore::{Task, TaskStore};
//!
//! let store = TaskStore::open(".queue")?;
//! store.create(&Task::new("Fix login", "The login page 500s"))?;
//! if let Some(task) = store.fetch_next(false)? {
//!     let claimed = store.mark_in_progress(&task.id)?;
//!     // ... run a worker ...
//!     store.mark_done(&claimed.id)?;
//! }
//! ```

pub mod cli;
pub mod config;
mod id;
mod store;
mod task;

pub use id::{generate_id, short_id};
pub use store::{StoreError, TaskStore};
pub use task::{AnalysisSession, ResolvedQuestion, SkipEntry, SubtaskProposal, Task, TaskStatus};

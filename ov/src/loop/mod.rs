//! The execution and analysis worker loops

mod classify;
mod engine;
mod session;

pub use classify::{Classification, FailureKind, SuggestedAction, classify};
pub use engine::{Engine, EngineConfig};
pub use session::{LoopSession, RunStats, SessionError, SessionState, SessionStatus, force_stopped, read_status};

//! Process registry: records, side logs, sweeps, and signals to workers

mod logs;
mod record;
mod store;

pub use logs::{ActivityEntry, LogChunk, ProcessLogs, WhisperEntry};
pub use record::{LoopKind, ProcessKind, ProcessRecord, ProcessStatus, ProcessTarget};
pub use store::{ProcessRegistry, RECORD_ID_ENV, RegistryError, is_process_alive};

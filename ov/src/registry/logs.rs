//! Append-only per-process side logs
//!
//! Each registered process gets two line-delimited JSON logs keyed by
//! its id: an activity log (what the process did) and a whisper log
//! (operator instructions pushed at it, fire-and-forget). Files are
//! opened in append mode so concurrent tailers are tolerated.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One activity log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,

    /// info, warn, error
    pub level: String,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl ActivityEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self::with_level("info", message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::with_level("warn", message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_level("error", message)
    }

    fn with_level(level: &str, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level: level.to_string(),
            message: message.into(),
            task_id: None,
        }
    }

    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// One whisper log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperEntry {
    pub at: DateTime<Utc>,

    /// normal or urgent; workers decide what that means
    pub priority: String,

    pub message: String,
}

/// A chunk of log read by a byte-offset cursor
#[derive(Debug, Clone)]
pub struct LogChunk {
    /// Whole lines read
    pub lines: Vec<String>,

    /// Cursor to pass back on the next call
    pub next_offset: u64,
}

/// Directory of per-process side logs
#[derive(Debug, Clone)]
pub struct ProcessLogs {
    dir: PathBuf,
}

impl ProcessLogs {
    pub fn open(dir: impl Into<PathBuf>) -> eyre::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn activity_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.activity.log", id))
    }

    pub fn whisper_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.whisper.log", id))
    }

    /// Append one activity entry. Failures are logged, never surfaced:
    /// an unloggable event must not take down the loop.
    pub fn append_activity(&self, id: &str, entry: &ActivityEntry) {
        self.append_line(&self.activity_path(id), entry);
    }

    /// Append one whisper entry
    pub fn append_whisper(&self, id: &str, entry: &WhisperEntry) {
        self.append_line(&self.whisper_path(id), entry);
    }

    fn append_line<T: Serialize>(&self, path: &Path, entry: &T) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize log entry");
                return;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to append log entry");
        }
    }

    /// Read the activity log from a byte offset. An offset of 0 with
    /// `initial_lines` set returns only the last N lines (a first tail);
    /// subsequent calls pass the returned cursor to stream appends.
    pub fn tail_activity(&self, id: &str, offset: u64, initial_lines: Option<usize>) -> LogChunk {
        self.tail(&self.activity_path(id), offset, initial_lines)
    }

    /// Read the whisper log from a byte offset
    pub fn tail_whisper(&self, id: &str, offset: u64, initial_lines: Option<usize>) -> LogChunk {
        self.tail(&self.whisper_path(id), offset, initial_lines)
    }

    fn tail(&self, path: &Path, offset: u64, initial_lines: Option<usize>) -> LogChunk {
        debug!(path = %path.display(), offset, ?initial_lines, "ProcessLogs::tail: called");
        let mut file = match fs::File::open(path) {
            Ok(file) => file,
            // A log that does not exist yet reads as empty
            Err(_) => {
                return LogChunk {
                    lines: Vec::new(),
                    next_offset: 0,
                };
            }
        };

        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        let start = if offset == 0 { 0 } else { offset.min(len) };

        let mut content = String::new();
        if file.seek(SeekFrom::Start(start)).is_err() || file.read_to_string(&mut content).is_err() {
            return LogChunk {
                lines: Vec::new(),
                next_offset: start,
            };
        }

        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        if offset == 0 {
            if let Some(n) = initial_lines {
                let skip = lines.len().saturating_sub(n);
                lines.drain(..skip);
            }
        }

        LogChunk {
            lines,
            next_offset: len,
        }
    }

    /// Remove both logs for an id (TTL sweep)
    pub fn remove(&self, id: &str) {
        for path in [self.activity_path(id), self.whisper_path(id)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove log"),
            }
        }
    }
}

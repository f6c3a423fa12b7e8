//! Process record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two long-running loop kinds. Used for stop-signal scoping and
/// session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopKind {
    /// Pre-flight analysis loop
    Analysis,
    /// Task execution loop
    Execution,
}

impl LoopKind {
    pub fn all() -> [LoopKind; 2] {
        [Self::Analysis, Self::Execution]
    }
}

impl std::fmt::Display for LoopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Analysis => write!(f, "analysis"),
            Self::Execution => write!(f, "execution"),
        }
    }
}

impl std::str::FromStr for LoopKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(Self::Analysis),
            "execution" => Ok(Self::Execution),
            _ => Err(format!("Unknown loop kind: {}", s)),
        }
    }
}

/// What kind of process a registry record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessKind {
    /// Long-running analysis loop
    Analysis,
    /// Long-running execution loop
    Execution,
    /// Ad hoc single-task worker
    OneShot,
}

impl ProcessKind {
    /// The loop kind this process belongs to, if it is a loop
    pub fn loop_kind(&self) -> Option<LoopKind> {
        match self {
            Self::Analysis => Some(LoopKind::Analysis),
            Self::Execution => Some(LoopKind::Execution),
            Self::OneShot => None,
        }
    }
}

impl From<LoopKind> for ProcessKind {
    fn from(kind: LoopKind) -> Self {
        match kind {
            LoopKind::Analysis => Self::Analysis,
            LoopKind::Execution => Self::Execution,
        }
    }
}

impl std::fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Analysis => write!(f, "analysis"),
            Self::Execution => write!(f, "execution"),
            Self::OneShot => write!(f, "one-shot"),
        }
    }
}

impl std::str::FromStr for ProcessKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(Self::Analysis),
            "execution" => Ok(Self::Execution),
            "one-shot" => Ok(Self::OneShot),
            _ => Err(format!("Unknown process kind: {}", s)),
        }
    }
}

/// Registry record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessStatus {
    /// Spawned, record written, not yet registered by the child
    Starting,
    /// The pid should name a live OS process; violations are detected
    /// lazily by the registry's liveness sweep, never pushed
    Running,
    /// Stopped, by request or by the liveness sweep
    Stopped,
    /// Exited with an error
    Failed,
    /// Finished its work
    Completed,
}

impl ProcessStatus {
    /// Starting and running records are live; everything else is terminal
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// One registered process. Paired with an append-only activity log and
/// an append-only whisper log keyed by the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Unique identifier
    pub id: String,

    /// Kind of process
    pub kind: ProcessKind,

    /// Current status
    pub status: ProcessStatus,

    /// OS process id
    pub pid: u32,

    /// Task currently held, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Worker conversation session currently in flight, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_session_id: Option<String>,

    pub started_at: DateTime<Utc>,

    /// Stamped when the liveness sweep finds the pid gone, or on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl ProcessRecord {
    /// Create a `starting` record for a pid
    pub fn new(kind: ProcessKind, pid: u32) -> Self {
        Self::with_id(queuestore::generate_id(), kind, pid)
    }

    /// Create a `starting` record with an explicit id (the launch
    /// handoff pre-assigns the id before the child exists)
    pub fn with_id(id: impl Into<String>, kind: ProcessKind, pid: u32) -> Self {
        Self {
            id: id.into(),
            kind,
            status: ProcessStatus::Starting,
            pid,
            task_id: None,
            worker_session_id: None,
            started_at: Utc::now(),
            failed_at: None,
        }
    }

    /// Age since the record went terminal (for the TTL sweep)
    pub fn terminal_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        let since = self.failed_at.unwrap_or(self.started_at);
        now - since
    }
}

/// Selector for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessTarget {
    /// One process by id
    Id(String),
    /// All processes of a kind
    Kind(ProcessKind),
    /// Every process
    All,
}

impl ProcessTarget {
    /// Does this selector match the record?
    pub fn matches(&self, record: &ProcessRecord) -> bool {
        match self {
            Self::Id(id) => record.id == *id,
            Self::Kind(kind) => record.kind == *kind,
            Self::All => true,
        }
    }
}

impl std::str::FromStr for ProcessTarget {
    type Err = std::convert::Infallible;

    /// "all", a kind name, or anything else as a literal id
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(Self::All);
        }
        if let Ok(kind) = s.parse::<ProcessKind>() {
            return Ok(Self::Kind(kind));
        }
        Ok(Self::Id(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_liveness() {
        assert!(ProcessStatus::Starting.is_live());
        assert!(ProcessStatus::Running.is_live());
        assert!(!ProcessStatus::Stopped.is_live());
        assert!(!ProcessStatus::Failed.is_live());
        assert!(!ProcessStatus::Completed.is_live());
    }

    #[test]
    fn test_target_matching() {
        let record = ProcessRecord::new(ProcessKind::Execution, 1234);

        assert!(ProcessTarget::All.matches(&record));
        assert!(ProcessTarget::Kind(ProcessKind::Execution).matches(&record));
        assert!(!ProcessTarget::Kind(ProcessKind::Analysis).matches(&record));
        assert!(ProcessTarget::Id(record.id.clone()).matches(&record));
        assert!(!ProcessTarget::Id("other".into()).matches(&record));
    }

    #[test]
    fn test_kind_round_trips_through_display() {
        for kind in [ProcessKind::Analysis, ProcessKind::Execution, ProcessKind::OneShot] {
            let parsed: ProcessKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_terminal_age_prefers_failed_at() {
        let mut record = ProcessRecord::new(ProcessKind::OneShot, 1);
        let now = Utc::now();
        record.started_at = now - chrono::Duration::minutes(30);
        assert!(record.terminal_age(now) >= chrono::Duration::minutes(30));

        record.failed_at = Some(now - chrono::Duration::minutes(1));
        assert!(record.terminal_age(now) < chrono::Duration::minutes(2));
    }
}

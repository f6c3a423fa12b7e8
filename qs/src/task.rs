//! Task record types
//!
//! A task is one JSON file whose containing directory names its status.
//! Everything that happens to a task over its life (skips, analysis
//! sessions, answered questions) is appended to the record, never erased.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{generate_id, short_id};

/// Task status. The variant is mirrored by the directory the record
/// lives in: changing status *is* moving the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Queued, not yet picked up
    #[default]
    Todo,
    /// A pre-flight analysis worker holds it
    Analysing,
    /// Analysis raised questions an operator must answer
    NeedsInput,
    /// Analysis complete, ready for execution
    Analysed,
    /// Claimed by an execution loop
    InProgress,
    /// Returned to the queue after a failure (history kept)
    Skipped,
    /// Terminal: abandoned by an operator
    Cancelled,
    /// Terminal: completed
    Done,
}

impl TaskStatus {
    /// Directory name used for this status
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Analysing => "analysing",
            Self::NeedsInput => "needs-input",
            Self::Analysed => "analysed",
            Self::InProgress => "in-progress",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
            Self::Done => "done",
        }
    }

    /// All statuses, in lifecycle order
    pub fn all() -> [TaskStatus; 8] {
        [
            Self::Todo,
            Self::Analysing,
            Self::NeedsInput,
            Self::Analysed,
            Self::InProgress,
            Self::Skipped,
            Self::Cancelled,
            Self::Done,
        ]
    }

    /// A task in an active status still owns its worktree and branch
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Todo | Self::Analysing | Self::NeedsInput | Self::Analysed | Self::InProgress
        )
    }

    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "analysing" => Ok(Self::Analysing),
            "needs-input" => Ok(Self::NeedsInput),
            "analysed" => Ok(Self::Analysed),
            "in-progress" => Ok(Self::InProgress),
            "skipped" => Ok(Self::Skipped),
            "cancelled" => Ok(Self::Cancelled),
            "done" => Ok(Self::Done),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// One skip event in a task's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipEntry {
    /// Why the task was skipped
    pub reason: String,

    /// When the skip happened
    pub at: DateTime<Utc>,
}

/// One answered analysis question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedQuestion {
    pub question: String,
    pub answer: String,
}

/// One pre-flight analysis session. `ended_at` is None while the
/// session is open; a crash leaves it open until reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// A subtask proposed by analysis. Inert until an operator approves
/// the split; only then do real task records exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskProposal {
    pub name: String,
    pub description: String,
}

/// A unit of work for an agent worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: String,

    /// Short human-readable name
    pub name: String,

    /// Full description handed to the worker prompt
    pub description: String,

    /// Free-form category (feature, bugfix, chore, ...)
    #[serde(default)]
    pub category: String,

    /// Scheduler ordering; lower runs first
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Rough effort estimate (small, medium, large)
    #[serde(default)]
    pub effort: String,

    /// Current status; must match the directory the record lives in
    pub status: TaskStatus,

    /// Conditions the worker must satisfy
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    /// Suggested implementation steps
    #[serde(default)]
    pub steps: Vec<String>,

    /// Task ids that should complete first
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Agent names this task is suitable for
    #[serde(default)]
    pub applicable_agents: Vec<String>,

    /// Coding standards documents that apply
    #[serde(default)]
    pub applicable_standards: Vec<String>,

    /// Questions raised by analysis and answered by an operator
    #[serde(default)]
    pub questions_resolved: Vec<ResolvedQuestion>,

    /// Subtasks proposed by analysis, awaiting operator approval
    #[serde(default)]
    pub proposed_subtasks: Vec<SubtaskProposal>,

    /// Pre-flight analysis sessions, open and closed
    #[serde(default)]
    pub analysis_sessions: Vec<AnalysisSession>,

    /// Every skip, with reason, oldest first
    #[serde(default)]
    pub skip_history: Vec<SkipEntry>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_priority() -> u32 {
    5
}

impl Task {
    /// Create a new task in `todo` with a generated id
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_id(generate_id(), name, description)
    }

    /// Create a new task with an explicit id (for tests and imports)
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            category: String::new(),
            priority: default_priority(),
            effort: String::new(),
            status: TaskStatus::Todo,
            acceptance_criteria: Vec::new(),
            steps: Vec::new(),
            dependencies: Vec::new(),
            applicable_agents: Vec::new(),
            applicable_standards: Vec::new(),
            questions_resolved: Vec::new(),
            proposed_subtasks: Vec::new(),
            analysis_sessions: Vec::new(),
            skip_history: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Builder-style priority setter
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set status and bump `updated_at`
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.touch();
    }

    /// Bump `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// First 8 characters of the id, used in branch names and commits
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    /// True when analysis produced data worth keeping the task in `analysed`
    pub fn has_analysis_data(&self) -> bool {
        !self.questions_resolved.is_empty() || self.analysis_sessions.iter().any(|s| s.ended_at.is_some())
    }

    /// True while an analysis session is open
    pub fn has_open_analysis_session(&self) -> bool {
        self.analysis_sessions.iter().any(|s| s.ended_at.is_none())
    }

    /// Close every open analysis session
    pub fn close_analysis_sessions(&mut self) {
        let now = Utc::now();
        for session in &mut self.analysis_sessions {
            if session.ended_at.is_none() {
                session.ended_at = Some(now);
            }
        }
    }

    /// Record a skip and return the task to the queue
    pub fn record_skip(&mut self, reason: impl Into<String>) {
        self.skip_history.push(SkipEntry {
            reason: reason.into(),
            at: Utc::now(),
        });
        self.started_at = None;
        self.set_status(TaskStatus::Todo);
    }
}

//! Task domain model.
//!
//! Tasks are discrete units of work dispatched to executor agents.
//! They form a DAG through their dependency lists and carry a file
//! footprint used for conflict-aware batch selection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is defined but not yet picked up
    Pending,
    /// Task is currently being executed
    InProgress,
    /// Task completed successfully
    Completed,
    /// Task failed during execution
    Failed,
    /// Task is waiting on external clarification
    Blocked,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// How far along the pipeline this status is. Used by the task-list
    /// reducer to pick the more advanced of two conflicting statuses.
    pub fn progress_rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Blocked => 1,
            Self::InProgress => 2,
            Self::Failed => 3,
            Self::Completed => 4,
        }
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<TaskStatus> {
        match self {
            Self::Pending => vec![Self::InProgress, Self::Blocked],
            Self::InProgress => vec![Self::Completed, Self::Failed, Self::Blocked],
            Self::Failed => vec![Self::Pending], // retry resets to pending
            Self::Blocked => vec![Self::Pending],
            Self::Completed => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Priority level for tasks. Rank ascends from critical (0) to low (3)
/// so that ascending sorts put the most urgent work first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" | "normal" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    /// Sort rank: critical=0, high=1, medium=2, low=3.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

/// A discrete unit of work dispatched to an executor agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the record (e.g. `task-3`)
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Task ids this depends on (must form a DAG)
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Current status
    #[serde(default)]
    pub status: TaskStatus,
    /// Priority
    #[serde(default)]
    pub priority: TaskPriority,
    /// Optional milestone this task belongs to
    #[serde(default)]
    pub milestone: Option<String>,
    /// Files this task is expected to create
    #[serde(default)]
    pub files_to_create: Vec<String>,
    /// Files this task is expected to modify
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    /// Execution attempts so far
    #[serde(default)]
    pub attempts: u32,
    /// Maximum attempts before the task is considered failed for good
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Free-form execution notes, appended across attempts
    #[serde(default)]
    pub notes: Vec<String>,
    /// Last error message, if any
    #[serde(default)]
    pub last_error: Option<String>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

const fn default_max_attempts() -> u32 {
    3
}

impl Task {
    /// Create a new pending task.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            depends_on: Vec::new(),
            status: TaskStatus::default(),
            priority: TaskPriority::default(),
            milestone: None,
            files_to_create: Vec::new(),
            files_to_modify: Vec::new(),
            attempts: 0,
            max_attempts: default_max_attempts(),
            notes: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        if task_id != self.id && !self.depends_on.contains(&task_id) {
            self.depends_on.push(task_id);
        }
        self
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set milestone.
    pub fn with_milestone(mut self, milestone: impl Into<String>) -> Self {
        self.milestone = Some(milestone.into());
        self
    }

    /// Set files to create.
    pub fn with_files_to_create(mut self, files: Vec<String>) -> Self {
        self.files_to_create = files;
        self
    }

    /// Set files to modify.
    pub fn with_files_to_modify(mut self, files: Vec<String>) -> Self {
        self.files_to_modify = files;
        self
    }

    /// Union of `files_to_create` and `files_to_modify`, used for
    /// conflict detection during batch selection.
    pub fn file_footprint(&self) -> BTreeSet<&str> {
        self.files_to_create
            .iter()
            .chain(self.files_to_modify.iter())
            .map(String::as_str)
            .collect()
    }

    /// Whether the task declares any file metadata at all. Tasks without
    /// a footprint are scheduled alone, never batched.
    pub fn has_file_metadata(&self) -> bool {
        !self.files_to_create.is_empty() || !self.files_to_modify.is_empty()
    }

    /// Trailing numeric suffix of the id (`task-12` -> 12), used as the
    /// final scheduling tie-break.
    pub fn numeric_suffix(&self) -> Option<u64> {
        let digits: String = self
            .id
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if digits.is_empty() {
            None
        } else {
            digits.parse().ok()
        }
    }

    /// Check if can transition to given status.
    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to new status.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> crate::domain::errors::EngineResult<()> {
        if !self.can_transition_to(new_status) {
            return Err(crate::domain::errors::EngineError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
                reason: format!("task {}", self.id),
            });
        }
        self.status = new_status;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Check if the task can be retried after a failure.
    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.attempts < self.max_attempts
    }

    /// Validate task shape (id, title, self-dependency).
    pub fn validate(&self) -> crate::domain::errors::EngineResult<()> {
        use crate::domain::errors::EngineError;
        if self.id.trim().is_empty() {
            return Err(EngineError::ValidationFailed(
                "task id cannot be empty".to_string(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(EngineError::ValidationFailed(format!(
                "task {} has an empty title",
                self.id
            )));
        }
        if self.depends_on.iter().any(|d| d == &self.id) {
            return Err(EngineError::ValidationFailed(format!(
                "task {} cannot depend on itself",
                self.id
            )));
        }
        Ok(())
    }
}

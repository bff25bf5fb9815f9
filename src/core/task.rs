//! Task data model for workflow execution.
//!
//! Tasks are the atomic units of work assigned to named workers. Each task
//! tracks its kind, status, dependencies, timing, and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::core::artifact::ArtifactId;

/// Unique identifier for a task within a workflow.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What role a task plays in its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// The manager turns clarification answers into a brief.
    ManagerBrief,
    /// The manager reviews every specialist deliverable.
    ManagerReview,
    /// Substantive work.
    Specialist,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::ManagerBrief => write!(f, "manager_brief"),
            TaskKind::ManagerReview => write!(f, "manager_review"),
            TaskKind::Specialist => write!(f, "specialist"),
        }
    }
}

/// Task status in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Waiting for its dependencies or for the loop to pick it up.
    #[default]
    Pending,
    /// Currently being executed by its worker.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed with an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// A single task owned by a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    pub kind: TaskKind,
    pub title: String,
    pub description: String,
    /// Name of the worker that performs the task.
    pub assigned_agent: String,
    /// Tasks that must be completed before this one is eligible.
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    /// Current execution status.
    pub status: TaskStatus,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task started execution.
    pub start_time: Option<DateTime<Utc>>,
    /// When the task finished (success or failure).
    pub end_time: Option<DateTime<Utc>>,
    /// Free-form output from the worker.
    pub result: Option<String>,
    /// Artifacts produced by this task.
    #[serde(default)]
    pub artifacts: Vec<ArtifactId>,
}

impl Task {
    /// Create a new pending task with a generated ID and no dependencies.
    pub fn new(kind: TaskKind, title: &str, description: &str, assigned_agent: &str) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            title: title.to_string(),
            description: description.to_string(),
            assigned_agent: assigned_agent.to_string(),
            dependencies: BTreeSet::new(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            result: None,
            artifacts: Vec::new(),
        }
    }

    /// Builder-style dependency addition.
    pub fn depends_on(mut self, id: TaskId) -> Self {
        self.dependencies.insert(id);
        self
    }

    /// Transition to Running and record the start time.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.start_time = Some(Utc::now());
    }

    /// Mark the task as successfully completed with its output.
    pub fn complete(&mut self, result: Option<String>) {
        self.status = TaskStatus::Completed;
        self.end_time = Some(Utc::now());
        if result.is_some() {
            self.result = result;
        }
    }

    /// Mark the task as failed with an error message.
    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.end_time = Some(Utc::now());
    }

    /// Put an interrupted task back in the queue.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.start_time = None;
        self.end_time = None;
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, TaskStatus::Failed { .. })
    }

    /// Check if the task is in a terminal state (Completed or Failed).
    pub fn is_finished(&self) -> bool {
        self.is_completed() || self.is_failed()
    }

    /// Error message of a failed task.
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

use thiserror::Error;

use crate::core::TaskId;
use crate::workflow::WorkflowId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Task {task} not found in workflow {workflow}")]
    TaskNotFound { workflow: WorkflowId, task: TaskId },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Workflow {0} is not awaiting clarification")]
    NotAwaitingClarification(WorkflowId),

    #[error("Orchestrator unavailable: no executor configured")]
    OrchestratorUnavailable,

    #[error("Task execution failed: {0}")]
    TaskExecution(String),

    #[error("Persistence write failed: {0}")]
    PersistenceWrite(String),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Shorthand for a rejected state-machine move.
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Workflow types and the lifecycle state machine.
//!
//! A workflow is one directive broken into tasks. `types` holds the data
//! model; `state` holds every status change and the gates around them.

mod state;
mod types;

pub use state::{BriefApproval, ClarificationStatus};
pub use types::{
    Brief, ClarifyingQuestion, CreateOptions, FailedTaskNote, Progress, StatusHistoryEntry,
    Workflow, WorkflowId, WorkflowMetadata, WorkflowStatus,
};

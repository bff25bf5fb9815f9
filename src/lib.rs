pub mod analyzer;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod roster;
pub mod state;
pub mod workflow;

pub use error::{Error, Result};
pub use orchestration::{Orchestrator, OrchestratorBuilder};
pub use workflow::{Workflow, WorkflowId, WorkflowStatus};

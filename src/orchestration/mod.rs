//! Orchestration layer: turning workflows into executed work.
//!
//! This module provides the orchestrator façade with its command and query
//! API, the execution loop that drives tasks through pluggable executors,
//! artifact storage with lineage reconciliation, and the notification bridge.

pub mod executor;
pub mod lineage;
pub mod notify;
mod orchestrator;
mod scheduler;

pub use executor::{
    run_with_deadline, CommandExecutor, ExecutionRequest, Executor, SimulatedExecutor,
    TaskOutcome,
};
pub use lineage::{ArtifactStore, FsArtifactStore, ObjectInfo, PendingArtifact};
pub use notify::{
    BroadcastSink, EmittedEvent, NotificationBridge, NotificationSink, WorkflowEvent,
};
pub use orchestrator::{CreatedWorkflow, DriverHandle, Orchestrator, OrchestratorBuilder};

//! Core domain models for workflow orchestration.
//!
//! This module contains the fundamental data structures used throughout
//! the orchestrator: tasks, the dependency graph over them, and the
//! artifacts they produce.

pub mod artifact;
pub mod dag;
pub mod task;

pub use artifact::{
    Artifact, ArtifactDraft, ArtifactId, ArtifactLedger, ArtifactMetadata, LineageAction,
    LineageEvent,
};
pub use dag::{eligible_tasks, TaskGraph};
pub use task::{Task, TaskId, TaskKind, TaskStatus};

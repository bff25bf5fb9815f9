//! Durable workflow state.
//!
//! The orchestrator keeps workflows in memory and checkpoints them through a
//! `WorkflowStore`. `JsonFileStore` is the on-disk implementation used by
//! the CLI; `MemoryStore` backs tests and throwaway runs.

mod store;

pub use store::{JsonFileStore, MemoryStore, WorkflowRecord, WorkflowStore};

//! Integration test suite for Overseer.
//!
//! These tests drive the orchestrator through its public API, from a free
//! text directive to final sign-off, with scripted executors standing in
//! for real workers.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: Directive to completion, including both approval gates
//! - `execution_loop`: Scheduling, failures, timeouts and shutdown
//! - `persistence`: Checkpointing, hydration and write-failure retry
//! - `artifacts`: Lineage recording and late-artifact reconciliation
//!
//! # CI Compatibility
//!
//! Nothing here spawns external processes or touches the network; all
//! state lives in temporary directories.

mod fixtures;

mod execution_loop;
mod persistence;
mod workflow_e2e;

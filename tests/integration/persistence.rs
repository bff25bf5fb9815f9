//! Persistence integration tests.
//!
//! These tests verify that every state change is checkpointed, that a
//! restarted orchestrator picks up where the last one stopped, and that
//! failed writes are retried.

use std::sync::Arc;
use std::time::Duration;

use overseer::analyzer::DirectiveAnalyzer;
use overseer::core::TaskStatus;
use overseer::orchestration::{FsArtifactStore, Orchestrator, SimulatedExecutor};
use overseer::state::{JsonFileStore, WorkflowStore};
use overseer::workflow::{CreateOptions, Workflow, WorkflowStatus};
use tempfile::TempDir;

use crate::fixtures::{FlakyStore, Harness};

fn restarted(store: Arc<JsonFileStore>, artifacts: &TempDir) -> Orchestrator {
    let artifact_store = Arc::new(FsArtifactStore::new(artifacts.path()));
    Orchestrator::builder()
        .executor(Arc::new(
            SimulatedExecutor::new(artifact_store.clone()).with_delay(Duration::ZERO),
        ))
        .artifact_store(artifact_store)
        .store(store)
        .build()
}

/// Test: Restart picks up stored workflows
/// Given a completed workflow and a gated one written to disk
/// When a fresh orchestrator hydrates from the same directory
/// Then both come back unchanged and the gated one can continue
#[tokio::test]
async fn test_hydrate_restores_workflows_from_disk() {
    let state_dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(state_dir.path()));
    let harness = Harness::build(|e| e, store.clone(), Duration::from_secs(5));

    let done = harness.create("have Sage create an about-me document").await;
    harness.drain(3).await;
    let gated = harness.create("create a landing page").await;

    let artifacts = TempDir::new().unwrap();
    let fresh = restarted(store, &artifacts);
    assert_eq!(fresh.hydrate().await.unwrap(), 2);
    // Already in memory, so a second pass loads nothing.
    assert_eq!(fresh.hydrate().await.unwrap(), 0);

    let restored = fresh.get_workflow_status(done).await.unwrap();
    assert_eq!(restored.status, WorkflowStatus::Completed);
    assert_eq!(restored.artifacts.len(), 1);
    assert_eq!(fresh.get_agent_artifacts_with_lineage("sage").await.len(), 1);

    let waiting = fresh.get_workflow_status(gated).await.unwrap();
    assert_eq!(waiting.status, WorkflowStatus::AwaitingClarification);
    assert_eq!(waiting.pending_after_approval.len(), 2);

    let all = fresh.get_all_workflows().await.unwrap();
    let ids: Vec<_> = all.iter().map(|w| w.id).collect();
    assert_eq!(ids, vec![done, gated]);
}

#[tokio::test]
async fn test_hydrate_resets_interrupted_tasks() {
    let state_dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(state_dir.path()));

    let directive = "have Atlas build a billing api";
    let plan = DirectiveAnalyzer::default().analyze(directive);
    let mut workflow = Workflow::new(directive, plan, CreateOptions::default());
    workflow.transition(WorkflowStatus::Executing).unwrap();
    workflow.tasks[0].start();
    store.save(&workflow).await.unwrap();

    let artifacts = TempDir::new().unwrap();
    let orchestrator = restarted(store.clone(), &artifacts);
    assert_eq!(orchestrator.hydrate().await.unwrap(), 1);

    let hydrated = orchestrator.get_workflow_status(workflow.id).await.unwrap();
    assert!(matches!(hydrated.tasks[0].status, TaskStatus::Pending));
    assert!(hydrated.tasks[0].start_time.is_none());

    let on_disk = store.load_all().await.unwrap();
    assert!(matches!(on_disk[0].tasks[0].status, TaskStatus::Pending));

    // The reset task runs again.
    assert_eq!(orchestrator.process_next_task().await.unwrap(), 1);
    let resumed = orchestrator.get_workflow_status(workflow.id).await.unwrap();
    assert!(resumed.tasks[0].is_completed());
}

/// Test: Failed checkpoints are retried
/// Given a store that rejects writes
/// When state changes happen
/// Then the workflow stays dirty until a later checkpoint succeeds
#[tokio::test]
async fn test_failed_checkpoint_is_retried() {
    let store = Arc::new(FlakyStore::default());
    let harness = Harness::build(|e| e, store.clone(), Duration::from_secs(5));

    store.set_failing(true);
    let id = harness.create("create a landing page").await;
    assert_eq!(harness.orchestrator.dirty_count().await, 1);
    assert_eq!(store.len().await, 0);

    // In-memory state is unaffected by the failed write.
    assert_eq!(
        harness.workflow(id).await.status,
        WorkflowStatus::AwaitingClarification
    );

    store.set_failing(false);
    let other = harness.create("have Sage create an about-me document").await;
    assert_eq!(harness.orchestrator.dirty_count().await, 0);
    assert_eq!(store.len().await, 2);

    let stored: Vec<_> = store.load_all().await.unwrap().iter().map(|w| w.id).collect();
    assert!(stored.contains(&id));
    assert!(stored.contains(&other));
}

#[tokio::test]
async fn test_every_command_checkpoints() {
    let state_dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(state_dir.path()));
    let harness = Harness::build(|e| e, store.clone(), Duration::from_secs(5));

    let id = harness.create("create a landing page").await;
    harness.answer_all(id).await;
    let on_disk = store.load_all().await.unwrap();
    assert_eq!(on_disk[0].status, WorkflowStatus::InProgress);

    harness.orchestrator.pause_workflow(id).await.unwrap();
    let on_disk = store.load_all().await.unwrap();
    assert_eq!(on_disk[0].status, WorkflowStatus::Paused);
    assert_eq!(on_disk[0].paused_from, Some(WorkflowStatus::InProgress));

    let record_path = state_dir.path().join(format!("{}.json", id));
    assert!(record_path.exists());
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(record_path).unwrap()).unwrap();
    assert_eq!(raw["status"], "paused");
    assert_eq!(raw["workflow"]["directive"], "create a landing page");
}

/// Test: Memory wins over the store
/// Given a stored snapshot older than the in-memory workflow
/// When all workflows are listed
/// Then the in-memory version is returned and store-only records are kept
#[tokio::test]
async fn test_listing_prefers_memory_over_stale_store() {
    let state_dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(state_dir.path()));
    let harness = Harness::build(|e| e, store.clone(), Duration::from_secs(5));

    let id = harness.create("create a landing page").await;
    let stale = harness.workflow(id).await;
    harness.answer_all(id).await;
    store.save(&stale).await.unwrap();

    let directive = "have Sage write an onboarding guide";
    let plan = DirectiveAnalyzer::default().analyze(directive);
    let stored_only = Workflow::new(directive, plan, CreateOptions::default());
    store.save(&stored_only).await.unwrap();

    let on_disk = store.load_all().await.unwrap();
    let disk_copy = on_disk.iter().find(|w| w.id == id).unwrap();
    assert_eq!(disk_copy.status, WorkflowStatus::AwaitingClarification);

    let all = harness.orchestrator.get_all_workflows().await.unwrap();
    assert_eq!(all.len(), 2);
    let listed = all.iter().find(|w| w.id == id).unwrap();
    assert_eq!(listed.status, WorkflowStatus::InProgress);
    assert_eq!(listed.metadata.clarification_responses.len(), 3);
    assert!(all.iter().any(|w| w.id == stored_only.id));
}

#[tokio::test]
async fn test_completed_workflow_lists_with_ceo_sign_off() {
    let state_dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(state_dir.path()));
    let harness = Harness::build(|e| e, store.clone(), Duration::from_secs(5));

    let id = harness.create("create a landing page").await;
    harness.answer_all(id).await;
    harness.drain(5).await;
    harness.approve_brief(id).await;
    harness.drain(10).await;
    harness
        .orchestrator
        .record_ceo_approval(id, "ceo", true)
        .await
        .unwrap();

    let all = harness.orchestrator.get_all_workflows().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, id);
    assert_eq!(all[0].status, WorkflowStatus::Completed);
    assert!(all[0].metadata.ceo_approved);

    // A fresh process sees the same outcome straight from disk.
    let artifacts = TempDir::new().unwrap();
    let fresh = restarted(store, &artifacts);
    let reloaded = fresh.get_all_workflows().await.unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].status, WorkflowStatus::Completed);
    assert!(reloaded[0].metadata.ceo_approved);
    assert_eq!(reloaded[0].metadata.ceo_approver.as_deref(), Some("ceo"));
}

//! Execution loop integration tests.
//!
//! These tests verify scheduling across workflows, failure and timeout
//! handling, single-flight ticks and shutdown behavior.

use std::sync::Arc;
use std::time::Duration;

use overseer::core::TaskStatus;
use overseer::state::MemoryStore;
use overseer::workflow::WorkflowStatus;

use crate::fixtures::{wait_for_status, Behavior, Harness};

/// Test: One task per workflow per tick
/// Given two independent ungated workflows
/// When a single tick runs
/// Then each workflow has exactly one task processed
#[tokio::test]
async fn test_tick_runs_one_task_per_workflow() {
    let harness = Harness::new();
    let first = harness.create("have Atlas build a billing api").await;
    let second = harness.create("have Sage create an about-me document").await;

    let processed = harness.orchestrator.process_next_task().await.unwrap();
    assert_eq!(processed, 2);

    let first = harness.workflow(first).await;
    assert_eq!(first.status, WorkflowStatus::Executing);
    assert_eq!(first.progress.completed, 1);
    assert_eq!(first.progress.total, 2);
    assert_eq!(
        harness.workflow(second).await.status,
        WorkflowStatus::Completed
    );
}

#[tokio::test]
async fn test_dependencies_run_in_order() {
    let harness = Harness::new();
    let id = harness.create("have Sage deploy the billing server").await;

    harness.drain(5).await;
    assert_eq!(
        harness.executor.calls(),
        vec![
            "Plan deployment for billing server",
            "Roll out billing server",
        ]
    );
    let workflow = harness.workflow(id).await;
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    let first_end = workflow.tasks[0].end_time.unwrap();
    let second_start = workflow.tasks[1].start_time.unwrap();
    assert!(first_end <= second_start);
}

/// Test: Task failure
/// Given a workflow whose second task fails
/// When the loop runs
/// Then the failure is recorded, dependents stay pending and the workflow waits
#[tokio::test]
async fn test_failed_task_blocks_dependents() {
    let harness = Harness::with_rules(|e| {
        e.on("Implement", Behavior::Fail("compiler exploded".to_string()))
    });
    let id = harness.create("have Atlas build a billing api").await;

    assert_eq!(harness.drain(5).await, 2);

    let workflow = harness.workflow(id).await;
    assert_eq!(workflow.status, WorkflowStatus::Executing);
    let failed = &workflow.tasks[1];
    assert!(failed.is_failed());
    assert!(failed.error().unwrap().contains("compiler exploded"));
    assert_eq!(workflow.metadata.failed_tasks.len(), 1);
    assert_eq!(workflow.metadata.failed_tasks[0].task_id, failed.id);

    let failures = harness.sink.payloads("task.failed");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["agent"], "Atlas");

    // Nothing else is eligible; an operator has to step in.
    assert_eq!(harness.drain(3).await, 0);
    let status = harness
        .orchestrator
        .abort_workflow(id, "implementation failed")
        .await
        .unwrap();
    assert_eq!(status, WorkflowStatus::Failed);
}

#[tokio::test]
async fn test_task_timeout_fails_the_task() {
    let harness = Harness::build(
        |e| e.on("Write", Behavior::Stall),
        Arc::new(MemoryStore::new()),
        Duration::from_millis(50),
    );
    let id = harness.create("have Sage create an about-me document").await;

    assert_eq!(harness.orchestrator.process_next_task().await.unwrap(), 1);

    let workflow = harness.workflow(id).await;
    let task = &workflow.tasks[0];
    assert!(task.is_failed());
    assert!(task.error().unwrap().contains("timed out"));
    assert_ne!(workflow.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_overlapping_ticks_are_single_flight() {
    let harness = Harness::build(
        |e| e.on("Write", Behavior::Stall),
        Arc::new(MemoryStore::new()),
        Duration::from_millis(200),
    );
    harness.create("have Sage create an about-me document").await;

    let (a, b) = tokio::join!(
        harness.orchestrator.process_next_task(),
        harness.orchestrator.process_next_task()
    );
    assert_eq!(a.unwrap() + b.unwrap(), 1);
    assert_eq!(harness.executor.calls().len(), 1);
}

/// Test: Shutdown interrupts running work
/// Given a task stuck in its executor
/// When the orchestrator shuts down
/// Then the task goes back to pending and the snapshot is persisted
#[tokio::test]
async fn test_shutdown_returns_running_task_to_pending() {
    let store = Arc::new(MemoryStore::new());
    let harness = Harness::build(
        |e| e.on("Write", Behavior::Stall),
        store.clone(),
        Duration::from_secs(30),
    );
    let id = harness.create("have Sage create an about-me document").await;

    let orchestrator = harness.orchestrator.clone();
    let tick = tokio::spawn(async move { orchestrator.process_next_task().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.workflow(id).await.has_running_task());

    tokio::time::timeout(Duration::from_secs(5), harness.orchestrator.shutdown())
        .await
        .expect("shutdown should not wait for the stalled executor");
    assert_eq!(tick.await.unwrap().unwrap(), 1);

    let workflow = harness.workflow(id).await;
    assert!(matches!(workflow.tasks[0].status, TaskStatus::Pending));
    let saved = store.get(&id).await.unwrap();
    assert!(matches!(saved.workflow.tasks[0].status, TaskStatus::Pending));

    // No more work after shutdown.
    assert_eq!(harness.orchestrator.process_next_task().await.unwrap(), 0);
}

#[tokio::test]
async fn test_driver_completes_workflow_in_background() {
    let harness = Harness::new();
    let id = harness.create("have Sage create an about-me document").await;

    let driver = harness.orchestrator.spawn_driver();
    let completed = wait_for_status(
        &harness.orchestrator,
        id,
        WorkflowStatus::Completed,
        Duration::from_secs(5),
    )
    .await;
    driver.shutdown();
    driver.stopped().await;

    assert!(completed);
    assert_eq!(harness.executor.calls().len(), 1);
}

#[tokio::test]
async fn test_no_executor_means_no_workflows() {
    let orchestrator = overseer::Orchestrator::builder().build();
    assert!(orchestrator
        .create_workflow("have Sage create an about-me document", Default::default())
        .await
        .is_err());
    assert_eq!(orchestrator.process_next_task().await.unwrap(), 0);
}

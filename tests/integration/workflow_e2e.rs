//! End-to-end workflow integration tests.
//!
//! These tests follow a directive from creation to final sign-off, through
//! the clarification gate, the brief approval gate and the CEO gate.

use std::collections::BTreeMap;

use overseer::core::{TaskKind, TaskStatus};
use overseer::workflow::{ClarificationStatus, WorkflowStatus};
use overseer::Error;

use crate::fixtures::Harness;

/// Test: Explicit worker, no gates
/// Given "have Sage create an about-me document"
/// When the execution loop runs
/// Then the workflow completes with one artifact owned by Sage
#[tokio::test]
async fn test_explicit_worker_runs_straight_through() {
    let harness = Harness::new();
    let id = harness.create("have Sage create an about-me document").await;

    let created = harness.workflow(id).await;
    assert_eq!(created.status, WorkflowStatus::Planned);
    assert_eq!(created.manager.as_deref(), Some("Sage"));
    assert_eq!(created.tasks.len(), 1);
    assert!(created.review_task().is_none());

    let processed = harness.drain(5).await;
    assert_eq!(processed, 1);

    let done = harness.workflow(id).await;
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.progress.percentage, 100);
    assert!(done.progress_is_consistent());

    let artifacts = harness
        .orchestrator
        .get_agent_artifacts_with_lineage("Sage")
        .await;
    assert_eq!(artifacts.len(), 1);
    assert!(artifacts[0]
        .metadata
        .relative_path
        .ends_with("write-about-me-document.md"));
    assert!(artifacts[0].metadata.path.starts_with(harness.artifact_root()));
    assert_eq!(done.tasks[0].artifacts, vec![artifacts[0].id]);
}

/// Test: Ambiguous directive through every gate
/// Given "create a landing page"
/// When questions are answered, the brief approved and the review done
/// Then the CEO approval completes the workflow
#[tokio::test]
async fn test_gated_workflow_full_lifecycle() {
    let harness = Harness::new();
    let id = harness.create("create a landing page").await;

    let created = harness.workflow(id).await;
    assert_eq!(created.status, WorkflowStatus::AwaitingClarification);
    assert!(created.manager.is_none());
    assert_eq!(created.tasks.len(), 1);
    assert_eq!(created.tasks[0].kind, TaskKind::ManagerBrief);
    assert_eq!(created.pending_after_approval.len(), 2);

    // Nothing runs while questions are open.
    assert_eq!(harness.drain(3).await, 0);

    harness.answer_all(id).await;
    assert_eq!(harness.workflow(id).await.status, WorkflowStatus::InProgress);

    // Only the brief task is in scope until the brief is approved.
    assert_eq!(harness.drain(5).await, 1);
    let briefed = harness.workflow(id).await;
    assert!(briefed.brief_task().unwrap().is_completed());
    assert_eq!(briefed.pending_after_approval.len(), 2);
    assert_ne!(briefed.status, WorkflowStatus::WaitingForCeoApproval);

    let scheduled = harness.approve_brief(id).await;
    assert_eq!(scheduled, 3, "two specialist tasks plus the review");
    let approved = harness.workflow(id).await;
    assert_eq!(approved.manager.as_deref(), Some("Nova"));
    assert!(approved.brief.as_ref().unwrap().approved_at.is_some());
    assert!(approved.pending_after_approval.is_empty());

    assert_eq!(harness.drain(10).await, 3);
    assert_eq!(
        harness.executor.calls(),
        vec![
            "Brief: landing page",
            "Design landing page layout",
            "Implement landing page",
            "Review landing page",
        ]
    );
    assert_eq!(
        harness.workflow(id).await.status,
        WorkflowStatus::WaitingForCeoApproval
    );

    let status = harness
        .orchestrator
        .record_ceo_approval(id, "ceo", true)
        .await
        .unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    let done = harness.workflow(id).await;
    assert!(done.metadata.ceo_approved);
    assert_eq!(done.metadata.ceo_approver.as_deref(), Some("ceo"));
    assert_eq!(done.progress.completed, 4);
    assert_eq!(done.artifacts.len(), 4);
    let statuses: Vec<WorkflowStatus> = done.status_history.iter().map(|h| h.status).collect();
    assert_eq!(statuses.first(), Some(&WorkflowStatus::AwaitingClarification));
    assert_eq!(statuses.last(), Some(&WorkflowStatus::Completed));
}

/// Test: CEO rejection
/// Given a workflow waiting for final sign-off
/// When the CEO rejects it
/// Then it ends Rejected and accepts no further commands
#[tokio::test]
async fn test_ceo_rejection_is_terminal() {
    let harness = Harness::new();
    let id = harness.create("create a landing page").await;
    harness.answer_all(id).await;
    harness.drain(5).await;
    harness.approve_brief(id).await;
    harness.drain(10).await;

    let status = harness
        .orchestrator
        .record_ceo_approval(id, "ceo", false)
        .await
        .unwrap();
    assert_eq!(status, WorkflowStatus::Rejected);

    let rejected = harness.workflow(id).await;
    assert!(!rejected.metadata.ceo_approved);
    assert!(harness.orchestrator.pause_workflow(id).await.is_err());
    assert!(harness
        .orchestrator
        .record_ceo_approval(id, "ceo", true)
        .await
        .is_err());
}

#[tokio::test]
async fn test_partial_answers_keep_the_gate_closed() {
    let harness = Harness::new();
    let id = harness.create("create a landing page").await;

    let mut responses = BTreeMap::new();
    responses.insert("filename".to_string(), "index.html".to_string());
    responses.insert("scope".to_string(), "   ".to_string());
    let status = harness
        .orchestrator
        .respond_to_clarification(id, responses)
        .await
        .unwrap();
    assert_eq!(status, ClarificationStatus::StillAwaiting);

    let workflow = harness.workflow(id).await;
    assert_eq!(workflow.status, WorkflowStatus::AwaitingClarification);
    assert_eq!(
        workflow.metadata.clarification_responses.get("filename").map(String::as_str),
        Some("index.html")
    );
    assert!(!workflow.metadata.clarification_responses.contains_key("scope"));

    harness.answer_all(id).await;
    assert_eq!(harness.workflow(id).await.status, WorkflowStatus::InProgress);
}

#[tokio::test]
async fn test_answers_after_gate_are_rejected() {
    let harness = Harness::new();
    let id = harness.create("have Sage create an about-me document").await;

    let err = harness
        .orchestrator
        .respond_to_clarification(id, BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotAwaitingClarification(w) if w == id));
}

#[tokio::test]
async fn test_brief_approval_before_answers_is_rejected() {
    let harness = Harness::new();
    let id = harness.create("create a landing page").await;

    let result = harness
        .orchestrator
        .attach_brief_approval(id, overseer::workflow::Brief::completed("Nova", "early", "ceo"))
        .await;
    assert!(matches!(result, Err(Error::InvalidTransition { .. })));
    assert_eq!(harness.workflow(id).await.pending_after_approval.len(), 2);
}

#[tokio::test]
async fn test_brief_approval_twice_is_a_no_op() {
    let harness = Harness::new();
    let id = harness.create("create a landing page").await;
    harness.answer_all(id).await;
    harness.drain(5).await;

    assert_eq!(harness.approve_brief(id).await, 3);
    assert_eq!(harness.approve_brief(id).await, 0);

    let workflow = harness.workflow(id).await;
    let reviews = workflow
        .tasks
        .iter()
        .filter(|t| t.kind == TaskKind::ManagerReview)
        .count();
    assert_eq!(reviews, 1);
    assert_eq!(workflow.tasks.len(), 4);
}

#[tokio::test]
async fn test_ceo_approval_requires_the_gate() {
    let harness = Harness::new();
    let id = harness.create("create a landing page").await;

    let err = harness
        .orchestrator
        .record_ceo_approval(id, "ceo", true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_pause_resume_and_abort() {
    let harness = Harness::new();
    let id = harness.create("build a billing api").await;
    harness.answer_all(id).await;

    let paused = harness.orchestrator.pause_workflow(id).await.unwrap();
    assert_eq!(paused, WorkflowStatus::Paused);
    assert_eq!(harness.drain(3).await, 0, "paused workflows are not scheduled");

    let resumed = harness.orchestrator.resume_workflow(id).await.unwrap();
    assert_eq!(resumed, WorkflowStatus::InProgress);
    assert_eq!(harness.drain(1).await, 1);

    let aborted = harness
        .orchestrator
        .abort_workflow(id, "priorities changed")
        .await
        .unwrap();
    assert_eq!(aborted, WorkflowStatus::Failed);

    let workflow = harness.workflow(id).await;
    assert_eq!(workflow.metadata.abort_reason.as_deref(), Some("priorities changed"));
    assert!(workflow
        .tasks
        .iter()
        .all(|t| !matches!(t.status, TaskStatus::Running)));
    assert!(harness.orchestrator.resume_workflow(id).await.is_err());
}

#[tokio::test]
async fn test_lifecycle_events_are_emitted() {
    let harness = Harness::new();
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

    let counts = harness.event_counts();
    assert_eq!(counts.get("workflow.created"), Some(&1));
    assert_eq!(counts.get("workflow.clarification_received"), Some(&1));
    assert_eq!(counts.get("workflow.brief_approved"), Some(&1));
    assert_eq!(counts.get("workflow.ceo_decision"), Some(&1));
    assert_eq!(counts.get("task.started"), Some(&4));
    assert_eq!(counts.get("task.completed"), Some(&4));
    assert_eq!(counts.get("artifact.recorded"), Some(&4));
    assert!(counts.get("workflow.progress").copied().unwrap_or(0) >= 4);

    let decisions = harness.sink.payloads("workflow.ceo_decision");
    assert_eq!(decisions[0]["approved"], true);
    assert_eq!(decisions[0]["status"], "completed");

    let final_change = harness
        .sink
        .payloads("workflow.status_changed")
        .into_iter()
        .last()
        .unwrap();
    assert_eq!(final_change["from"], "waiting_for_ceo_approval");
    assert_eq!(final_change["to"], "completed");
}

#[tokio::test]
async fn test_project_options_are_kept() {
    let harness = Harness::new();
    let created = harness
        .orchestrator
        .create_workflow(
            "have Atlas write a migration guide",
            overseer::workflow::CreateOptions {
                project_id: Some("p-42".to_string()),
                project_name: Some("Billing".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(created.workflow.metadata.project_id.as_deref(), Some("p-42"));
    assert_eq!(created.workflow.manager.as_deref(), Some("Atlas"));
}

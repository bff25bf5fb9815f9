//! Execution loop.
//!
//! One tick claims at most one eligible task per schedulable workflow, runs
//! the claimed tasks concurrently, then records every outcome. Claiming and
//! recording happen under the workflow write lock; execution does not.
//! Overlapping ticks are single-flighted through the orchestrator's tick
//! guard.

use futures::future::join_all;
use tracing::{debug, info, trace, warn};

use crate::core::{eligible_tasks, ArtifactDraft, TaskId};
use crate::error::{Error, Result};
use crate::orchestration::executor::{run_with_deadline, ExecutionRequest, TaskOutcome};
use crate::orchestration::lineage::{locate, PendingArtifact};
use crate::orchestration::notify::WorkflowEvent;
use crate::orchestration::orchestrator::{register_artifact, Orchestrator};
use crate::workflow::{WorkflowId, WorkflowStatus};

/// A task marked running and handed to an executor.
#[derive(Debug, Clone)]
struct Claim {
    workflow_id: WorkflowId,
    task_id: TaskId,
    agent: String,
    request: ExecutionRequest,
}

impl Orchestrator {
    /// Run one tick of the execution loop. Returns the number of tasks processed.
    ///
    /// Returns 0 immediately when another tick is in flight, when no
    /// executor is configured, or after shutdown.
    pub async fn process_next_task(&self) -> Result<usize> {
        let Ok(_guard) = self.inner.tick_guard.try_lock() else {
            trace!("Tick already in flight, skipping");
            return Ok(0);
        };
        if self.inner.cancel.is_cancelled() {
            return Ok(0);
        }
        let Some(executor) = self.inner.executor.clone() else {
            return Ok(0);
        };

        let claims = self.claim_tasks().await;
        if claims.is_empty() {
            return Ok(0);
        }
        debug!("Tick claimed {} tasks", claims.len());

        let timeout = self.inner.task_timeout;
        let cancel = &self.inner.cancel;
        let runs = claims.into_iter().map(|claim| {
            let executor = executor.clone();
            async move {
                let outcome =
                    run_with_deadline(executor.as_ref(), claim.request.clone(), timeout, cancel)
                        .await;
                (claim, outcome)
            }
        });
        let results = join_all(runs).await;

        let processed = results.len();
        let mut touched = Vec::with_capacity(processed);
        for (claim, outcome) in results {
            touched.push(claim.workflow_id);
            self.record_outcome(claim, outcome).await;
        }
        self.checkpoint(&touched).await;
        Ok(processed)
    }

    /// Mark the first eligible task of each idle, schedulable workflow as running.
    async fn claim_tasks(&self) -> Vec<Claim> {
        let mut claims = Vec::new();
        let mut events = Vec::new();
        {
            let mut workflows = self.inner.workflows.write().await;
            let mut ids: Vec<(chrono::DateTime<chrono::Utc>, WorkflowId)> = workflows
                .values()
                .filter(|w| w.status.is_schedulable() && !w.has_running_task())
                .map(|w| (w.created_at, w.id))
                .collect();
            ids.sort();

            for (_, id) in ids {
                let Some(workflow) = workflows.get_mut(&id) else {
                    continue;
                };
                let Some(task_id) = eligible_tasks(workflow).first().map(|t| t.id) else {
                    continue;
                };

                let before = workflow.status;
                if before != WorkflowStatus::Executing {
                    if let Err(e) = workflow.transition(WorkflowStatus::Executing) {
                        warn!("Workflow {} cannot start work: {}", id.short(), e);
                        continue;
                    }
                    events.push(WorkflowEvent::StatusChanged {
                        workflow_id: id,
                        from: before,
                        to: WorkflowStatus::Executing,
                    });
                }

                let Some(task) = workflow.task_mut(&task_id) else {
                    continue;
                };
                task.start();
                let task = task.clone();
                workflow.touch();

                info!(
                    "Workflow {}: {} started '{}'",
                    id.short(),
                    task.assigned_agent,
                    task.title
                );
                events.push(WorkflowEvent::TaskStarted {
                    workflow_id: id,
                    task_id,
                    agent: task.assigned_agent.clone(),
                    title: task.title.clone(),
                });
                claims.push(Claim {
                    workflow_id: id,
                    task_id,
                    agent: task.assigned_agent.clone(),
                    request: ExecutionRequest {
                        workflow_id: id,
                        task,
                        directive: workflow.directive.clone(),
                        brief: workflow.brief.clone(),
                    },
                });
            }
        }
        self.emit_all(events);
        claims
    }

    /// Apply an executor result to its task and re-run the completion gate.
    async fn record_outcome(&self, claim: Claim, outcome: Result<TaskOutcome>) {
        // Check the store before taking the lock.
        let (summary, located, missing) = match outcome {
            Ok(outcome) => {
                let (located, missing) = self.locate_artifacts(outcome.artifacts).await;
                (Ok(outcome.summary), located, missing)
            }
            Err(e) => (Err(e), Vec::new(), Vec::new()),
        };

        let mut events = Vec::new();
        {
            let mut workflows = self.inner.workflows.write().await;
            let Some(workflow) = workflows.get_mut(&claim.workflow_id) else {
                warn!("Workflow {} vanished during execution", claim.workflow_id.short());
                return;
            };
            let Some(task) = workflow.task_mut(&claim.task_id) else {
                warn!("Task {} vanished during execution", claim.task_id.short());
                return;
            };

            match summary {
                Ok(summary) => {
                    task.complete(Some(summary));
                    let title = task.title.clone();
                    info!(
                        "Workflow {}: {} completed '{}'",
                        claim.workflow_id.short(),
                        claim.agent,
                        title
                    );
                    events.push(WorkflowEvent::TaskCompleted {
                        workflow_id: claim.workflow_id,
                        task_id: claim.task_id,
                        agent: claim.agent.clone(),
                        title,
                    });
                    for draft in located {
                        events.push(register_artifact(
                            workflow,
                            PendingArtifact {
                                workflow_id: claim.workflow_id,
                                task_id: claim.task_id,
                                agent: claim.agent.clone(),
                                draft,
                                note: None,
                                attempts: 0,
                            },
                        ));
                    }
                }
                Err(Error::Cancelled) => {
                    // Interrupted by shutdown; it runs again after restart.
                    task.reset();
                    debug!("Task {} interrupted, back to pending", claim.task_id.short());
                }
                Err(e) => {
                    let error = e.to_string();
                    task.fail(&error);
                    warn!(
                        "Workflow {}: task {} failed: {}",
                        claim.workflow_id.short(),
                        claim.task_id.short(),
                        error
                    );
                    workflow.note_task_failure(claim.task_id, &error);
                    events.push(WorkflowEvent::TaskFailed {
                        workflow_id: claim.workflow_id,
                        task_id: claim.task_id,
                        agent: claim.agent.clone(),
                        error,
                    });
                }
            }

            let before = workflow.status;
            if let Err(e) = workflow.update_progress() {
                warn!(
                    "Workflow {} progress update failed: {}",
                    claim.workflow_id.short(),
                    e
                );
            }
            if workflow.status != before {
                events.push(WorkflowEvent::StatusChanged {
                    workflow_id: claim.workflow_id,
                    from: before,
                    to: workflow.status,
                });
            }
            events.push(WorkflowEvent::Progress {
                workflow_id: claim.workflow_id,
                progress: workflow.progress,
            });
        }
        self.emit_all(events);

        for draft in missing {
            self.queue_pending_artifact(PendingArtifact {
                workflow_id: claim.workflow_id,
                task_id: claim.task_id,
                agent: claim.agent.clone(),
                draft,
                note: None,
                attempts: 0,
            })
            .await;
        }
    }

    /// Split reported drafts into those present in the store (with fresh
    /// metadata) and those not there yet.
    async fn locate_artifacts(
        &self,
        drafts: Vec<ArtifactDraft>,
    ) -> (Vec<ArtifactDraft>, Vec<ArtifactDraft>) {
        let mut located = Vec::new();
        let mut missing = Vec::new();
        for draft in drafts {
            match locate(self.inner.artifacts.as_ref(), &draft).await {
                Ok(Some(found)) => located.push(found),
                Ok(None) => missing.push(draft),
                Err(e) => {
                    warn!(
                        "Could not check artifact {}: {}",
                        draft.metadata.relative_path, e
                    );
                    missing.push(draft);
                }
            }
        }
        (located, missing)
    }
}

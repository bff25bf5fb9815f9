//! Workflow status transitions and the approval gates.
//!
//! Every status change goes through `Workflow::transition`, which checks the
//! move against the lifecycle table and records it in `status_history`.
//! The gate operations (clarification, brief approval, completion, CEO
//! decision, pause/resume/abort) are built on top of it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::core::{Task, TaskId, TaskKind};
use crate::error::{Error, Result};

use super::{Brief, FailedTaskNote, Progress, StatusHistoryEntry, Workflow, WorkflowStatus};

/// Outcome of answering clarifying questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationStatus {
    /// Every question is answered; the workflow moved to in_progress.
    Proceeding,
    /// Some questions are still open.
    StillAwaiting,
}

/// Outcome of attaching an approved brief.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BriefApproval {
    pub manager: Option<String>,
    /// Tasks moved into scope, review included. Zero for a no-op.
    pub scheduled: usize,
}

/// Lifecycle table. Paused → prior status is handled by `resume` alone.
fn transition_allowed(from: WorkflowStatus, to: WorkflowStatus) -> bool {
    use WorkflowStatus::*;

    if from.is_terminal() || from == to {
        return false;
    }
    match (from, to) {
        (_, Failed) | (_, Rejected) => true,
        (Paused, _) => false,
        (_, Paused) => true,
        (Planned, InProgress | Executing | WaitingForCeoApproval | Completed) => true,
        (AwaitingClarification, InProgress) => true,
        (InProgress, Executing | WaitingForCeoApproval | Completed) => true,
        (Executing, InProgress | WaitingForCeoApproval | Completed) => true,
        (WaitingForCeoApproval, Completed) => true,
        _ => false,
    }
}

impl Workflow {
    /// Check if a transition to the target status is valid from the current one.
    ///
    /// Reaching `completed` additionally requires coming from
    /// `waiting_for_ceo_approval` whenever a review task exists.
    pub fn can_transition(&self, target: WorkflowStatus) -> bool {
        if !transition_allowed(self.status, target) {
            return false;
        }
        if target == WorkflowStatus::Completed && self.review_task().is_some() {
            return self.status == WorkflowStatus::WaitingForCeoApproval;
        }
        true
    }

    /// Attempt to move the workflow to a new status.
    pub fn transition(&mut self, target: WorkflowStatus) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::invalid_transition(self.status, target));
        }
        self.enter(target);
        Ok(())
    }

    fn enter(&mut self, status: WorkflowStatus) {
        debug!(
            "workflow {} status {} -> {}",
            self.id.short(),
            self.status,
            status
        );
        self.status = status;
        self.status_history.push(StatusHistoryEntry {
            status,
            entered_at: Utc::now(),
        });
        self.touch();
    }

    /// Merge answers into the brief and metadata.
    ///
    /// Keys may be a question id or the question text. Blank answers are
    /// ignored. Moves to `in_progress` once nothing is outstanding.
    pub fn respond_to_clarification(
        &mut self,
        responses: &BTreeMap<String, String>,
    ) -> Result<ClarificationStatus> {
        if self.status != WorkflowStatus::AwaitingClarification {
            return Err(Error::NotAwaitingClarification(self.id));
        }

        let brief = self.brief.get_or_insert_with(Brief::default);
        for (key, answer) in responses {
            let answer = answer.trim();
            if answer.is_empty() {
                continue;
            }
            let key = key.trim();
            let question = brief
                .clarifying_questions
                .iter_mut()
                .find(|q| q.id == key || q.text.trim().eq_ignore_ascii_case(key));
            let stored_key = match question {
                Some(q) => {
                    q.answered = true;
                    q.id.clone()
                }
                None => key.to_string(),
            };
            brief
                .responses
                .insert(stored_key.clone(), answer.to_string());
            self.metadata
                .clarification_responses
                .insert(stored_key, answer.to_string());
        }

        let outstanding = brief.outstanding_questions().count();
        self.touch();
        if outstanding > 0 {
            return Ok(ClarificationStatus::StillAwaiting);
        }
        self.transition(WorkflowStatus::InProgress)?;
        Ok(ClarificationStatus::Proceeding)
    }

    /// Promote held-back specialists once the manager's brief is approved.
    ///
    /// A no-op when there is no brief task or nothing left to promote, so
    /// applying the same approval twice is harmless.
    pub fn attach_brief_approval(&mut self, completed: Brief) -> Result<BriefApproval> {
        let Some(brief_task) = self.brief_task().map(|t| t.id) else {
            return Ok(self.no_op_approval());
        };
        if self.pending_after_approval.is_empty() {
            return Ok(self.no_op_approval());
        }
        if matches!(
            self.status,
            WorkflowStatus::AwaitingClarification | WorkflowStatus::Paused
        ) || self.status.is_terminal()
        {
            return Err(Error::invalid_transition(self.status, "brief_approved"));
        }

        let mut brief = self.brief.take().unwrap_or_default();
        let manager = [completed.requested_agent.trim(), brief.requested_agent.trim()]
            .into_iter()
            .find(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| self.task(&brief_task).map(|t| t.assigned_agent.clone()))
            .unwrap_or_default();

        brief.requested_agent = manager.clone();
        if !completed.content.is_empty() {
            brief.content = completed.content;
        }
        brief.responses.extend(completed.responses);
        brief.approver = completed.approver.or(brief.approver);
        brief.approved_at = Some(completed.approved_at.unwrap_or_else(Utc::now));
        self.brief = Some(brief);
        self.manager = Some(manager.clone());

        let mut promoted = std::mem::take(&mut self.pending_after_approval);
        for task in promoted.iter_mut() {
            if task.dependencies.is_empty() {
                task.dependencies.insert(brief_task);
            }
        }
        let specialists: Vec<TaskId> = promoted
            .iter()
            .filter(|t| t.kind == TaskKind::Specialist)
            .map(|t| t.id)
            .collect();
        let mut scheduled = promoted.len();
        self.tasks.append(&mut promoted);

        if self.review_task().is_none() {
            let deliverable = self
                .metadata
                .deliverable
                .clone()
                .unwrap_or_else(|| self.directive.clone());
            let mut review = Task::new(
                TaskKind::ManagerReview,
                &format!("Review {}", deliverable),
                &format!("Review every deliverable for: {}", self.directive),
                &manager,
            );
            review.dependencies = specialists.into_iter().collect();
            self.tasks.push(review);
            scheduled += 1;
        }

        self.progress = Progress::from_tasks(&self.tasks);
        self.touch();
        Ok(BriefApproval {
            manager: Some(manager),
            scheduled,
        })
    }

    fn no_op_approval(&self) -> BriefApproval {
        BriefApproval {
            manager: self.manager.clone(),
            scheduled: 0,
        }
    }

    /// Recompute progress and apply the completion gate.
    ///
    /// Returns the status entered, if any.
    pub fn update_progress(&mut self) -> Result<Option<WorkflowStatus>> {
        self.progress = Progress::from_tasks(&self.tasks);
        self.touch();

        if !self.status.is_schedulable()
            || !self.pending_after_approval.is_empty()
            || self.tasks.is_empty()
        {
            return Ok(None);
        }

        let work_done = self
            .tasks
            .iter()
            .filter(|t| t.kind != TaskKind::ManagerReview)
            .all(Task::is_completed);
        if !work_done {
            return Ok(None);
        }

        let next = match self.review_task() {
            Some(review) if !review.is_completed() => return Ok(None),
            Some(_) => WorkflowStatus::WaitingForCeoApproval,
            None => WorkflowStatus::Completed,
        };
        self.transition(next)?;
        Ok(Some(next))
    }

    /// Apply the final sign-off.
    pub fn record_ceo_approval(&mut self, approver: &str, approved: bool) -> Result<WorkflowStatus> {
        let target = if approved {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Rejected
        };
        if self.status != WorkflowStatus::WaitingForCeoApproval {
            return Err(Error::invalid_transition(self.status, target));
        }

        self.transition(target)?;
        self.metadata.ceo_approved = approved;
        self.metadata.ceo_approver = Some(approver.to_string());
        self.metadata.ceo_decided_at = Some(Utc::now());
        Ok(target)
    }

    pub fn pause(&mut self) -> Result<()> {
        let from = self.status;
        self.transition(WorkflowStatus::Paused)?;
        self.paused_from = Some(from);
        Ok(())
    }

    /// Restore the status held before pausing, then re-run the completion gate.
    pub fn resume(&mut self) -> Result<WorkflowStatus> {
        if self.status != WorkflowStatus::Paused {
            return Err(Error::invalid_transition(self.status, "resumed"));
        }
        let restored = self.paused_from.take().unwrap_or(WorkflowStatus::InProgress);
        self.enter(restored);
        self.update_progress()?;
        Ok(self.status)
    }

    pub fn abort(&mut self, reason: &str) -> Result<()> {
        self.transition(WorkflowStatus::Failed)?;
        self.paused_from = None;
        self.metadata.abort_reason = Some(reason.to_string());
        Ok(())
    }

    /// Record a task failure for operator attention.
    pub fn note_task_failure(&mut self, task_id: TaskId, error: &str) {
        let title = self
            .task(&task_id)
            .map(|t| t.title.clone())
            .unwrap_or_default();
        self.metadata.failed_tasks.push(FailedTaskNote {
            task_id,
            title,
            error: error.to_string(),
            failed_at: Utc::now(),
        });
        self.touch();
    }
}

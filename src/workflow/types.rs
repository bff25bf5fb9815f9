//! Core workflow type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::analyzer::{DirectivePlan, TaskSpec};
use crate::core::{ArtifactLedger, Task, TaskId, TaskKind};

/// Unique identifier for a workflow instance.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    /// Create a new unique workflow identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Status of a workflow in its lifecycle.
///
/// The happy path runs:
/// 1. Planned / AwaitingClarification - created, possibly gated on answers
/// 2. InProgress - gates passed, tasks may be scheduled
/// 3. Executing - the loop has started work
/// 4. WaitingForCeoApproval - manager review done, final sign-off pending
/// 5. Completed
///
/// Failed, Rejected and Paused are side exits from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// No gate required; schedules like InProgress.
    #[default]
    Planned,
    /// Clarifying questions are outstanding.
    AwaitingClarification,
    InProgress,
    Executing,
    WaitingForCeoApproval,
    Completed,
    /// Aborted by an operator.
    Failed,
    /// Final approval was refused.
    Rejected,
    Paused,
}

impl WorkflowStatus {
    /// Completed, Failed and Rejected never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Rejected
        )
    }

    /// Whether the execution loop may start tasks in this status.
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Planned | WorkflowStatus::InProgress | WorkflowStatus::Executing
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Planned => write!(f, "planned"),
            WorkflowStatus::AwaitingClarification => write!(f, "awaiting_clarification"),
            WorkflowStatus::InProgress => write!(f, "in_progress"),
            WorkflowStatus::Executing => write!(f, "executing"),
            WorkflowStatus::WaitingForCeoApproval => write!(f, "waiting_for_ceo_approval"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Rejected => write!(f, "rejected"),
            WorkflowStatus::Paused => write!(f, "paused"),
        }
    }
}

/// Completion counters over the tasks currently in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percentage: u8,
}

impl Progress {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let total = tasks.len();
        let completed = tasks.iter().filter(|t| t.is_completed()).count();
        let percentage = if total == 0 {
            0
        } else {
            ((completed * 100 + total / 2) / total) as u8
        };
        Self {
            completed,
            total,
            percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarifyingQuestion {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub answered: bool,
}

impl ClarifyingQuestion {
    pub fn new(id: &str, text: &str) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            answered: false,
        }
    }
}

/// Clarification and approval record produced around the manager brief.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Brief {
    pub requested_agent: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub clarifying_questions: Vec<ClarifyingQuestion>,
    /// Question id to answer text.
    #[serde(default)]
    pub responses: BTreeMap<String, String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approver: Option<String>,
}

impl Brief {
    /// A completed brief as handed over by the manager for approval.
    pub fn completed(requested_agent: &str, content: &str, approver: &str) -> Self {
        Self {
            requested_agent: requested_agent.to_string(),
            content: content.to_string(),
            approver: Some(approver.to_string()),
            ..Default::default()
        }
    }

    pub fn outstanding_questions(&self) -> impl Iterator<Item = &ClarifyingQuestion> {
        self.clarifying_questions.iter().filter(|q| !q.answered)
    }
}

/// A failed task surfaced for operator attention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTaskNote {
    pub task_id: TaskId,
    pub title: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    #[serde(default)]
    pub requires_clarification: bool,
    pub deliverable: Option<String>,
    #[serde(default)]
    pub clarification_responses: BTreeMap<String, String>,
    #[serde(default)]
    pub ceo_approved: bool,
    pub ceo_approver: Option<String>,
    pub ceo_decided_at: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    #[serde(default)]
    pub failed_tasks: Vec<FailedTaskNote>,
    pub abort_reason: Option<String>,
    /// Anything else callers attach.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A record of a status change with timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    /// The status that was entered.
    pub status: WorkflowStatus,
    /// When this status was entered.
    pub entered_at: DateTime<Utc>,
}

/// Optional caller context for a new workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    pub project_id: Option<String>,
    pub project_name: Option<String>,
}

/// A directive turned into gated, dependency-ordered work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    /// The original free-text request.
    pub directive: String,
    pub status: WorkflowStatus,
    /// Set on creation for ungated workflows, on brief approval otherwise.
    pub manager: Option<String>,
    pub brief: Option<Brief>,
    /// Tasks in scope, in creation order.
    pub tasks: Vec<Task>,
    /// Specialist tasks held back until the brief is approved.
    #[serde(default)]
    pub pending_after_approval: Vec<Task>,
    pub progress: Progress,
    #[serde(default)]
    pub artifacts: ArtifactLedger,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    #[serde(default)]
    pub status_history: Vec<StatusHistoryEntry>,
    /// Status to restore when a paused workflow resumes.
    pub paused_from: Option<WorkflowStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Materialise an analyzed directive.
    ///
    /// An ambiguous plan yields a single brief task in scope with the
    /// specialist work parked in `pending_after_approval`.
    pub fn new(directive: &str, plan: DirectivePlan, options: CreateOptions) -> Self {
        let now = Utc::now();
        let specialists = materialize(&plan.specialist_tasks);

        let (status, manager, brief, tasks, pending) = match plan.brief_task {
            Some(spec) if plan.requires_clarification => {
                let brief = Brief {
                    requested_agent: plan.manager.clone(),
                    clarifying_questions: plan.questions.clone(),
                    ..Default::default()
                };
                (
                    WorkflowStatus::AwaitingClarification,
                    None,
                    Some(brief),
                    materialize(std::slice::from_ref(&spec)),
                    specialists,
                )
            }
            _ => (
                WorkflowStatus::Planned,
                Some(plan.manager.clone()),
                None,
                specialists,
                Vec::new(),
            ),
        };

        let metadata = WorkflowMetadata {
            requires_clarification: status == WorkflowStatus::AwaitingClarification,
            deliverable: Some(plan.deliverable.clone()),
            project_id: options.project_id,
            project_name: options.project_name,
            ..Default::default()
        };

        Self {
            id: WorkflowId::new(),
            directive: directive.to_string(),
            status,
            manager,
            brief,
            progress: Progress::from_tasks(&tasks),
            tasks,
            pending_after_approval: pending,
            artifacts: ArtifactLedger::new(),
            metadata,
            status_history: vec![StatusHistoryEntry {
                status,
                entered_at: now,
            }],
            paused_from: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == *id)
    }

    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == *id)
    }

    /// Look a task up in scope or among the held-back ones.
    pub fn find_task(&self, id: &TaskId) -> Option<&Task> {
        self.task(id)
            .or_else(|| self.pending_after_approval.iter().find(|t| t.id == *id))
    }

    pub fn brief_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.kind == TaskKind::ManagerBrief)
    }

    pub fn review_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.kind == TaskKind::ManagerReview)
    }

    pub fn has_running_task(&self) -> bool {
        self.tasks.iter().any(|t| t.is_running())
    }

    /// The progress invariant: total counts exactly the tasks in scope.
    pub fn progress_is_consistent(&self) -> bool {
        self.progress == Progress::from_tasks(&self.tasks)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Turn specs into tasks, resolving index-based dependencies to ids.
fn materialize(specs: &[TaskSpec]) -> Vec<Task> {
    let mut tasks: Vec<Task> = specs
        .iter()
        .map(|spec| Task::new(spec.kind, &spec.title, &spec.description, &spec.assigned_agent))
        .collect();
    let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
    for (task, spec) in tasks.iter_mut().zip(specs) {
        for &dep in &spec.depends_on {
            if let Some(id) = ids.get(dep) {
                task.dependencies.insert(*id);
            }
        }
    }
    tasks
}

//! State-change notifications.
//!
//! The orchestrator pushes a `WorkflowEvent` after every state change it
//! makes. Delivery is best effort: a missing or failing sink never affects
//! the workflow.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::core::{ArtifactId, LineageAction, TaskId};
use crate::workflow::{ClarificationStatus, Progress, WorkflowId, WorkflowStatus};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowCreated {
        workflow_id: WorkflowId,
        status: WorkflowStatus,
        manager: Option<String>,
        requires_clarification: bool,
    },
    StatusChanged {
        workflow_id: WorkflowId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
    TaskStarted {
        workflow_id: WorkflowId,
        task_id: TaskId,
        agent: String,
        title: String,
    },
    TaskCompleted {
        workflow_id: WorkflowId,
        task_id: TaskId,
        agent: String,
        title: String,
    },
    TaskFailed {
        workflow_id: WorkflowId,
        task_id: TaskId,
        agent: String,
        error: String,
    },
    ClarificationReceived {
        workflow_id: WorkflowId,
        status: ClarificationStatus,
    },
    BriefApproved {
        workflow_id: WorkflowId,
        manager: Option<String>,
        scheduled: usize,
    },
    CeoDecision {
        workflow_id: WorkflowId,
        approver: String,
        approved: bool,
        status: WorkflowStatus,
    },
    ArtifactRecorded {
        workflow_id: WorkflowId,
        artifact_id: ArtifactId,
        agent: String,
        action: LineageAction,
        relative_path: String,
    },
    Progress {
        workflow_id: WorkflowId,
        progress: Progress,
    },
}

impl WorkflowEvent {
    /// Stable event name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowCreated { .. } => "workflow.created",
            WorkflowEvent::StatusChanged { .. } => "workflow.status_changed",
            WorkflowEvent::TaskStarted { .. } => "task.started",
            WorkflowEvent::TaskCompleted { .. } => "task.completed",
            WorkflowEvent::TaskFailed { .. } => "task.failed",
            WorkflowEvent::ClarificationReceived { .. } => "workflow.clarification_received",
            WorkflowEvent::BriefApproved { .. } => "workflow.brief_approved",
            WorkflowEvent::CeoDecision { .. } => "workflow.ceo_decision",
            WorkflowEvent::ArtifactRecorded { .. } => "artifact.recorded",
            WorkflowEvent::Progress { .. } => "workflow.progress",
        }
    }

    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            WorkflowEvent::WorkflowCreated { workflow_id, .. }
            | WorkflowEvent::StatusChanged { workflow_id, .. }
            | WorkflowEvent::TaskStarted { workflow_id, .. }
            | WorkflowEvent::TaskCompleted { workflow_id, .. }
            | WorkflowEvent::TaskFailed { workflow_id, .. }
            | WorkflowEvent::ClarificationReceived { workflow_id, .. }
            | WorkflowEvent::BriefApproved { workflow_id, .. }
            | WorkflowEvent::CeoDecision { workflow_id, .. }
            | WorkflowEvent::ArtifactRecorded { workflow_id, .. }
            | WorkflowEvent::Progress { workflow_id, .. } => *workflow_id,
        }
    }
}

/// Transport for events (websocket hub, message bus, test recorder).
pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: &str, payload: &serde_json::Value) -> Result<()>;
}

/// Shields the orchestrator from the sink.
#[derive(Clone, Default)]
pub struct NotificationBridge {
    sink: Option<Arc<dyn NotificationSink>>,
}

impl NotificationBridge {
    /// No transport attached; every emit is a no-op.
    pub fn headless() -> Self {
        Self { sink: None }
    }

    pub fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn is_headless(&self) -> bool {
        self.sink.is_none()
    }

    /// Deliver an event. Always returns `true`; failures are only logged.
    pub fn safe_emit(&self, event: &WorkflowEvent) -> bool {
        let Some(sink) = &self.sink else {
            return true;
        };
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not serialize {} event: {}", event.name(), e);
                return true;
            }
        };
        match sink.emit(event.name(), &payload) {
            Ok(()) => trace!("Emitted {} for {}", event.name(), event.workflow_id().short()),
            Err(e) => warn!("Notification {} failed: {}", event.name(), e),
        }
        true
    }
}

/// An event as delivered to broadcast subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Fans events out over a tokio broadcast channel.
pub struct BroadcastSink {
    tx: broadcast::Sender<EmittedEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EmittedEvent> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn emit(&self, event: &str, payload: &serde_json::Value) -> Result<()> {
        // No subscribers is not an error.
        let _ = self.tx.send(EmittedEvent {
            name: event.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

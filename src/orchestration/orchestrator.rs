//! The orchestrator façade: command and query API over shared workflow state.
//!
//! All workflows live in one map behind a `tokio::sync::RwLock`. Commands
//! take the write lock, mutate one workflow through its state machine,
//! release the lock, then emit notifications and checkpoint. The lock is
//! never held across an executor call or a store write.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::DirectiveAnalyzer;
use crate::config::{
    Config, DEFAULT_ARTIFACT_CHECK_LIMIT, DEFAULT_TASK_TIMEOUT_SECS, DEFAULT_TICK_INTERVAL_MS,
};
use crate::core::{
    Artifact, ArtifactDraft, ArtifactId, LineageAction, Task, TaskGraph, TaskId,
};
use crate::orchestration::executor::Executor;
use crate::orchestration::lineage::{
    resolve_pending, ArtifactStore, FsArtifactStore, PendingArtifact, PendingArtifacts,
};
use crate::orchestration::notify::{NotificationBridge, NotificationSink, WorkflowEvent};
use crate::roster::Roster;
use crate::state::{MemoryStore, WorkflowStore};
use crate::workflow::{
    Brief, BriefApproval, ClarificationStatus, CreateOptions, Progress, Workflow, WorkflowId,
    WorkflowStatus,
};
use crate::{Error, Result};

/// Returned by `create_workflow`.
#[derive(Debug, Clone)]
pub struct CreatedWorkflow {
    pub workflow_id: WorkflowId,
    pub workflow: Workflow,
}

pub(super) struct Inner {
    pub(super) workflows: RwLock<HashMap<WorkflowId, Workflow>>,
    pub(super) analyzer: DirectiveAnalyzer,
    pub(super) executor: Option<Arc<dyn Executor>>,
    pub(super) store: Arc<dyn WorkflowStore>,
    pub(super) artifacts: Arc<dyn ArtifactStore>,
    pub(super) notifier: NotificationBridge,
    pub(super) pending_artifacts: Mutex<PendingArtifacts>,
    /// Workflows whose latest state has not reached the store.
    pub(super) dirty: Mutex<HashSet<WorkflowId>>,
    /// Held for the duration of a tick; `try_lock` makes ticks single-flight.
    pub(super) tick_guard: Mutex<()>,
    pub(super) cancel: CancellationToken,
    pub(super) task_timeout: Duration,
    pub(super) tick_interval: Duration,
    /// Store checks before a missing artifact is dropped.
    pub(super) artifact_check_limit: u32,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    pub(super) inner: Arc<Inner>,
}

pub struct OrchestratorBuilder {
    roster: Roster,
    executor: Option<Arc<dyn Executor>>,
    store: Option<Arc<dyn WorkflowStore>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    sink: Option<Arc<dyn NotificationSink>>,
    task_timeout: Duration,
    tick_interval: Duration,
    artifact_check_limit: u32,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            roster: Roster::default(),
            executor: None,
            store: None,
            artifacts: None,
            sink: None,
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            artifact_check_limit: DEFAULT_ARTIFACT_CHECK_LIMIT,
        }
    }
}

impl OrchestratorBuilder {
    /// Timeouts and roster from the config file.
    pub fn from_config(config: &Config) -> Self {
        Self::default()
            .roster(Roster::from_config(config))
            .task_timeout(config.task_timeout())
            .tick_interval(config.tick_interval())
            .artifact_check_limit(config.artifact_check_limit)
    }

    pub fn roster(mut self, roster: Roster) -> Self {
        self.roster = roster;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn artifact_store(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn artifact_check_limit(mut self, limit: u32) -> Self {
        self.artifact_check_limit = limit.max(1);
        self
    }

    pub fn build(self) -> Orchestrator {
        let notifier = match self.sink {
            Some(sink) => NotificationBridge::with_sink(sink),
            None => NotificationBridge::headless(),
        };
        let artifacts = self.artifacts.unwrap_or_else(|| {
            Arc::new(FsArtifactStore::new(
                std::env::temp_dir().join("overseer-artifacts"),
            ))
        });
        Orchestrator {
            inner: Arc::new(Inner {
                workflows: RwLock::new(HashMap::new()),
                analyzer: DirectiveAnalyzer::new(self.roster),
                executor: self.executor,
                store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
                artifacts,
                notifier,
                pending_artifacts: Mutex::new(PendingArtifacts::default()),
                dirty: Mutex::new(HashSet::new()),
                tick_guard: Mutex::new(()),
                cancel: CancellationToken::new(),
                task_timeout: self.task_timeout,
                tick_interval: self.tick_interval,
                artifact_check_limit: self.artifact_check_limit,
            }),
        }
    }
}

/// Handle to the background driver, used for graceful shutdown.
pub struct DriverHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl DriverHandle {
    /// Signal the driver to stop after its current tick.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the driver loop to exit.
    pub async fn stopped(self) {
        if let Err(e) = self.join.await {
            warn!("Driver task ended abnormally: {}", e);
        }
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn roster(&self) -> &Roster {
        self.inner.analyzer.roster()
    }

    pub fn artifact_root(&self) -> PathBuf {
        self.inner.artifacts.root().to_path_buf()
    }

    pub(super) fn emit_all(&self, events: Vec<WorkflowEvent>) {
        for event in &events {
            self.inner.notifier.safe_emit(event);
        }
    }

    /// Apply `f` to one workflow under the write lock.
    ///
    /// A status change and a progress snapshot are appended to the returned
    /// events automatically.
    async fn mutate<T>(
        &self,
        id: WorkflowId,
        f: impl FnOnce(&mut Workflow, &mut Vec<WorkflowEvent>) -> Result<T>,
    ) -> Result<T> {
        let mut events = Vec::new();
        let value = {
            let mut workflows = self.inner.workflows.write().await;
            let workflow = workflows
                .get_mut(&id)
                .ok_or(Error::WorkflowNotFound(id))?;
            let before = workflow.status;
            let value = f(workflow, &mut events)?;
            if workflow.status != before {
                events.push(WorkflowEvent::StatusChanged {
                    workflow_id: id,
                    from: before,
                    to: workflow.status,
                });
            }
            events.push(WorkflowEvent::Progress {
                workflow_id: id,
                progress: workflow.progress,
            });
            value
        };
        self.emit_all(events);
        self.checkpoint(&[id]).await;
        Ok(value)
    }

    // Command API

    /// Analyze a directive and register the resulting workflow.
    pub async fn create_workflow(
        &self,
        directive: &str,
        options: CreateOptions,
    ) -> Result<CreatedWorkflow> {
        if self.inner.executor.is_none() {
            return Err(Error::OrchestratorUnavailable);
        }
        let directive = directive.trim();
        if directive.is_empty() {
            return Err(Error::Validation("directive is empty".to_string()));
        }

        let plan = self.inner.analyzer.analyze(directive);
        let workflow = Workflow::new(directive, plan, options);
        let all_tasks: Vec<Task> = workflow
            .tasks
            .iter()
            .chain(&workflow.pending_after_approval)
            .cloned()
            .collect();
        TaskGraph::build(&all_tasks).validate()?;

        let id = workflow.id;
        info!(
            "Created workflow {} ({}) with {} tasks, {} held for approval",
            id.short(),
            workflow.status,
            workflow.tasks.len(),
            workflow.pending_after_approval.len()
        );
        let event = WorkflowEvent::WorkflowCreated {
            workflow_id: id,
            status: workflow.status,
            manager: workflow.manager.clone(),
            requires_clarification: workflow.metadata.requires_clarification,
        };
        self.inner
            .workflows
            .write()
            .await
            .insert(id, workflow.clone());
        self.emit_all(vec![event]);
        self.checkpoint(&[id]).await;

        Ok(CreatedWorkflow {
            workflow_id: id,
            workflow,
        })
    }

    pub async fn respond_to_clarification(
        &self,
        id: WorkflowId,
        responses: BTreeMap<String, String>,
    ) -> Result<ClarificationStatus> {
        let status = self
            .mutate(id, |workflow, events| {
                let status = workflow.respond_to_clarification(&responses)?;
                events.push(WorkflowEvent::ClarificationReceived {
                    workflow_id: id,
                    status,
                });
                Ok(status)
            })
            .await?;
        info!("Workflow {} clarification: {:?}", id.short(), status);
        Ok(status)
    }

    pub async fn attach_brief_approval(&self, id: WorkflowId, brief: Brief) -> Result<BriefApproval> {
        let approval = self
            .mutate(id, |workflow, events| {
                let approval = workflow.attach_brief_approval(brief)?;
                if approval.scheduled > 0 {
                    events.push(WorkflowEvent::BriefApproved {
                        workflow_id: id,
                        manager: approval.manager.clone(),
                        scheduled: approval.scheduled,
                    });
                }
                Ok(approval)
            })
            .await?;
        info!(
            "Workflow {} brief approved: {} tasks scheduled",
            id.short(),
            approval.scheduled
        );
        Ok(approval)
    }

    pub async fn record_ceo_approval(
        &self,
        id: WorkflowId,
        approver: &str,
        approved: bool,
    ) -> Result<WorkflowStatus> {
        let status = self
            .mutate(id, |workflow, events| {
                let status = workflow.record_ceo_approval(approver, approved)?;
                events.push(WorkflowEvent::CeoDecision {
                    workflow_id: id,
                    approver: approver.to_string(),
                    approved,
                    status,
                });
                Ok(status)
            })
            .await?;
        info!("Workflow {} final decision by {}: {}", id.short(), approver, status);
        Ok(status)
    }

    pub async fn pause_workflow(&self, id: WorkflowId) -> Result<WorkflowStatus> {
        self.mutate(id, |workflow, _| {
            workflow.pause()?;
            Ok(workflow.status)
        })
        .await
    }

    pub async fn resume_workflow(&self, id: WorkflowId) -> Result<WorkflowStatus> {
        self.mutate(id, |workflow, _| workflow.resume()).await
    }

    /// Fail a workflow on operator request. Running tasks finish but nothing new starts.
    pub async fn abort_workflow(&self, id: WorkflowId, reason: &str) -> Result<WorkflowStatus> {
        self.mutate(id, |workflow, _| {
            workflow.abort(reason)?;
            Ok(workflow.status)
        })
        .await
    }

    /// Register an artifact produced outside the execution loop.
    pub async fn record_artifact(
        &self,
        id: WorkflowId,
        agent_name: &str,
        task_id: TaskId,
        draft: ArtifactDraft,
        note: Option<String>,
    ) -> Result<(ArtifactId, LineageAction)> {
        self.mutate(id, |workflow, events| {
            if workflow.task(&task_id).is_none() {
                return Err(Error::TaskNotFound {
                    workflow: id,
                    task: task_id,
                });
            }
            let relative_path = draft.metadata.relative_path.clone();
            let (artifact_id, action) = workflow.artifacts.record(agent_name, task_id, draft, note);
            if let Some(task) = workflow.task_mut(&task_id) {
                if !task.artifacts.contains(&artifact_id) {
                    task.artifacts.push(artifact_id);
                }
            }
            workflow.touch();
            events.push(WorkflowEvent::ArtifactRecorded {
                workflow_id: id,
                artifact_id,
                agent: agent_name.to_string(),
                action,
                relative_path,
            });
            Ok((artifact_id, action))
        })
        .await
    }

    // Query API

    pub async fn get_workflow_status(&self, id: WorkflowId) -> Option<Workflow> {
        self.inner.workflows.read().await.get(&id).cloned()
    }

    pub async fn get_task_status(&self, id: WorkflowId, task_id: TaskId) -> Option<Task> {
        self.inner
            .workflows
            .read()
            .await
            .get(&id)
            .and_then(|w| w.find_task(&task_id))
            .cloned()
    }

    /// Stored and in-memory workflows, in creation order. Memory wins on conflict.
    pub async fn get_all_workflows(&self) -> Result<Vec<Workflow>> {
        let stored = self.inner.store.load_all().await?;
        let mut merged: HashMap<WorkflowId, Workflow> =
            stored.into_iter().map(|w| (w.id, w)).collect();
        for (id, workflow) in self.inner.workflows.read().await.iter() {
            merged.insert(*id, workflow.clone());
        }
        let mut workflows: Vec<Workflow> = merged.into_values().collect();
        workflows.sort_by_key(|w| w.created_at);
        Ok(workflows)
    }

    /// Every artifact the agent created, across workflows in creation order.
    pub async fn get_agent_artifacts_with_lineage(&self, agent_name: &str) -> Vec<Artifact> {
        let workflows = self.inner.workflows.read().await;
        let mut ordered: Vec<&Workflow> = workflows.values().collect();
        ordered.sort_by_key(|w| w.created_at);
        ordered
            .into_iter()
            .flat_map(|w| w.artifacts.for_agent(agent_name))
            .collect()
    }

    pub async fn pending_artifact_count(&self) -> usize {
        self.inner.pending_artifacts.lock().await.len()
    }

    // Lifecycle

    /// Load stored workflows not already in memory.
    ///
    /// Tasks persisted as running were interrupted; they go back to pending
    /// and will run again.
    pub async fn hydrate(&self) -> Result<usize> {
        let stored = self.inner.store.load_all().await?;
        let mut loaded = 0;
        let mut reset_ids = Vec::new();
        {
            let mut workflows = self.inner.workflows.write().await;
            for mut workflow in stored {
                if workflows.contains_key(&workflow.id) {
                    continue;
                }
                let mut reset = 0;
                for task in workflow.tasks.iter_mut().filter(|t| t.is_running()) {
                    task.reset();
                    reset += 1;
                }
                if reset > 0 {
                    info!(
                        "Workflow {}: {} interrupted tasks reset to pending",
                        workflow.id.short(),
                        reset
                    );
                    workflow.progress = Progress::from_tasks(&workflow.tasks);
                    workflow.touch();
                    reset_ids.push(workflow.id);
                }
                workflows.insert(workflow.id, workflow);
                loaded += 1;
            }
        }
        debug!("Hydrated {} workflows", loaded);
        if !reset_ids.is_empty() {
            self.checkpoint(&reset_ids).await;
        }
        Ok(loaded)
    }

    /// Persist the given workflows plus any left dirty by earlier failures.
    ///
    /// Never fails: a failed save is logged and retried next time.
    pub async fn checkpoint(&self, ids: &[WorkflowId]) {
        let mut dirty = self.inner.dirty.lock().await;
        dirty.extend(ids.iter().copied());
        if dirty.is_empty() {
            return;
        }

        let snapshots: Vec<Workflow> = {
            let workflows = self.inner.workflows.read().await;
            dirty.iter().filter_map(|id| workflows.get(id).cloned()).collect()
        };
        dirty.retain(|id| snapshots.iter().any(|w| w.id == *id));

        for workflow in snapshots {
            match self.inner.store.save(&workflow).await {
                Ok(()) => {
                    dirty.remove(&workflow.id);
                }
                Err(e) => warn!(
                    "PersistenceWriteFailure for workflow {}: {}",
                    workflow.id.short(),
                    e
                ),
            }
        }
    }

    pub async fn dirty_count(&self) -> usize {
        self.inner.dirty.lock().await.len()
    }

    /// Register pending artifacts whose files have since appeared.
    ///
    /// Items the store rejects outright, or still missing after
    /// `artifact_check_limit` checks, are dropped. Returns how many were
    /// recorded. Safe to call repeatedly.
    pub async fn reconcile_pending_artifacts_once(&self) -> usize {
        let pending = self.inner.pending_artifacts.lock().await.take();
        if pending.is_empty() {
            return 0;
        }
        let (found, missing) = resolve_pending(self.inner.artifacts.as_ref(), pending).await;
        let limit = self.inner.artifact_check_limit;
        let (retry, expired): (Vec<_>, Vec<_>) =
            missing.into_iter().partition(|p| p.attempts < limit);
        for item in &expired {
            warn!(
                "Giving up on artifact {} from {} after {} checks",
                item.draft.metadata.relative_path, item.agent, item.attempts
            );
        }
        self.inner.pending_artifacts.lock().await.restore(retry);
        if found.is_empty() {
            return 0;
        }

        let mut recovered = 0;
        let mut touched = Vec::new();
        let mut events = Vec::new();
        {
            let mut workflows = self.inner.workflows.write().await;
            for item in found {
                let Some(workflow) = workflows.get_mut(&item.workflow_id) else {
                    debug!("Dropping artifact for unknown workflow {}", item.workflow_id.short());
                    continue;
                };
                events.push(register_artifact(workflow, item));
                touched.push(workflow.id);
                recovered += 1;
            }
        }
        info!("Reconciled {} pending artifacts", recovered);
        self.emit_all(events);
        self.checkpoint(&touched).await;
        recovered
    }

    pub(super) async fn queue_pending_artifact(&self, pending: PendingArtifact) {
        debug!(
            "Artifact {} not in store yet, queued for reconciliation",
            pending.draft.metadata.relative_path
        );
        self.inner.pending_artifacts.lock().await.push(pending);
    }

    /// Tick `process_next_task` and reconciliation until shutdown.
    pub fn spawn_driver(&self) -> DriverHandle {
        let cancel = self.inner.cancel.child_token();
        let cancel_clone = cancel.clone();
        let orchestrator = self.clone();

        debug!("Orchestrator::spawn_driver interval={:?}", self.inner.tick_interval);

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(orchestrator.inner.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        debug!("Driver cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = orchestrator.process_next_task().await {
                            warn!("Execution tick failed: {}", e);
                        }
                        orchestrator.reconcile_pending_artifacts_once().await;
                    }
                }
            }
        });

        DriverHandle { cancel, join }
    }

    /// Stop the driver, abort in-flight executors and flush dirty workflows.
    pub async fn shutdown(&self) {
        info!("Orchestrator shutting down");
        self.inner.cancel.cancel();
        // Wait for an in-flight tick to record its results.
        let _guard = self.inner.tick_guard.lock().await;
        self.checkpoint(&[]).await;
        let dirty = self.dirty_count().await;
        if dirty > 0 {
            warn!("{} workflows could not be persisted at shutdown", dirty);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

/// Record a located artifact in its workflow and link it to its task.
pub(super) fn register_artifact(workflow: &mut Workflow, item: PendingArtifact) -> WorkflowEvent {
    let relative_path = item.draft.metadata.relative_path.clone();
    let (artifact_id, action) =
        workflow
            .artifacts
            .record(&item.agent, item.task_id, item.draft, item.note);
    if let Some(task) = workflow.task_mut(&item.task_id) {
        if !task.artifacts.contains(&artifact_id) {
            task.artifacts.push(artifact_id);
        }
    }
    workflow.touch();
    WorkflowEvent::ArtifactRecorded {
        workflow_id: workflow.id,
        artifact_id,
        agent: item.agent,
        action,
        relative_path,
    }
}

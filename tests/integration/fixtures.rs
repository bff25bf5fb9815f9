//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted executor whose behavior is chosen per task title
//! - A sink that records every emitted event
//! - A workflow store that can be made to fail on demand
//! - Driving the execution loop until a workflow settles

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use overseer::core::{ArtifactDraft, ArtifactMetadata};
use overseer::orchestration::{
    ArtifactStore, ExecutionRequest, Executor, FsArtifactStore, NotificationSink, Orchestrator,
    TaskOutcome,
};
use overseer::state::{MemoryStore, WorkflowStore};
use overseer::workflow::{Brief, Workflow, WorkflowId, WorkflowStatus};
use overseer::{Error, Result};

/// How the scripted executor treats a task.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write the default artifact and succeed.
    Write,
    /// Fail with the given message.
    Fail(String),
    /// Sleep far longer than any test timeout.
    Stall,
    /// Report the default artifact without writing it.
    ReportMissing,
}

/// Executor whose behavior is picked by a substring of the task title.
pub struct ScriptedExecutor {
    store: Arc<dyn ArtifactStore>,
    rules: Vec<(String, Behavior)>,
    calls: StdMutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            rules: Vec::new(),
            calls: StdMutex::new(Vec::new()),
        }
    }

    /// Tasks whose title contains `needle` get `behavior`. First match wins.
    pub fn on(mut self, needle: &str, behavior: Behavior) -> Self {
        self.rules.push((needle.to_string(), behavior));
        self
    }

    /// Titles of every task executed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn behavior_for(&self, title: &str) -> Behavior {
        self.rules
            .iter()
            .find(|(needle, _)| title.contains(needle.as_str()))
            .map(|(_, b)| b.clone())
            .unwrap_or(Behavior::Write)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<TaskOutcome> {
        self.calls.lock().unwrap().push(request.task.title.clone());
        let relative_path = request.default_artifact_path();

        match self.behavior_for(&request.task.title) {
            Behavior::Write => {
                let body = format!("# {}\n\nby {}\n", request.task.title, request.task.assigned_agent);
                let info = self.store.write(&relative_path, body.as_bytes()).await?;
                Ok(TaskOutcome {
                    summary: format!("done: {}", request.task.title),
                    artifacts: vec![ArtifactDraft::new(
                        &request.task.title,
                        info.into_metadata(&relative_path),
                    )],
                })
            }
            Behavior::Fail(message) => Err(Error::TaskExecution(message)),
            Behavior::Stall => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(TaskOutcome::default())
            }
            Behavior::ReportMissing => Ok(TaskOutcome {
                summary: format!("reported: {}", request.task.title),
                artifacts: vec![ArtifactDraft::new(
                    &request.task.title,
                    ArtifactMetadata {
                        path: self.store.root().join(&relative_path),
                        relative_path,
                        size: 0,
                        content_type: "text/markdown".to_string(),
                    },
                )],
            }),
        }
    }
}

/// Sink that keeps every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: StdMutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingSink {
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn payloads(&self, name: &str) -> Vec<serde_json::Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn emit(&self, event: &str, payload: &serde_json::Value) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), payload.clone()));
        Ok(())
    }
}

/// Memory store whose writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl WorkflowStore for FlakyStore {
    async fn load_all(&self) -> Result<Vec<Workflow>> {
        self.inner.load_all().await
    }

    async fn save(&self, workflow: &Workflow) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::PersistenceWrite("disk full".to_string()));
        }
        self.inner.save(workflow).await
    }
}

/// An orchestrator wired to temporary storage and a recording sink.
pub struct Harness {
    pub temp_dir: TempDir,
    pub artifacts: Arc<FsArtifactStore>,
    pub executor: Arc<ScriptedExecutor>,
    pub sink: Arc<RecordingSink>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    /// Default harness: every task writes its artifact and succeeds.
    pub fn new() -> Self {
        Self::with_rules(|executor| executor)
    }

    /// Harness with executor rules, e.g. `|e| e.on("Implement", Behavior::Fail(..))`.
    pub fn with_rules(configure: impl FnOnce(ScriptedExecutor) -> ScriptedExecutor) -> Self {
        Self::build(configure, Arc::new(MemoryStore::new()), Duration::from_secs(5))
    }

    pub fn build(
        configure: impl FnOnce(ScriptedExecutor) -> ScriptedExecutor,
        store: Arc<dyn WorkflowStore>,
        task_timeout: Duration,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let artifacts = Arc::new(FsArtifactStore::new(temp_dir.path().join("artifacts")));
        let executor = Arc::new(configure(ScriptedExecutor::new(artifacts.clone())));
        let sink = Arc::new(RecordingSink::default());

        let orchestrator = Orchestrator::builder()
            .executor(executor.clone())
            .store(store)
            .artifact_store(artifacts.clone())
            .sink(sink.clone())
            .task_timeout(task_timeout)
            .tick_interval(Duration::from_millis(10))
            .build();

        Self {
            temp_dir,
            artifacts,
            executor,
            sink,
            orchestrator,
        }
    }

    pub fn artifact_root(&self) -> PathBuf {
        self.temp_dir.path().join("artifacts")
    }

    pub async fn create(&self, directive: &str) -> WorkflowId {
        self.orchestrator
            .create_workflow(directive, Default::default())
            .await
            .expect("workflow should be created")
            .workflow_id
    }

    pub async fn workflow(&self, id: WorkflowId) -> Workflow {
        self.orchestrator
            .get_workflow_status(id)
            .await
            .expect("workflow should exist")
    }

    /// Tick until nothing more runs or `max_ticks` is reached.
    pub async fn drain(&self, max_ticks: usize) -> usize {
        let mut total = 0;
        for _ in 0..max_ticks {
            let processed = self
                .orchestrator
                .process_next_task()
                .await
                .expect("tick should succeed");
            if processed == 0 {
                break;
            }
            total += processed;
        }
        total
    }

    /// Answer every outstanding clarifying question.
    pub async fn answer_all(&self, id: WorkflowId) {
        let workflow = self.workflow(id).await;
        let responses: BTreeMap<String, String> = workflow
            .brief
            .iter()
            .flat_map(|b| b.outstanding_questions())
            .map(|q| (q.id.clone(), format!("answer to {}", q.id)))
            .collect();
        self.orchestrator
            .respond_to_clarification(id, responses)
            .await
            .expect("answers should be accepted");
    }

    /// Approve the brief as the workflow's own manager.
    pub async fn approve_brief(&self, id: WorkflowId) -> usize {
        let workflow = self.workflow(id).await;
        let manager = workflow
            .brief
            .as_ref()
            .map(|b| b.requested_agent.clone())
            .unwrap_or_default();
        self.orchestrator
            .attach_brief_approval(id, Brief::completed(&manager, "One page, hero and signup", "ceo"))
            .await
            .expect("brief should be approved")
            .scheduled
    }

    pub fn event_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for name in self.sink.names() {
            *counts.entry(name).or_insert(0) += 1;
        }
        counts
    }
}

/// Poll until the workflow reaches `status` or the deadline passes.
pub async fn wait_for_status(
    orchestrator: &Orchestrator,
    id: WorkflowId,
    status: WorkflowStatus,
    deadline: Duration,
) -> bool {
    let poll = async {
        loop {
            if let Some(w) = orchestrator.get_workflow_status(id).await {
                if w.status == status {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(deadline, poll).await.is_ok()
}

//! Task executors.
//!
//! An `Executor` performs one task on behalf of its assigned worker and
//! reports a summary plus the artifacts it produced. The orchestrator never
//! calls an executor directly; it goes through [`run_with_deadline`] so every
//! call is bounded in time and aborted on shutdown.
//!
//! Two implementations ship with the crate:
//! - [`SimulatedExecutor`]: writes a short markdown note per task
//! - [`CommandExecutor`]: runs an external command per task

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{ArtifactDraft, ArtifactMetadata, Task, TaskKind};
use crate::orchestration::lineage::{content_type_for, ArtifactStore};
use crate::workflow::{Brief, WorkflowId};
use crate::{Error, Result};

/// Prefix of a stdout line that reports a produced file.
const ARTIFACT_LINE_PREFIX: &str = "artifact:";

/// Everything a worker gets to see about its task.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub workflow_id: WorkflowId,
    pub task: Task,
    pub directive: String,
    pub brief: Option<Brief>,
}

impl ExecutionRequest {
    /// Path the task's main deliverable is expected at.
    pub fn default_artifact_path(&self) -> String {
        format!("{}/{}.md", self.workflow_id.short(), slug(&self.task.title))
    }

    /// Instructions handed to an external worker.
    pub fn prompt(&self) -> String {
        let mut prompt = format!(
            "You are {}. Directive: {}\nTask ({}): {}\n{}",
            self.task.assigned_agent,
            self.directive,
            self.task.kind,
            self.task.title,
            self.task.description
        );
        if let Some(brief) = &self.brief {
            if !brief.content.is_empty() {
                prompt.push_str(&format!("\nBrief: {}", brief.content));
            }
            for (key, answer) in &brief.responses {
                prompt.push_str(&format!("\n{}: {}", key, answer));
            }
        }
        prompt.push_str(&format!(
            "\nSave your deliverable to {}",
            self.default_artifact_path()
        ));
        prompt
    }
}

/// What a finished task reports back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutcome {
    pub summary: String,
    pub artifacts: Vec<ArtifactDraft>,
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<TaskOutcome>;
}

/// Run an executor with a deadline, giving up early when `cancel` fires.
pub async fn run_with_deadline(
    executor: &dyn Executor,
    request: ExecutionRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<TaskOutcome> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = tokio::time::timeout(timeout, executor.execute(request)) => {
            result.map_err(|_| Error::Timeout(timeout))?
        }
    }
}

/// Lowercase, dash-separated file stem for a title.
pub fn slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug.to_string()
    }
}

/// Headless worker: waits a little, then writes a markdown note per task.
pub struct SimulatedExecutor {
    delay: Duration,
    store: Arc<dyn ArtifactStore>,
}

impl SimulatedExecutor {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            delay: Duration::from_millis(crate::config::DEFAULT_SIMULATED_DELAY_MS),
            store,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn render(request: &ExecutionRequest) -> String {
        let task = &request.task;
        let mut body = format!("# {}\n\n{}\n\n", task.title, task.description);
        match task.kind {
            TaskKind::ManagerBrief => {
                if let Some(brief) = &request.brief {
                    for question in &brief.clarifying_questions {
                        let answer = brief
                            .responses
                            .get(&question.id)
                            .map(String::as_str)
                            .unwrap_or("(unanswered)");
                        body.push_str(&format!("- {} {}\n", question.text, answer));
                    }
                }
            }
            TaskKind::ManagerReview => {
                body.push_str("Reviewed all deliverables for the directive.\n");
            }
            TaskKind::Specialist => {
                body.push_str(&format!("Directive: {}\n", request.directive));
            }
        }
        body.push_str(&format!("\n_Prepared by {}._\n", task.assigned_agent));
        body
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<TaskOutcome> {
        debug!(
            "SimulatedExecutor: {} working on '{}'",
            request.task.assigned_agent, request.task.title
        );
        tokio::time::sleep(self.delay).await;

        let relative_path = request.default_artifact_path();
        let info = self
            .store
            .write(&relative_path, Self::render(&request).as_bytes())
            .await?;
        Ok(TaskOutcome {
            summary: format!("{} finished '{}'", request.task.assigned_agent, request.task.title),
            artifacts: vec![ArtifactDraft::new(
                &request.task.title,
                info.into_metadata(&relative_path),
            )],
        })
    }
}

/// Runs `<program> [args..] <prompt>` in the artifact root for every task.
///
/// The child sees the task context in `OVERSEER_*` environment variables.
/// Lines of stdout starting with `artifact:` name produced files relative to
/// the artifact root; without any, the default artifact path is expected.
pub struct CommandExecutor {
    program: PathBuf,
    args: Vec<String>,
    workdir: PathBuf,
}

impl CommandExecutor {
    /// Parse a whitespace-separated command line and resolve the program with `which`.
    pub fn new(command_line: &str, workdir: impl Into<PathBuf>) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::Validation("executor command is empty".to_string()))?;
        let program = which::which(program)
            .map_err(|e| Error::TaskExecution(format!("command '{}' not found: {}", program, e)))?;
        Ok(Self {
            program,
            args: parts.map(str::to_string).collect(),
            workdir: workdir.into(),
        })
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn reported_artifacts(stdout: &str, request: &ExecutionRequest) -> Vec<ArtifactDraft> {
        let mut paths: Vec<String> = stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix(ARTIFACT_LINE_PREFIX))
            .map(|rest| rest.trim().to_string())
            .filter(|path| !path.is_empty())
            .collect();
        if paths.is_empty() {
            paths.push(request.default_artifact_path());
        }
        paths
            .into_iter()
            .map(|relative_path| {
                let name = relative_path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&relative_path)
                    .to_string();
                ArtifactDraft::new(
                    &name,
                    ArtifactMetadata {
                        path: PathBuf::from(&relative_path),
                        content_type: content_type_for(&relative_path).to_string(),
                        relative_path,
                        size: 0,
                    },
                )
            })
            .collect()
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<TaskOutcome> {
        debug!(
            "CommandExecutor: {} for task {}",
            self.program.display(),
            request.task.id.short()
        );
        tokio::fs::create_dir_all(&self.workdir).await?;
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(request.prompt())
            .current_dir(&self.workdir)
            .env("OVERSEER_WORKFLOW_ID", request.workflow_id.to_string())
            .env("OVERSEER_TASK_ID", request.task.id.to_string())
            .env("OVERSEER_AGENT", &request.task.assigned_agent)
            .env("OVERSEER_ARTIFACT_PATH", request.default_artifact_path())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!(
                    "command exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            warn!("Task {} failed: {}", request.task.id.short(), message);
            return Err(Error::TaskExecution(message));
        }

        let summary = stdout
            .lines()
            .filter(|line| !line.trim().starts_with(ARTIFACT_LINE_PREFIX))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();
        Ok(TaskOutcome {
            summary,
            artifacts: Self::reported_artifacts(&stdout, &request),
        })
    }
}

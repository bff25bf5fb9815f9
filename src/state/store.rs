//! Workflow persistence: one JSON record per workflow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::workflow::{Progress, Workflow, WorkflowId, WorkflowStatus};
use crate::{Error, Result};

/// What gets written for a workflow. The summary fields duplicate the
/// snapshot so a listing can be read without trusting the nested shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: WorkflowId,
    pub status: WorkflowStatus,
    pub progress: Progress,
    pub updated_at: DateTime<Utc>,
    pub workflow: Workflow,
}

impl From<&Workflow> for WorkflowRecord {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            status: workflow.status,
            progress: workflow.progress,
            updated_at: workflow.updated_at,
            workflow: workflow.clone(),
        }
    }
}

/// Backing store for workflow snapshots.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Every stored workflow, oldest first.
    async fn load_all(&self) -> Result<Vec<Workflow>>;

    /// Insert or replace the snapshot of one workflow.
    async fn save(&self, workflow: &Workflow) -> Result<()>;
}

/// Directory of `<workflow id>.json` files.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &WorkflowId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn write_record(&self, record: &WorkflowRecord) -> Result<PathBuf> {
        let contents = serde_json::to_string_pretty(record)?;
        if !fs::try_exists(&self.dir).await? {
            debug!("Creating workflow directory: {}", self.dir.display());
            fs::create_dir_all(&self.dir).await?;
        }
        let path = self.path_for(&record.id);
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, contents).await?;
        fs::rename(&temp_path, &path).await?;
        Ok(path)
    }
}

#[async_trait]
impl WorkflowStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<Workflow>> {
        debug!("JsonFileStore::load_all dir={}", self.dir.display());
        if !fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }

        let mut workflows = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = match fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!("Skipping unreadable workflow file {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<WorkflowRecord>(&contents) {
                Ok(record) => workflows.push(record.workflow),
                Err(e) => warn!("Skipping unreadable workflow record {}: {}", path.display(), e),
            }
        }
        workflows.sort_by_key(|w| w.created_at);
        debug!("Loaded {} workflows", workflows.len());
        Ok(workflows)
    }

    async fn save(&self, workflow: &Workflow) -> Result<()> {
        let record = WorkflowRecord::from(workflow);
        let path = self
            .write_record(&record)
            .await
            .map_err(|e| Error::PersistenceWrite(format!("{}: {}", workflow.id, e)))?;
        debug!(
            "Saved workflow {} ({}) to {}",
            workflow.id.short(),
            workflow.status,
            path.display()
        );
        Ok(())
    }
}

/// In-process store for tests and runs that should leave nothing behind.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<WorkflowId, WorkflowRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &WorkflowId) -> Option<WorkflowRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> = self
            .records
            .read()
            .await
            .values()
            .map(|r| r.workflow.clone())
            .collect();
        workflows.sort_by_key(|w| w.created_at);
        Ok(workflows)
    }

    async fn save(&self, workflow: &Workflow) -> Result<()> {
        self.records
            .write()
            .await
            .insert(workflow.id, WorkflowRecord::from(workflow));
        Ok(())
    }
}

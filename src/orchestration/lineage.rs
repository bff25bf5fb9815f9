//! Artifact storage and the bookkeeping between storage and the ledger.
//!
//! Workers report the files they produced as drafts. A draft is recorded in
//! the workflow's ledger only once its file can be seen in the store; until
//! then it waits as a `PendingArtifact` and the reconciliation pass picks it
//! up later.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::core::{ArtifactDraft, ArtifactMetadata, TaskId};
use crate::workflow::WorkflowId;
use crate::{Error, Result};

/// What the store knows about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub path: PathBuf,
    pub size: u64,
    pub content_type: String,
}

impl ObjectInfo {
    pub fn into_metadata(self, relative_path: &str) -> ArtifactMetadata {
        ArtifactMetadata {
            path: self.path,
            relative_path: relative_path.to_string(),
            size: self.size,
            content_type: self.content_type,
        }
    }
}

/// Storage backend for artifact contents.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn root(&self) -> &Path;

    /// `None` when nothing is stored at `relative_path`.
    async fn stat(&self, relative_path: &str) -> Result<Option<ObjectInfo>>;

    async fn write(&self, relative_path: &str, contents: &[u8]) -> Result<ObjectInfo>;
}

/// Artifacts as plain files under a root directory.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Join a relative path onto the root, refusing anything that escapes it.
    fn resolve(&self, relative_path: &str) -> Result<PathBuf> {
        let relative = Path::new(relative_path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative_path.is_empty() || escapes {
            return Err(Error::Validation(format!(
                "artifact path must stay inside the artifact root: {}",
                relative_path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn stat(&self, relative_path: &str) -> Result<Option<ObjectInfo>> {
        let path = self.resolve(relative_path)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectInfo {
                content_type: content_type_for(relative_path).to_string(),
                size: meta.len(),
                path,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, relative_path: &str, contents: &[u8]) -> Result<ObjectInfo> {
        let path = self.resolve(relative_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, contents).await?;
        debug!("Wrote artifact {} ({} bytes)", path.display(), contents.len());
        Ok(ObjectInfo {
            content_type: content_type_for(relative_path).to_string(),
            size: contents.len() as u64,
            path,
        })
    }
}

/// Guess a MIME type from the file extension.
pub fn content_type_for(relative_path: &str) -> &'static str {
    let extension = Path::new(relative_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("md" | "markdown") => "text/markdown",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js" | "mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("toml") => "application/toml",
        Some("yaml" | "yml") => "application/yaml",
        Some("txt" | "log") => "text/plain",
        Some("sql") => "application/sql",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// A reported artifact whose file was not in the store yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingArtifact {
    pub workflow_id: WorkflowId,
    pub task_id: TaskId,
    pub agent: String,
    pub draft: ArtifactDraft,
    pub note: Option<String>,
    /// Store checks that came back empty so far.
    pub attempts: u32,
}

impl PendingArtifact {
    fn same_target(&self, other: &PendingArtifact) -> bool {
        self.workflow_id == other.workflow_id
            && self.agent.eq_ignore_ascii_case(&other.agent)
            && self.draft.metadata.relative_path == other.draft.metadata.relative_path
    }
}

/// Expected-but-missing artifacts, oldest first.
#[derive(Debug, Default)]
pub struct PendingArtifacts {
    items: Vec<PendingArtifact>,
}

impl PendingArtifacts {
    /// Queue an artifact. A newer report for the same file replaces the old one.
    pub fn push(&mut self, pending: PendingArtifact) {
        match self.items.iter_mut().find(|p| p.same_target(&pending)) {
            Some(existing) => *existing = pending,
            None => self.items.push(pending),
        }
    }

    pub fn take(&mut self) -> Vec<PendingArtifact> {
        std::mem::take(&mut self.items)
    }

    /// Put back items that are still missing, ahead of anything queued since.
    pub fn restore(&mut self, mut still_missing: Vec<PendingArtifact>) {
        still_missing.append(&mut self.items);
        self.items = Vec::new();
        for pending in still_missing {
            self.push(pending);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Refresh a draft against the store: `Some` with the stored metadata when
/// the file exists, `None` when it does not.
pub async fn locate(store: &dyn ArtifactStore, draft: &ArtifactDraft) -> Result<Option<ArtifactDraft>> {
    let relative_path = &draft.metadata.relative_path;
    Ok(store.stat(relative_path).await?.map(|info| ArtifactDraft {
        id: draft.id,
        name: draft.name.clone(),
        metadata: info.into_metadata(relative_path),
    }))
}

/// Split pending artifacts into those now present (with fresh metadata)
/// and those still missing, counting one more attempt on each missing item.
///
/// Paths the store rejects outright can never appear and are dropped.
/// Other stat errors count as missing.
pub async fn resolve_pending(
    store: &dyn ArtifactStore,
    pending: Vec<PendingArtifact>,
) -> (Vec<PendingArtifact>, Vec<PendingArtifact>) {
    let mut found = Vec::new();
    let mut missing = Vec::new();
    for mut item in pending {
        match locate(store, &item.draft).await {
            Ok(Some(draft)) => {
                item.draft = draft;
                found.push(item);
            }
            Ok(None) => {
                item.attempts += 1;
                missing.push(item);
            }
            Err(Error::Validation(reason)) => {
                warn!(
                    "Dropping artifact {} from {}: {}",
                    item.draft.metadata.relative_path, item.agent, reason
                );
            }
            Err(e) => {
                warn!(
                    "Artifact check failed for {}: {}",
                    item.draft.metadata.relative_path, e
                );
                item.attempts += 1;
                missing.push(item);
            }
        }
    }
    (found, missing)
}

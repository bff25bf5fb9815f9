//! Artifacts produced by tasks, with append-only provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::core::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageAction {
    Created,
    Edited,
}

impl std::fmt::Display for LineageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineageAction::Created => write!(f, "created"),
            LineageAction::Edited => write!(f, "edited"),
        }
    }
}

/// One provenance entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEvent {
    pub action: LineageAction,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
}

/// Where an artifact lives and what it looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Absolute storage path.
    pub path: PathBuf,
    /// Path relative to the artifact root; identifies the file across edits.
    pub relative_path: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub name: String,
    /// Worker that created the artifact.
    pub agent_name: String,
    /// Task that created the artifact.
    pub task_id: TaskId,
    /// Chronological provenance; first entry is always `created`.
    pub lineage: Vec<LineageEvent>,
    pub metadata: ArtifactMetadata,
}

impl Artifact {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.lineage.first().map(|e| e.timestamp)
    }

    /// Copy with lineage ordered most-recent-first.
    pub fn with_recent_lineage_first(&self) -> Artifact {
        let mut copy = self.clone();
        copy.lineage.reverse();
        copy
    }
}

/// What a worker reports it produced. `id` is set when editing a known artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDraft {
    pub id: Option<ArtifactId>,
    pub name: String,
    pub metadata: ArtifactMetadata,
}

impl ArtifactDraft {
    pub fn new(name: &str, metadata: ArtifactMetadata) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            metadata,
        }
    }
}

/// Artifacts of one workflow in creation order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactLedger {
    artifacts: Vec<Artifact>,
}

impl ArtifactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new artifact or append an `edited` entry to an existing one.
    ///
    /// An existing artifact is matched by the draft's id, then by the same
    /// creator and relative path.
    pub fn record(
        &mut self,
        agent_name: &str,
        task_id: TaskId,
        draft: ArtifactDraft,
        note: Option<String>,
    ) -> (ArtifactId, LineageAction) {
        let position = match draft.id {
            Some(id) => self.artifacts.iter().position(|a| a.id == id),
            None => None,
        }
        .or_else(|| {
            self.artifacts.iter().position(|a| {
                a.agent_name.eq_ignore_ascii_case(agent_name)
                    && a.metadata.relative_path == draft.metadata.relative_path
            })
        });

        let event = |action| LineageEvent {
            action,
            actor: agent_name.to_string(),
            timestamp: Utc::now(),
            note: note.clone(),
        };

        match position {
            Some(index) => {
                let artifact = &mut self.artifacts[index];
                artifact.lineage.push(event(LineageAction::Edited));
                artifact.metadata = draft.metadata;
                (artifact.id, LineageAction::Edited)
            }
            None => {
                let id = draft.id.unwrap_or_default();
                self.artifacts.push(Artifact {
                    id,
                    name: draft.name,
                    agent_name: agent_name.to_string(),
                    task_id,
                    lineage: vec![event(LineageAction::Created)],
                    metadata: draft.metadata,
                });
                (id, LineageAction::Created)
            }
        }
    }

    pub fn get(&self, id: &ArtifactId) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.id == *id)
    }

    pub fn contains_path(&self, relative_path: &str) -> bool {
        self.artifacts
            .iter()
            .any(|a| a.metadata.relative_path == relative_path)
    }

    /// Artifacts created by `agent_name`, creation order, lineage most-recent-first.
    pub fn for_agent(&self, agent_name: &str) -> Vec<Artifact> {
        self.artifacts
            .iter()
            .filter(|a| a.agent_name.eq_ignore_ascii_case(agent_name))
            .map(Artifact::with_recent_lineage_first)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

//! The named workers a directive can be routed to.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Config;

/// Department a worker belongs to. Drives keyword routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    /// Generalist who briefs and reviews.
    Management,
    /// Documentation and devops.
    Infrastructure,
    Frontend,
    Backend,
}

impl std::fmt::Display for Department {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Department::Management => write!(f, "management"),
            Department::Infrastructure => write!(f, "infrastructure"),
            Department::Frontend => write!(f, "frontend"),
            Department::Backend => write!(f, "backend"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    pub department: Department,
}

impl Worker {
    pub fn new(name: &str, department: Department) -> Self {
        Self {
            name: name.to_string(),
            department,
        }
    }
}

/// Ordered list of known workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    workers: Vec<Worker>,
}

impl Roster {
    /// Build a roster. Workers with blank names are ignored; an empty list
    /// falls back to the default roster.
    pub fn new(workers: Vec<Worker>) -> Self {
        let workers: Vec<Worker> = workers
            .into_iter()
            .filter_map(|mut w| {
                let name = w.name.trim();
                if name.is_empty() {
                    warn!("Ignoring roster entry with a blank name ({})", w.department);
                    return None;
                }
                w.name = name.to_string();
                Some(w)
            })
            .collect();
        if workers.is_empty() {
            return Self::default();
        }
        Self { workers }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.roster.clone())
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Case-insensitive lookup by name.
    pub fn find(&self, name: &str) -> Option<&Worker> {
        self.workers
            .iter()
            .find(|w| w.name.eq_ignore_ascii_case(name))
    }

    /// The generalist: first management worker, else the first worker.
    pub fn manager(&self) -> &Worker {
        self.workers
            .iter()
            .find(|w| w.department == Department::Management)
            .unwrap_or(&self.workers[0])
    }

    /// First worker of a department, falling back to the manager.
    pub fn for_department(&self, department: Department) -> &Worker {
        self.workers
            .iter()
            .find(|w| w.department == department)
            .unwrap_or_else(|| self.manager())
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self {
            workers: vec![
                Worker::new("Morgan", Department::Management),
                Worker::new("Sage", Department::Infrastructure),
                Worker::new("Nova", Department::Frontend),
                Worker::new("Atlas", Department::Backend),
            ],
        }
    }
}

//! Task graph for dependency management.
//!
//! A workflow owns its tasks as a plain ordered list. `TaskGraph` lays a
//! petgraph view over that list so scheduling questions (what can run now,
//! what is stuck behind a failure, is the graph well formed) can be answered
//! with graph algorithms while the list order stays the tie-break.

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use crate::workflow::Workflow;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

/// Borrowed dependency graph over a task list.
///
/// Node weights are positions in the task slice; an edge `a -> b` means
/// `b` depends on `a`.
pub struct TaskGraph<'a> {
    tasks: &'a [Task],
    graph: DiGraph<usize, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
    /// Dependency ids that name no task in the list.
    dangling: Vec<(TaskId, TaskId)>,
}

impl<'a> TaskGraph<'a> {
    /// Build the graph. Dependencies on unknown tasks are remembered rather
    /// than rejected; they keep the dependent task ineligible.
    pub fn build(tasks: &'a [Task]) -> Self {
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut task_index = HashMap::with_capacity(tasks.len());

        for (position, task) in tasks.iter().enumerate() {
            let index = graph.add_node(position);
            task_index.insert(task.id, index);
        }

        let mut dangling = Vec::new();
        for task in tasks {
            let to = task_index[&task.id];
            for dep in &task.dependencies {
                match task_index.get(dep) {
                    Some(&from) => {
                        graph.add_edge(from, to, ());
                    }
                    None => dangling.push((task.id, *dep)),
                }
            }
        }

        Self {
            tasks,
            graph,
            task_index,
            dangling,
        }
    }

    fn task_at(&self, index: NodeIndex) -> &'a Task {
        &self.tasks[self.graph[index]]
    }

    /// Get a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&'a Task> {
        self.task_index.get(id).map(|&index| self.task_at(index))
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check that every dependency names a task and that there is no cycle.
    pub fn validate(&self) -> Result<()> {
        if let Some((task, dep)) = self.dangling.first() {
            return Err(Error::Validation(format!(
                "Task {} depends on unknown task {}",
                task, dep
            )));
        }
        if is_cyclic_directed(&self.graph) {
            return Err(Error::Validation(
                "Task dependencies contain a cycle".to_string(),
            ));
        }
        Ok(())
    }

    /// All tasks ready to execute, in list order.
    ///
    /// A task is eligible iff it is pending and every dependency is
    /// completed. Running tasks are never returned.
    pub fn eligible(&self) -> Vec<&'a Task> {
        self.tasks
            .iter()
            .filter(|task| task.is_pending() && self.dependencies_completed(task))
            .collect()
    }

    fn dependencies_completed(&self, task: &Task) -> bool {
        if self.dangling.iter().any(|(id, _)| *id == task.id) {
            return false;
        }
        let index = self.task_index[&task.id];
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .all(|dep| self.task_at(dep).is_completed())
    }

    /// Tasks that directly depend on `id`, in list order.
    pub fn dependents(&self, id: &TaskId) -> Vec<&'a Task> {
        let Some(&index) = self.task_index.get(id) else {
            return Vec::new();
        };
        let mut positions: Vec<usize> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .map(|n| self.graph[n])
            .collect();
        positions.sort_unstable();
        positions.dedup();
        positions.into_iter().map(|p| &self.tasks[p]).collect()
    }

    /// Unfinished tasks that can never run because a transitive dependency failed.
    pub fn blocked_by_failure(&self) -> Vec<&'a Task> {
        let reversed = Reversed(&self.graph);
        self.tasks
            .iter()
            .filter(|task| !task.is_finished())
            .filter(|task| {
                let start = self.task_index[&task.id];
                let mut bfs = Bfs::new(reversed, start);
                while let Some(node) = bfs.next(reversed) {
                    if node != start && self.task_at(node).is_failed() {
                        return true;
                    }
                }
                false
            })
            .collect()
    }

    /// Tasks in an order where each comes after all of its dependencies.
    pub fn topological_order(&self) -> Result<Vec<&'a Task>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            Error::Validation(format!(
                "Cycle detected at task: {}",
                self.task_at(cycle.node_id()).title
            ))
        })?;
        Ok(sorted.into_iter().map(|index| self.task_at(index)).collect())
    }

    /// Ids of every task in the graph.
    pub fn ids(&self) -> BTreeSet<TaskId> {
        self.task_index.keys().copied().collect()
    }
}

impl std::fmt::Debug for TaskGraph<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

/// Every pending task of the workflow whose dependencies are all completed,
/// in task-list order.
pub fn eligible_tasks(workflow: &Workflow) -> Vec<&Task> {
    TaskGraph::build(&workflow.tasks).eligible()
}

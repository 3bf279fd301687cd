//! Task DAG (Directed Acyclic Graph) for dependency management.
//!
//! This module provides the TaskDAG structure that represents task dependencies
//! as a directed acyclic graph. Edges point from a dependency to the task that
//! depends on it. Cycles are rejected at insertion time, so every read view can
//! assume the graph is acyclic.

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::OnceLock;

/// The task dependency graph.
///
/// TaskDAG uses petgraph's DiGraph to represent task dependencies. Nodes are
/// never removed, so a node's index doubles as its insertion rank and is used
/// to break ties in the topological order.
#[derive(Clone)]
pub struct TaskDAG {
    /// The underlying directed graph.
    graph: DiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
    /// Cached topological order, reset on every structural change.
    order: OnceLock<Vec<NodeIndex>>,
}

impl TaskDAG {
    /// Create a new empty TaskDAG.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
            order: OnceLock::new(),
        }
    }

    /// Add a task and its declared dependency edges.
    ///
    /// If a task with the same id is already registered, any dependencies it
    /// declares that the graph does not know about yet are merged into the
    /// existing node. The stored task's status and result are kept.
    ///
    /// # Errors
    /// Returns an error, leaving the graph unchanged, if:
    /// - A dependency references a task that is not in the graph
    /// - A dependency would create a cycle (including a self-dependency)
    pub fn add_task(&mut self, task: Task) -> Result<NodeIndex> {
        let id = task.id;

        if let Some(&index) = self.task_index.get(&id) {
            let new_deps = self.validate_dependencies(&task, Some(index))?;
            for (dep_id, dep_index) in new_deps {
                self.graph.add_edge(dep_index, index, ());
                self.graph[index].depends_on.push(dep_id);
            }
            self.invalidate_order();
            return Ok(index);
        }

        let deps = self.validate_dependencies(&task, None)?;
        let mut task = task;
        task.depends_on = deps.iter().map(|(dep_id, _)| *dep_id).collect();
        let index = self.graph.add_node(task);
        for (_, dep_index) in deps {
            self.graph.add_edge(dep_index, index, ());
        }
        self.task_index.insert(id, index);
        self.invalidate_order();
        Ok(index)
    }

    /// Resolve a task's declared dependencies to node indices, skipping edges
    /// that already exist. Nothing is mutated.
    fn validate_dependencies(
        &self,
        task: &Task,
        existing: Option<NodeIndex>,
    ) -> Result<Vec<(TaskId, NodeIndex)>> {
        let mut resolved: Vec<(TaskId, NodeIndex)> = Vec::new();

        for dep in &task.depends_on {
            if *dep == task.id {
                return Err(Error::Cycle {
                    task: task.id,
                    dependency: *dep,
                });
            }

            let dep_index = *self
                .task_index
                .get(dep)
                .ok_or(Error::DanglingDependency {
                    task: task.id,
                    dependency: *dep,
                })?;

            if resolved.iter().any(|(id, _)| id == dep) {
                continue;
            }

            if let Some(index) = existing {
                if self.graph.find_edge(dep_index, index).is_some() {
                    continue;
                }
                // dep -> task closes a cycle iff task already reaches dep
                if has_path_connecting(&self.graph, index, dep_index, None) {
                    return Err(Error::Cycle {
                        task: task.id,
                        dependency: *dep,
                    });
                }
            }

            resolved.push((*dep, dep_index));
        }

        Ok(resolved)
    }

    /// Add a dependency between two registered tasks.
    ///
    /// The dependency indicates that `from` must complete before `to` can start.
    ///
    /// # Errors
    /// Returns an error if either task is not found in the DAG or if adding
    /// the edge would create a cycle.
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<()> {
        let from_index = *self
            .task_index
            .get(from)
            .ok_or(Error::TaskNotFound(*from))?;
        let to_index = *self.task_index.get(to).ok_or(Error::TaskNotFound(*to))?;

        if from_index == to_index || has_path_connecting(&self.graph, to_index, from_index, None)
        {
            return Err(Error::Cycle {
                task: *to,
                dependency: *from,
            });
        }

        if self.graph.find_edge(from_index, to_index).is_none() {
            self.graph.add_edge(from_index, to_index, ());
            self.graph[to_index].depends_on.push(*from);
            self.invalidate_order();
        }

        Ok(())
    }

    fn invalidate_order(&mut self) {
        self.order = OnceLock::new();
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable reference to a task by its ID.
    ///
    /// Only the task's fields can change through this reference; the graph
    /// structure cannot.
    pub fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph.node_weight_mut(index)
        } else {
            None
        }
    }

    /// Get the NodeIndex for a task by its ID.
    pub fn get_node_index(&self, id: &TaskId) -> Option<NodeIndex> {
        self.task_index.get(id).copied()
    }

    /// Get the number of tasks in the DAG.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependencies (edges) in the DAG.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if `to` directly depends on `from`.
    pub fn has_dependency(&self, from: &TaskId, to: &TaskId) -> bool {
        if let (Some(&from_idx), Some(&to_idx)) =
            (self.task_index.get(from), self.task_index.get(to))
        {
            self.graph.find_edge(from_idx, to_idx).is_some()
        } else {
            false
        }
    }

    /// Get all tasks that the given task directly depends on.
    pub fn get_dependencies(&self, id: &TaskId) -> Vec<&Task> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Get all tasks that directly depend on the given task.
    pub fn get_dependents(&self, id: &TaskId) -> Vec<&Task> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<&Task> {
        match self.task_index.get(id) {
            Some(&index) => {
                let mut found: Vec<NodeIndex> =
                    self.graph.neighbors_directed(index, direction).collect();
                found.sort();
                found
                    .into_iter()
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Get all tasks in insertion order.
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.graph.node_weights().collect()
    }

    /// Check if the DAG is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Check if the DAG contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    // ========== Ordering and Closures ==========

    /// Node indices in topological order, computed once per structure.
    fn order(&self) -> &[NodeIndex] {
        self.order.get_or_init(|| self.kahn_order())
    }

    /// Kahn's algorithm with a min-heap on insertion rank, so independent
    /// tasks keep the order they were added in.
    fn kahn_order(&self) -> Vec<NodeIndex> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut heap: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(node)) = heap.pop() {
            order.push(node);
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    heap.push(Reverse(next));
                }
            }
        }

        order
    }

    /// Get tasks in topological order (every task after its dependencies).
    ///
    /// Deterministic for a fixed sequence of insertions: ties are broken by
    /// insertion order. Repeated calls with no structural change in between
    /// return the same sequence.
    pub fn topological_order(&self) -> Vec<&Task> {
        self.order()
            .iter()
            .filter_map(|&index| self.graph.node_weight(index))
            .collect()
    }

    /// Get all tasks transitively required by any task in `ids`, excluding
    /// `ids` themselves. Returned in topological order.
    pub fn upstream_tasks(&self, ids: &[TaskId]) -> Vec<&Task> {
        self.closure(ids, Direction::Incoming)
    }

    /// Get all tasks that transitively depend on any task in `ids`, excluding
    /// `ids` themselves. Returned in topological order.
    pub fn downstream_tasks(&self, ids: &[TaskId]) -> Vec<&Task> {
        self.closure(ids, Direction::Outgoing)
    }

    fn closure(&self, ids: &[TaskId], direction: Direction) -> Vec<&Task> {
        let seeds: HashSet<NodeIndex> = ids
            .iter()
            .filter_map(|id| self.task_index.get(id).copied())
            .collect();

        let mut reached: HashSet<NodeIndex> = HashSet::new();
        let mut stack: Vec<NodeIndex> = seeds.iter().copied().collect();
        while let Some(node) = stack.pop() {
            for next in self.graph.neighbors_directed(node, direction) {
                if reached.insert(next) {
                    stack.push(next);
                }
            }
        }

        self.order()
            .iter()
            .filter(|n| reached.contains(*n) && !seeds.contains(*n))
            .filter_map(|&n| self.graph.node_weight(n))
            .collect()
    }

    // ========== Scheduling Operations ==========

    fn dependencies_complete(&self, index: NodeIndex) -> bool {
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .all(|dep| {
                self.graph
                    .node_weight(dep)
                    .map(Task::is_complete)
                    .unwrap_or(false)
            })
    }

    /// Get all tasks ready to be dispatched, in topological order.
    ///
    /// A task is ready if it has not started and every dependency has
    /// completed successfully. A failed or skipped dependency keeps its
    /// dependents from ever becoming ready.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        self.order()
            .iter()
            .filter_map(|&index| {
                let task = self.graph.node_weight(index)?;
                if task.can_start() && self.dependencies_complete(index) {
                    Some(task)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Get all tasks currently running, in topological order.
    pub fn running_tasks(&self) -> Vec<&Task> {
        self.topological_order()
            .into_iter()
            .filter(|task| task.status == TaskStatus::Running)
            .collect()
    }

    /// Get all unstarted tasks that can never become ready because a task
    /// upstream of them failed or was skipped.
    pub fn blocked_tasks(&self) -> Vec<&Task> {
        let mut doomed: HashSet<NodeIndex> = HashSet::new();
        let mut blocked = Vec::new();

        for &index in self.order() {
            let upstream_dead = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .any(|dep| {
                    doomed.contains(&dep)
                        || matches!(
                            self.graph[dep].status,
                            TaskStatus::Failed { .. } | TaskStatus::Skipped { .. }
                        )
                });
            if !upstream_dead {
                continue;
            }
            doomed.insert(index);
            let task = &self.graph[index];
            if task.can_start() {
                blocked.push(task);
            }
        }
        blocked
    }

    /// Check if every task finished without failing.
    ///
    /// An empty DAG counts as complete.
    pub fn all_complete(&self) -> bool {
        self.graph.node_weights().all(|task| {
            matches!(
                task.status,
                TaskStatus::Completed | TaskStatus::Skipped { .. }
            )
        })
    }

    /// Get the count of tasks that have not reached a terminal state.
    pub fn pending_count(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|task| !task.is_finished())
            .count()
    }
}

impl Default for TaskDAG {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskDAG {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDAG")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

//! Readiness tracking and dependency-graph analysis.
//!
//! The scheduler drives runs with the two pure functions [`find_ready_tasks`]
//! and [`deadlock_set`]. [`TaskDAG`] is a petgraph view of a [`Plan`] used to
//! explain *why* a set of tasks is stuck and to preview dispatch waves.

use crate::core::task::{Plan, Task};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Tasks that are not yet completed and whose dependencies are all completed.
///
/// Returned in plan order.
pub fn find_ready_tasks<'a>(plan: &'a Plan, completed: &HashSet<String>) -> Vec<&'a Task> {
    plan.tasks
        .iter()
        .filter(|task| !completed.contains(&task.name) && task.is_ready(completed))
        .collect()
}

/// Names of every task still incomplete, in plan order.
///
/// Only meaningful once a pass has found nothing ready: at that point these
/// tasks can never run, whether through a cycle or a dangling reference.
pub fn deadlock_set(plan: &Plan, completed: &HashSet<String>) -> Vec<String> {
    plan.tasks
        .iter()
        .filter(|task| !completed.contains(&task.name))
        .map(|task| task.name.clone())
        .collect()
}

/// A dependency on a task name that does not exist in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingDependency {
    /// The task declaring the dependency.
    pub task: String,
    /// The missing task name.
    pub missing: String,
}

/// Breakdown of a deadlock set into its causes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockReport {
    /// Groups of tasks that depend on each other.
    pub cycles: Vec<Vec<String>>,
    /// References to tasks that do not exist.
    pub dangling: Vec<DanglingDependency>,
    /// Stuck tasks that are only downstream of a cycle or dangling reference.
    pub blocked: Vec<String>,
}

impl DeadlockReport {
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty() && self.dangling.is_empty() && self.blocked.is_empty()
    }
}

impl std::fmt::Display for DeadlockReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        for cycle in &self.cycles {
            parts.push(format!("cycle [{}]", cycle.join(" <-> ")));
        }
        for d in &self.dangling {
            parts.push(format!("'{}' depends on missing '{}'", d.task, d.missing));
        }
        if !self.blocked.is_empty() {
            parts.push(format!("blocked [{}]", self.blocked.join(", ")));
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// Dependency graph over a plan's task names.
///
/// Edges run from a dependency to its dependent. Dependencies naming tasks
/// outside the plan are kept aside as [`DanglingDependency`] entries.
pub struct TaskDAG {
    graph: DiGraph<String, ()>,
    task_index: HashMap<String, NodeIndex>,
    dangling: Vec<DanglingDependency>,
}

impl TaskDAG {
    /// Build the graph for a plan. Duplicate names keep their first entry.
    pub fn from_plan(plan: &Plan) -> Self {
        let mut graph = DiGraph::new();
        let mut task_index = HashMap::new();
        for task in &plan.tasks {
            task_index
                .entry(task.name.clone())
                .or_insert_with(|| graph.add_node(task.name.clone()));
        }

        let mut dangling = Vec::new();
        for task in &plan.tasks {
            let to = task_index[&task.name];
            for dep in &task.dependencies {
                match task_index.get(dep) {
                    Some(&from) => {
                        graph.update_edge(from, to, ());
                    }
                    None => dangling.push(DanglingDependency {
                        task: task.name.clone(),
                        missing: dep.clone(),
                    }),
                }
            }
        }

        Self {
            graph,
            task_index,
            dangling,
        }
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of resolvable dependency edges.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_task(&self, name: &str) -> bool {
        self.task_index.contains_key(name)
    }

    pub fn dangling(&self) -> &[DanglingDependency] {
        &self.dangling
    }

    /// Names of the tasks `name` depends on (resolvable ones only).
    pub fn get_dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, petgraph::Direction::Incoming)
    }

    /// Names of the tasks that depend on `name`.
    pub fn get_dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, petgraph::Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, dir: petgraph::Direction) -> Vec<&str> {
        let Some(&index) = self.task_index.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(index, dir)
            .map(|n| self.graph[n].as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Every cycle in the graph, as strongly connected components.
    ///
    /// A component counts as a cycle when it has more than one task or the
    /// task depends on itself.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.find_edge(scc[0], scc[0]).is_some()
            })
            .map(|scc| {
                let mut names: Vec<String> =
                    scc.into_iter().map(|n| self.graph[n].clone()).collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Explain a deadlock set reported by the scheduler.
    pub fn analyze_deadlock(&self, stuck: &[String]) -> DeadlockReport {
        let stuck: HashSet<&str> = stuck.iter().map(String::as_str).collect();

        let cycles: Vec<Vec<String>> = self
            .cycles()
            .into_iter()
            .filter(|cycle| cycle.iter().any(|name| stuck.contains(name.as_str())))
            .collect();
        let dangling: Vec<DanglingDependency> = self
            .dangling
            .iter()
            .filter(|d| stuck.contains(d.task.as_str()))
            .cloned()
            .collect();

        let explained: HashSet<&str> = cycles
            .iter()
            .flatten()
            .map(String::as_str)
            .chain(dangling.iter().map(|d| d.task.as_str()))
            .collect();
        let mut blocked: Vec<String> = stuck
            .iter()
            .filter(|name| !explained.contains(*name))
            .map(|name| name.to_string())
            .collect();
        blocked.sort();

        DeadlockReport {
            cycles,
            dangling,
            blocked,
        }
    }

    /// Group tasks into the passes the scheduler would dispatch them in.
    ///
    /// Returns the waves in order plus the names that would never become
    /// ready.
    pub fn execution_waves(&self) -> (Vec<Vec<String>>, Vec<String>) {
        let unresolvable: HashSet<&str> = self.dangling.iter().map(|d| d.task.as_str()).collect();
        let mut completed: HashSet<NodeIndex> = HashSet::new();
        let mut waves = Vec::new();

        loop {
            let ready: Vec<NodeIndex> = self
                .graph
                .node_indices()
                .filter(|&index| {
                    !completed.contains(&index)
                        && !unresolvable.contains(self.graph[index].as_str())
                        && self
                            .graph
                            .neighbors_directed(index, petgraph::Direction::Incoming)
                            .all(|dep| completed.contains(&dep))
                })
                .collect();
            if ready.is_empty() {
                break;
            }
            completed.extend(ready.iter().copied());
            waves.push(ready.into_iter().map(|n| self.graph[n].clone()).collect());
        }

        let stuck = self
            .graph
            .node_indices()
            .filter(|index| !completed.contains(index))
            .map(|n| self.graph[n].clone())
            .collect();
        (waves, stuck)
    }
}

impl std::fmt::Debug for TaskDAG {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDAG")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .field("dangling", &self.dangling.len())
            .finish()
    }
}

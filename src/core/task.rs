//! Task and plan data model.
//!
//! A [`Plan`] is the flat task list handed to the engine by an external
//! planner. Tasks are identified by their unique name and declare the names
//! of the tasks they depend on.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::error::{Error, Result};

/// The declared type of a task, used to resolve its worker.
///
/// The set is open: planners may emit types the engine has no dedicated
/// variant for, which are carried as [`TaskType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Analysis,
    Context,
    Diagnosis,
    Recommendation,
    Custom,
    /// The implicit final task run over the completed result store.
    Synthesis,
    Other(String),
}

impl TaskType {
    /// Registry key for this type.
    pub fn as_str(&self) -> &str {
        match self {
            TaskType::Analysis => "analysis",
            TaskType::Context => "context",
            TaskType::Diagnosis => "diagnosis",
            TaskType::Recommendation => "recommendation",
            TaskType::Custom => "custom",
            TaskType::Synthesis => "synthesis",
            TaskType::Other(s) => s.as_str(),
        }
    }

    /// Whether results of this type count as usable output for synthesis.
    pub fn is_canonical(&self) -> bool {
        matches!(
            self,
            TaskType::Analysis | TaskType::Context | TaskType::Diagnosis | TaskType::Recommendation
        )
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "analysis" => TaskType::Analysis,
            "context" => TaskType::Context,
            "diagnosis" => TaskType::Diagnosis,
            "recommendation" => TaskType::Recommendation,
            "custom" => TaskType::Custom,
            "synthesis" => TaskType::Synthesis,
            _ => TaskType::Other(s),
        }
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        TaskType::from(s.to_string())
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-task lifecycle within a single run.
///
/// `Pending -> Running -> {Succeeded | Skipped | Failed | Retrying(n) -> Running}`.
/// A pending task whose condition does not hold goes straight to `Skipped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Waiting for dependencies.
    Pending,
    /// A worker attempt is in flight.
    Running,
    /// The last attempt failed; attempt `attempt` is waiting for its backoff.
    Retrying {
        /// The attempt number that will run next.
        attempt: u32,
    },
    /// The task produced a result.
    Succeeded,
    /// The task completed as a no-op.
    Skipped {
        /// Why the task was skipped.
        reason: String,
    },
    /// The task exhausted its retries.
    Failed {
        /// Error message from the last attempt.
        error: String,
    },
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Retrying { attempt } => write!(f, "retrying (attempt {})", attempt),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

impl TaskStatus {
    /// Check whether moving to `next` is a legal transition.
    pub fn can_transition(&self, next: &TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Skipped { .. })
                | (TaskStatus::Running, TaskStatus::Succeeded)
                | (TaskStatus::Running, TaskStatus::Skipped { .. })
                | (TaskStatus::Running, TaskStatus::Retrying { .. })
                | (TaskStatus::Running, TaskStatus::Failed { .. })
                | (TaskStatus::Retrying { .. }, TaskStatus::Running)
                | (TaskStatus::Retrying { .. }, TaskStatus::Failed { .. })
        )
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.can_transition(&next) {
            return Err(Error::Validation(format!(
                "Invalid task transition from {} to {}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Skipped { .. } | TaskStatus::Failed { .. }
        )
    }
}

/// A predicate over an earlier task's result, honored only when
/// conditional execution is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// The task whose result is inspected. Must be a dependency.
    pub task: String,
    /// JSON pointer into the referenced output (e.g. `/severity`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    /// Value the pointed-to field must equal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<serde_json::Value>,
}

/// A single named unit of work in a [`Plan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique name within the plan.
    pub name: String,
    /// Declared type used to resolve the worker.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// What the task should accomplish.
    #[serde(default)]
    pub description: String,
    /// Names of tasks that must complete first.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Planner-assigned priority; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// Worker to use when `task_type` is `custom`.
    #[serde(
        default,
        alias = "customWorker",
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_worker: Option<String>,
    /// Extra instructions passed through to the worker.
    #[serde(
        default,
        alias = "customInstructions",
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Task {
    /// Create a task with no dependencies.
    pub fn new(name: &str, task_type: impl Into<TaskType>) -> Self {
        Self {
            name: name.to_string(),
            task_type: task_type.into(),
            description: String::new(),
            dependencies: BTreeSet::new(),
            priority: None,
            custom_worker: None,
            custom_instructions: None,
            condition: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Add dependencies by name.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_custom_worker(mut self, worker: &str) -> Self {
        self.custom_worker = Some(worker.to_string());
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.custom_instructions = Some(instructions.to_string());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// A task is ready when every dependency is in the completed set.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| completed.contains(dep))
    }
}

/// The task graph for one run, as produced by a planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Free-form summary of the plan, handed to synthesis.
    #[serde(default)]
    pub overview: String,
    /// Tasks in planner order.
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn new(overview: &str, tasks: Vec<Task>) -> Self {
        Self {
            overview: overview.to_string(),
            tasks,
        }
    }

    /// Parse a plan from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a plan file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Validate structural invariants before any dispatch.
    ///
    /// Dangling dependency names are deliberately *not* rejected here; they
    /// surface at run time as a deadlock, the same as a cycle.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.name.trim().is_empty() {
                return Err(Error::PlanInvalid("task with empty name".to_string()));
            }
            if !seen.insert(task.name.as_str()) {
                return Err(Error::PlanInvalid(format!(
                    "duplicate task name '{}'",
                    task.name
                )));
            }
            if let Some(cond) = &task.condition {
                if !task.dependencies.contains(&cond.task) {
                    return Err(Error::PlanInvalid(format!(
                        "task '{}' has a condition on '{}', which is not one of its dependencies",
                        task.name, cond.task
                    )));
                }
            }
        }
        Ok(())
    }
}

//! Worker capability registry.
//!
//! Workers are the boundary to the analysis agents that actually do the
//! work. The registry maps a task's declared type (or, for custom tasks, an
//! explicit worker name) to a [`Worker`], falling back to a designated
//! default worker for unknown types.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::task::{Task, TaskType};
use crate::orchestration::store::ResultSnapshot;

/// Everything a worker sees for one attempt.
#[derive(Debug, Clone)]
pub struct WorkerInput {
    pub task: Task,
    /// Opaque domain record (e.g. a parsed trace), passed through unchanged.
    pub domain_context: Arc<serde_json::Value>,
    /// Results recorded before this task was dispatched.
    pub completed_results: ResultSnapshot,
    pub instructions: Option<String>,
    /// The plan overview.
    pub overview: String,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// What a successful worker call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(serde_json::Value),
    /// The worker decided the task is a no-op for this run.
    Skipped { reason: String },
}

impl From<serde_json::Value> for TaskOutcome {
    fn from(value: serde_json::Value) -> Self {
        TaskOutcome::Completed(value)
    }
}

/// A failed worker attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct WorkerError {
    pub message: String,
}

impl WorkerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for WorkerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for WorkerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("JSON error: {}", e))
    }
}

/// An executable analysis capability.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Name used in logs and progress messages.
    fn name(&self) -> &str;

    /// Run one attempt of a task. Any error counts as a failed attempt.
    async fn process(&self, input: WorkerInput) -> Result<TaskOutcome, WorkerError>;
}

/// A resolved worker for a task.
#[derive(Clone)]
pub struct Resolution {
    pub worker: Arc<dyn Worker>,
    /// Set when the default worker was used for an unregistered type.
    pub warning: Option<String>,
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
            .field("worker", &self.worker.name())
            .field("warning", &self.warning)
            .finish()
    }
}

/// Maps task types and custom worker names to workers.
///
/// The synthesis worker is held apart from the task workers, so no plan
/// task can ever resolve to it.
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
    default_worker: Arc<dyn Worker>,
    synthesizer: Option<Arc<dyn Worker>>,
}

impl WorkerRegistry {
    /// Create a registry whose fallback for unknown types is `default_worker`.
    pub fn new(default_worker: Arc<dyn Worker>) -> Self {
        Self {
            workers: HashMap::new(),
            default_worker,
            synthesizer: None,
        }
    }

    /// Register a worker under a task type or custom worker name.
    ///
    /// Re-registering a key replaces the previous worker.
    pub fn register(&mut self, key: impl Into<String>, worker: Arc<dyn Worker>) -> &mut Self {
        let key = key.into();
        if self.workers.insert(key.clone(), worker).is_some() {
            tracing::debug!(key = %key, "Replaced registered worker");
        } else {
            tracing::debug!(key = %key, "Registered worker");
        }
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, key: impl Into<String>, worker: Arc<dyn Worker>) -> Self {
        self.register(key, worker);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.workers.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.workers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Install the worker for the synthesis step, replacing any previous one.
    pub fn set_synthesizer(&mut self, worker: Arc<dyn Worker>) -> &mut Self {
        tracing::debug!(worker = %worker.name(), "Registered synthesizer");
        self.synthesizer = Some(worker);
        self
    }

    /// Builder form of [`set_synthesizer`](Self::set_synthesizer).
    pub fn with_synthesizer(mut self, worker: Arc<dyn Worker>) -> Self {
        self.set_synthesizer(worker);
        self
    }

    /// The worker for the synthesis step, if any.
    pub fn synthesizer(&self) -> Option<Arc<dyn Worker>> {
        self.synthesizer.clone()
    }

    /// Resolve the worker for a task.
    ///
    /// Order: the named custom worker for `custom` tasks, then the worker
    /// registered for the task type, then the default worker with a warning.
    pub fn resolve(&self, task: &Task) -> Resolution {
        if task.task_type == TaskType::Custom {
            if let Some(worker) = task
                .custom_worker
                .as_deref()
                .and_then(|name| self.workers.get(name))
            {
                return Resolution {
                    worker: Arc::clone(worker),
                    warning: None,
                };
            }
        }

        if let Some(worker) = self.workers.get(task.task_type.as_str()) {
            return Resolution {
                worker: Arc::clone(worker),
                warning: None,
            };
        }

        let wanted = match (&task.task_type, &task.custom_worker) {
            (TaskType::Custom, Some(name)) => format!("custom worker '{}'", name),
            (t, _) => format!("task type '{}'", t),
        };
        Resolution {
            worker: Arc::clone(&self.default_worker),
            warning: Some(format!(
                "No worker registered for {} (task '{}'); using default worker '{}'",
                wanted,
                task.name,
                self.default_worker.name()
            )),
        }
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.keys())
            .field("default", &self.default_worker.name())
            .field("synthesizer", &self.synthesizer.as_ref().map(|w| w.name()))
            .finish()
    }
}

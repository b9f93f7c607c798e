//! Per-run result accumulation.
//!
//! The [`ResultStore`] is owned by the scheduler. Workers only ever see a
//! [`ResultSnapshot`]: an immutable, shared view taken when they were
//! dispatched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::task::{Task, TaskType};
use crate::error::{Error, Result};

/// Outcome of one task in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_name: String,
    pub task_type: TaskType,
    /// Worker-defined payload; `null` for skipped or failed tasks.
    pub output: serde_json::Value,
    /// Number of worker attempts made, at least 1.
    pub attempts: u32,
    pub failed: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn succeeded(
        task: &Task,
        output: serde_json::Value,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_name: task.name.clone(),
            task_type: task.task_type.clone(),
            output,
            attempts,
            failed: false,
            skipped: false,
            error: None,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// A completed no-op. The reason is kept in `error` for display.
    pub fn skipped(task: &Task, reason: &str, attempts: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            task_name: task.name.clone(),
            task_type: task.task_type.clone(),
            output: serde_json::Value::Null,
            attempts: attempts.max(1),
            failed: false,
            skipped: true,
            error: Some(reason.to_string()),
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(task: &Task, attempts: u32, error: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            task_name: task.name.clone(),
            task_type: task.task_type.clone(),
            output: serde_json::Value::Null,
            attempts: attempts.max(1),
            failed: true,
            skipped: false,
            error: Some(error.to_string()),
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Produced real output: neither failed nor skipped.
    pub fn is_usable(&self) -> bool {
        !self.failed && !self.skipped
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// Read-only view of the results recorded so far.
pub type ResultSnapshot = Arc<BTreeMap<String, TaskResult>>;

/// Write-once store of task results for a single run.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: ResultSnapshot,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the final result for a task.
    ///
    /// Each task name may be recorded exactly once per run. Outstanding
    /// snapshots are unaffected.
    pub fn record(&mut self, result: TaskResult) -> Result<()> {
        if self.results.contains_key(&result.task_name) {
            return Err(Error::DuplicateResult(result.task_name));
        }
        Arc::make_mut(&mut self.results).insert(result.task_name.clone(), result);
        Ok(())
    }

    pub fn snapshot(&self) -> ResultSnapshot {
        Arc::clone(&self.results)
    }

    pub fn get(&self, task_name: &str) -> Option<&TaskResult> {
        self.results.get(task_name)
    }

    pub fn contains(&self, task_name: &str) -> bool {
        self.results.contains_key(task_name)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Whether any usable result belongs to a canonical task type.
    pub fn has_canonical_output(&self) -> bool {
        self.results
            .values()
            .any(|r| r.is_usable() && r.task_type.is_canonical())
    }

    /// Consume the store, returning the recorded results.
    pub fn into_results(self) -> BTreeMap<String, TaskResult> {
        Arc::try_unwrap(self.results).unwrap_or_else(|shared| (*shared).clone())
    }
}

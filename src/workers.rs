//! Built-in workers used by the CLI.
//!
//! Real analysis agents live outside this crate. The digest workers echo
//! what they were given so a plan can be dry-run end to end.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::orchestration::registry::{TaskOutcome, Worker, WorkerError, WorkerInput};

/// Summarizes a task and the dependency outputs it saw.
#[derive(Debug, Clone)]
pub struct DigestWorker {
    name: String,
}

impl DigestWorker {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for DigestWorker {
    fn default() -> Self {
        Self::new("digest")
    }
}

#[async_trait]
impl Worker for DigestWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: WorkerInput) -> Result<TaskOutcome, WorkerError> {
        let task = &input.task;
        let inputs: Map<String, Value> = task
            .dependencies
            .iter()
            .filter_map(|dep| {
                input
                    .completed_results
                    .get(dep)
                    .map(|r| (dep.clone(), r.output.clone()))
            })
            .collect();

        Ok(json!({
            "task": task.name,
            "type": task.task_type,
            "description": task.description,
            "worker": self.name,
            "attempt": input.attempt,
            "instructions": input.instructions,
            "inputs": inputs,
            "context_keys": context_keys(&input.domain_context),
        })
        .into())
    }
}

/// Folds every recorded result into a single summary.
#[derive(Debug, Clone, Default)]
pub struct DigestSynthesizer;

#[async_trait]
impl Worker for DigestSynthesizer {
    fn name(&self) -> &str {
        "digest-synthesis"
    }

    async fn process(&self, input: WorkerInput) -> Result<TaskOutcome, WorkerError> {
        let results = &input.completed_results;
        let tasks: Vec<Value> = results
            .values()
            .map(|r| {
                json!({
                    "name": r.task_name,
                    "type": r.task_type,
                    "attempts": r.attempts,
                    "skipped": r.skipped,
                })
            })
            .collect();
        let skipped = results.values().filter(|r| r.skipped).count();

        Ok(json!({
            "overview": input.overview,
            "tasks": tasks,
            "counts": {
                "total": results.len(),
                "usable": results.values().filter(|r| r.is_usable()).count(),
                "skipped": skipped,
            },
        })
        .into())
    }
}

fn context_keys(context: &Value) -> Vec<String> {
    match context {
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

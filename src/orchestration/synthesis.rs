//! The final synthesis pass over a completed result store.
//!
//! Synthesis is modeled as an implicit task that depends on every task of
//! the plan. It runs once, without retries, and its failure never fails the
//! run.

use chrono::Utc;
use std::sync::Arc;

use crate::core::task::{Plan, Task, TaskType};
use crate::error::{Error, Result};
use crate::orchestration::registry::{TaskOutcome, Worker, WorkerInput};
use crate::orchestration::store::{ResultSnapshot, ResultStore, TaskResult};

/// Name of the implicit synthesis task.
pub const SYNTHESIS_TASK: &str = "synthesis";

/// Runs the synthesis worker over the recorded results.
#[derive(Clone)]
pub struct SynthesisStep {
    worker: Arc<dyn Worker>,
}

impl SynthesisStep {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self { worker }
    }

    pub fn worker_name(&self) -> &str {
        self.worker.name()
    }

    /// Synthesis only runs when the run produced some usable canonical output.
    pub fn should_run(store: &ResultStore) -> bool {
        store.has_canonical_output()
    }

    /// The implicit task handed to the synthesis worker.
    pub fn task_for(plan: &Plan) -> Task {
        Task::new(SYNTHESIS_TASK, TaskType::Synthesis)
            .with_description("Synthesize a diagnosis and recommendations from all task results")
            .depends_on(plan.tasks.iter().map(|t| t.name.clone()))
    }

    /// Run the synthesis worker once.
    ///
    /// Worker errors come back as [`Error::Synthesis`]; callers treat them as
    /// warnings.
    pub async fn run(
        &self,
        plan: &Plan,
        snapshot: ResultSnapshot,
        domain_context: Arc<serde_json::Value>,
    ) -> Result<TaskResult> {
        let task = Self::task_for(plan);
        let started_at = Utc::now();
        let input = WorkerInput {
            task: task.clone(),
            domain_context,
            completed_results: snapshot,
            instructions: None,
            overview: plan.overview.clone(),
            attempt: 1,
        };

        match self.worker.process(input).await {
            Ok(TaskOutcome::Completed(output)) => {
                Ok(TaskResult::succeeded(&task, output, 1, started_at))
            }
            Ok(TaskOutcome::Skipped { reason }) => {
                Ok(TaskResult::skipped(&task, &reason, 1, started_at))
            }
            Err(e) => Err(Error::Synthesis(e.message)),
        }
    }
}

impl std::fmt::Debug for SynthesisStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisStep")
            .field("worker", &self.worker.name())
            .finish()
    }
}

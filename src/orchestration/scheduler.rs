//! Scheduler for dependency-ordered task execution.
//!
//! The Scheduler drives a run in passes. Each pass asks the readiness
//! tracker for dispatchable tasks, runs them (concurrently, up to the
//! configured limit) under the retry policy, and only then records their
//! results, so every task sees exactly the results that were recorded before
//! it was dispatched. A pass that finds nothing ready while tasks remain ends
//! the run as deadlocked.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::dag::{deadlock_set, find_ready_tasks, TaskDAG};
use crate::core::task::{Condition, Plan, Task, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::registry::{TaskOutcome, Worker, WorkerInput, WorkerRegistry};
use crate::orchestration::store::{ResultSnapshot, ResultStore, TaskResult};
use crate::orchestration::synthesis::SynthesisStep;

/// Callback invoked with `(stage, message)` as tasks start, retry and finish.
pub type ProgressCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Unique identifier for one run of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task completed.
    Completed,
    /// Some tasks could never become ready.
    Deadlocked,
    /// A task exhausted its retries.
    Failed,
    /// The plan was rejected before dispatch.
    Invalid,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Deadlocked => write!(f, "deadlocked"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Invalid => write!(f, "invalid"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Events emitted by the scheduler for task lifecycle changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    RunStarted {
        run_id: RunId,
        task_count: usize,
    },
    /// A pass is dispatching these tasks.
    PassStarted { pass: usize, tasks: Vec<String> },
    TaskStarted { task: String, attempt: u32 },
    /// An attempt failed and `next_attempt` will run after `delay`.
    TaskRetrying {
        task: String,
        next_attempt: u32,
        delay: Duration,
        error: String,
    },
    TaskCompleted { task: String, attempts: u32 },
    TaskSkipped { task: String, reason: String },
    TaskFailed {
        task: String,
        attempts: u32,
        error: String,
    },
    SynthesisCompleted { succeeded: bool },
    RunFinished { run_id: RunId, status: RunStatus },
}

/// Final outcome of a run, always returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Results recorded before the run ended, keyed by task name.
    pub per_task_results: BTreeMap<String, TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<TaskResult>,
    /// Set only for fatal failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal problems: worker fallbacks and synthesis failures.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Final lifecycle state of every task in the plan.
    #[serde(default)]
    pub statuses: BTreeMap<String, TaskStatus>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Engine-owned mutable state for a single run.
///
/// Created fresh by [`Scheduler::run`] and dropped when the run ends; the
/// scheduler is its only writer.
#[derive(Debug, Default)]
pub struct ExecutionState {
    completed: HashSet<String>,
    store: ResultStore,
    statuses: BTreeMap<String, TaskStatus>,
    warnings: Vec<String>,
}

impl ExecutionState {
    pub fn new(plan: &Plan) -> Self {
        Self {
            statuses: plan
                .tasks
                .iter()
                .map(|t| (t.name.clone(), TaskStatus::Pending))
                .collect(),
            ..Self::default()
        }
    }

    pub fn completed(&self) -> &HashSet<String> {
        &self.completed
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn status(&self, task: &str) -> Option<&TaskStatus> {
        self.statuses.get(task)
    }

    fn transition(&mut self, task: &str, next: TaskStatus) -> Result<()> {
        self.statuses
            .get_mut(task)
            .ok_or_else(|| Error::Validation(format!("Unknown task '{}'", task)))?
            .transition(next)
    }

    /// Mark a task complete and record its result.
    fn complete(&mut self, result: TaskResult) -> Result<()> {
        self.completed.insert(result.task_name.clone());
        self.store.record(result)
    }
}

/// Per-run values shared by every task of the run.
struct RunContext {
    domain_context: Arc<serde_json::Value>,
    overview: String,
}

/// What a single task's execution ended with.
struct TaskRun {
    result: TaskResult,
    status: TaskStatus,
    cancelled: bool,
}

enum PassOutcome {
    Progressed,
    Failed(Error),
    Cancelled,
}

/// Drives plans to completion against a worker registry.
///
/// A scheduler holds no per-run state, so one instance may run several plans
/// concurrently.
///
/// # Example
///
/// ```ignore
/// let registry = WorkerRegistry::new(Arc::new(DigestWorker::default()));
/// let scheduler = Scheduler::new(registry, EngineConfig::default());
/// let result = scheduler.run(&plan, serde_json::json!({})).await;
/// ```
pub struct Scheduler {
    registry: Arc<WorkerRegistry>,
    config: EngineConfig,
    progress: ProgressCallback,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(registry: WorkerRegistry, config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            progress: Arc::new(|_, _| {}),
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Install a progress callback. The default is a no-op.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.progress = Arc::new(progress);
        self
    }

    /// Emit [`SchedulerEvent`]s on this channel.
    ///
    /// Events are sent with `try_send`; a full or closed channel drops them
    /// rather than stalling the run.
    pub fn with_events(mut self, event_tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Abort runs when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            if let Err(e) = tx.try_send(event) {
                debug!("Dropped scheduler event: {}", e);
            }
        }
    }

    fn report(&self, stage: &str, message: &str) {
        (self.progress)(stage, message);
    }

    /// Execute a plan and return its result.
    ///
    /// Never fails: fatal problems are reported through
    /// [`ExecutionResult::error`] alongside whatever results were recorded.
    pub async fn run(&self, plan: &Plan, domain_context: serde_json::Value) -> ExecutionResult {
        let run_id = RunId::new();
        let span = tracing::info_span!("run", run_id = %run_id.short());
        self.run_inner(run_id, plan, domain_context)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: RunId,
        plan: &Plan,
        domain_context: serde_json::Value,
    ) -> ExecutionResult {
        let started = tokio::time::Instant::now();
        info!(tasks = plan.len(), "Run started");
        self.emit(SchedulerEvent::RunStarted {
            run_id,
            task_count: plan.len(),
        });
        self.report("run", &format!("starting {} task(s)", plan.len()));

        if let Err(e) = plan.validate() {
            warn!(error = %e, "Plan rejected");
            return self.finish(
                run_id,
                ExecutionState::default(),
                RunStatus::Invalid,
                Some(e),
                None,
                started,
            );
        }

        let ctx = RunContext {
            domain_context: Arc::new(domain_context),
            overview: plan.overview.clone(),
        };
        let mut state = ExecutionState::new(plan);
        let mut pass = 0;

        while state.completed.len() < plan.len() {
            if self.cancel.is_cancelled() {
                return self.cancelled(run_id, state, started);
            }

            let ready = find_ready_tasks(plan, &state.completed);
            if ready.is_empty() {
                let stuck = deadlock_set(plan, &state.completed);
                let report = TaskDAG::from_plan(plan).analyze_deadlock(&stuck);
                warn!(stuck = ?stuck, cause = %report, "Deadlock detected");
                return self.finish(
                    run_id,
                    state,
                    RunStatus::Deadlocked,
                    Some(Error::Deadlock { tasks: stuck }),
                    None,
                    started,
                );
            }

            pass += 1;
            match self.run_pass(pass, ready, &mut state, &ctx).await {
                Ok(PassOutcome::Progressed) => {}
                Ok(PassOutcome::Cancelled) => return self.cancelled(run_id, state, started),
                Ok(PassOutcome::Failed(e)) => {
                    return self.finish(run_id, state, RunStatus::Failed, Some(e), None, started)
                }
                Err(e) => {
                    warn!(error = %e, "Internal scheduler error");
                    return self.finish(run_id, state, RunStatus::Failed, Some(e), None, started);
                }
            }
        }

        if self.cancel.is_cancelled() {
            return self.cancelled(run_id, state, started);
        }
        match self.synthesize(plan, &mut state, &ctx).await {
            Ok(synthesis) => {
                self.finish(run_id, state, RunStatus::Completed, None, synthesis, started)
            }
            Err(_) => self.cancelled(run_id, state, started),
        }
    }

    /// Dispatch one pass of ready tasks and record their outcomes.
    async fn run_pass(
        &self,
        pass: usize,
        ready: Vec<&Task>,
        state: &mut ExecutionState,
        ctx: &RunContext,
    ) -> Result<PassOutcome> {
        let snapshot = state.store.snapshot();
        let mut dispatch: Vec<(&Task, Arc<dyn Worker>)> = Vec::with_capacity(ready.len());

        for task in ready {
            if let Some(reason) = self.skip_reason(task, &snapshot) {
                info!(task = %task.name, reason = %reason, "Skipping task");
                state.transition(
                    &task.name,
                    TaskStatus::Skipped {
                        reason: reason.clone(),
                    },
                )?;
                state.complete(TaskResult::skipped(task, &reason, 1, Utc::now()))?;
                self.emit(SchedulerEvent::TaskSkipped {
                    task: task.name.clone(),
                    reason: reason.clone(),
                });
                self.report("task_skipped", &format!("{}: {}", task.name, reason));
                continue;
            }

            let resolution = self.registry.resolve(task);
            if let Some(warning) = resolution.warning {
                warn!(task = %task.name, "{}", warning);
                state.warnings.push(warning);
            }
            state.transition(&task.name, TaskStatus::Running)?;
            dispatch.push((task, resolution.worker));
        }

        if dispatch.is_empty() {
            return Ok(PassOutcome::Progressed);
        }

        let names: Vec<String> = dispatch.iter().map(|(t, _)| t.name.clone()).collect();
        debug!(pass, tasks = ?names, "Dispatching pass");
        self.emit(SchedulerEvent::PassStarted { pass, tasks: names });

        let limit = self
            .config
            .concurrency_limit
            .unwrap_or(dispatch.len())
            .max(1);
        let mut runs: Vec<(usize, Result<TaskRun>)> = stream::iter(
            dispatch.into_iter().enumerate().map(|(index, (task, worker))| {
                let run = self.execute_task(task, worker, Arc::clone(&snapshot), ctx);
                async move { (index, run.await) }
            }),
        )
        .buffer_unordered(limit)
        .collect()
        .await;
        // Record in plan order, whatever order the tasks finished in.
        runs.sort_by_key(|(index, _)| *index);

        let mut failure = None;
        let mut cancelled = false;
        for (_, run) in runs {
            let run = run?;
            let name = run.result.task_name.clone();
            if let Some(status) = state.statuses.get_mut(&name) {
                *status = run.status;
            }
            if run.cancelled {
                cancelled = true;
            } else if run.result.failed {
                if failure.is_none() {
                    failure = Some(Error::TaskExecution {
                        task: name,
                        attempts: run.result.attempts,
                        error: run.result.error.clone().unwrap_or_default(),
                    });
                }
                state.store.record(run.result)?;
            } else {
                state.complete(run.result)?;
            }
        }

        Ok(match (cancelled, failure) {
            (true, _) => PassOutcome::Cancelled,
            (false, Some(e)) => PassOutcome::Failed(e),
            (false, None) => PassOutcome::Progressed,
        })
    }

    /// Why a task should be skipped, if conditional execution says so.
    fn skip_reason(&self, task: &Task, snapshot: &ResultSnapshot) -> Option<String> {
        if !self.config.conditional_execution {
            return None;
        }
        let condition = task.condition.as_ref()?;
        if condition_holds(condition, snapshot) {
            None
        } else {
            Some(format!("condition on '{}' not met", condition.task))
        }
    }

    /// Run one task to a final outcome under the retry policy.
    async fn execute_task(
        &self,
        task: &Task,
        worker: Arc<dyn Worker>,
        snapshot: ResultSnapshot,
        ctx: &RunContext,
    ) -> Result<TaskRun> {
        let policy = self.config.retry_policy();
        let started_at = Utc::now();
        let mut status = TaskStatus::Running;
        let mut attempt = 1u32;

        loop {
            debug!(
                task = %task.name,
                attempt,
                max_attempts = policy.max_attempts(),
                worker = worker.name(),
                "Task attempt starting"
            );
            self.emit(SchedulerEvent::TaskStarted {
                task: task.name.clone(),
                attempt,
            });
            self.report(
                "task_start",
                &format!(
                    "{} (attempt {}/{}, worker {})",
                    task.name,
                    attempt,
                    policy.max_attempts(),
                    worker.name()
                ),
            );

            let input = WorkerInput {
                task: task.clone(),
                domain_context: Arc::clone(&ctx.domain_context),
                completed_results: Arc::clone(&snapshot),
                instructions: task.custom_instructions.clone(),
                overview: ctx.overview.clone(),
                attempt,
            };
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                outcome = worker.process(input) => Some(outcome),
            };

            let error = match outcome {
                None => return cancelled_run(task, status, attempt, started_at),
                Some(Ok(TaskOutcome::Completed(output))) => {
                    status.transition(TaskStatus::Succeeded)?;
                    info!(task = %task.name, attempts = attempt, "Task completed");
                    self.emit(SchedulerEvent::TaskCompleted {
                        task: task.name.clone(),
                        attempts: attempt,
                    });
                    self.report("task_complete", &task.name);
                    return Ok(TaskRun {
                        result: TaskResult::succeeded(task, output, attempt, started_at),
                        status,
                        cancelled: false,
                    });
                }
                Some(Ok(TaskOutcome::Skipped { reason })) => {
                    status.transition(TaskStatus::Skipped {
                        reason: reason.clone(),
                    })?;
                    info!(task = %task.name, reason = %reason, "Worker skipped task");
                    self.emit(SchedulerEvent::TaskSkipped {
                        task: task.name.clone(),
                        reason: reason.clone(),
                    });
                    self.report("task_skipped", &format!("{}: {}", task.name, reason));
                    return Ok(TaskRun {
                        result: TaskResult::skipped(task, &reason, attempt, started_at),
                        status,
                        cancelled: false,
                    });
                }
                Some(Err(e)) => e,
            };

            if !policy.should_retry(attempt) {
                status.transition(TaskStatus::Failed {
                    error: error.message.clone(),
                })?;
                warn!(task = %task.name, attempts = attempt, error = %error, "Task failed");
                self.emit(SchedulerEvent::TaskFailed {
                    task: task.name.clone(),
                    attempts: attempt,
                    error: error.message.clone(),
                });
                self.report(
                    "task_failed",
                    &format!("{} after {} attempt(s): {}", task.name, attempt, error),
                );
                return Ok(TaskRun {
                    result: TaskResult::failed(task, attempt, &error.message, started_at),
                    status,
                    cancelled: false,
                });
            }

            let delay = policy.delay(attempt);
            attempt += 1;
            status.transition(TaskStatus::Retrying { attempt })?;
            warn!(
                task = %task.name,
                next_attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Task attempt failed, retrying"
            );
            self.emit(SchedulerEvent::TaskRetrying {
                task: task.name.clone(),
                next_attempt: attempt,
                delay,
                error: error.message.clone(),
            });
            self.report(
                "task_retry",
                &format!("{} retrying in {}ms: {}", task.name, delay.as_millis(), error),
            );

            let cancelled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                return cancelled_run(task, status, attempt - 1, started_at);
            }
            status.transition(TaskStatus::Running)?;
        }
    }

    /// Run the synthesis step if a synthesizer is registered and there is
    /// something to synthesize. Failures become warnings.
    ///
    /// Returns `Err(Error::Cancelled)` only when the token interrupts the
    /// step; a step that already finished keeps its result.
    async fn synthesize(
        &self,
        plan: &Plan,
        state: &mut ExecutionState,
        ctx: &RunContext,
    ) -> Result<Option<TaskResult>> {
        let Some(worker) = self.registry.synthesizer() else {
            debug!("No synthesis worker registered");
            return Ok(None);
        };
        if !SynthesisStep::should_run(&state.store) {
            debug!("No canonical results, skipping synthesis");
            return Ok(None);
        }

        let step = SynthesisStep::new(worker);
        self.report("synthesis", &format!("running {}", step.worker_name()));
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            outcome = step.run(plan, state.store.snapshot(), Arc::clone(&ctx.domain_context)) => outcome,
        };

        match outcome {
            Ok(result) => {
                info!("Synthesis completed");
                self.emit(SchedulerEvent::SynthesisCompleted { succeeded: true });
                Ok(Some(result))
            }
            Err(e) => {
                warn!(error = %e, "Synthesis failed");
                self.emit(SchedulerEvent::SynthesisCompleted { succeeded: false });
                self.report("synthesis", &e.to_string());
                state.warnings.push(e.to_string());
                Ok(None)
            }
        }
    }

    fn cancelled(
        &self,
        run_id: RunId,
        state: ExecutionState,
        started: tokio::time::Instant,
    ) -> ExecutionResult {
        self.finish(
            run_id,
            state,
            RunStatus::Cancelled,
            Some(Error::Cancelled),
            None,
            started,
        )
    }

    fn finish(
        &self,
        run_id: RunId,
        state: ExecutionState,
        status: RunStatus,
        error: Option<Error>,
        synthesis: Option<TaskResult>,
        started: tokio::time::Instant,
    ) -> ExecutionResult {
        let duration_ms = started.elapsed().as_millis() as u64;
        match &error {
            Some(e) => warn!(status = %status, error = %e, duration_ms, "Run finished"),
            None => info!(status = %status, duration_ms, "Run finished"),
        }
        self.emit(SchedulerEvent::RunFinished { run_id, status });
        self.report("run", &format!("{}", status));

        ExecutionResult {
            run_id,
            status,
            per_task_results: state.store.into_results(),
            synthesis,
            error: error.map(|e| e.to_string()),
            warnings: state.warnings,
            statuses: state.statuses,
            duration_ms,
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

fn cancelled_run(
    task: &Task,
    mut status: TaskStatus,
    attempts: u32,
    started_at: chrono::DateTime<Utc>,
) -> Result<TaskRun> {
    status.transition(TaskStatus::Failed {
        error: "run cancelled".to_string(),
    })?;
    Ok(TaskRun {
        result: TaskResult::failed(task, attempts, "run cancelled", started_at),
        status,
        cancelled: true,
    })
}

/// Evaluate a task condition against the results recorded so far.
pub fn condition_holds(condition: &Condition, results: &BTreeMap<String, TaskResult>) -> bool {
    let Some(result) = results.get(&condition.task) else {
        return false;
    };
    if !result.is_usable() {
        return false;
    }
    let value = match &condition.pointer {
        Some(pointer) => match result.output.pointer(pointer) {
            Some(v) => v,
            None => return false,
        },
        None => &result.output,
    };
    match &condition.equals {
        Some(expected) => value == expected,
        None => true,
    }
}

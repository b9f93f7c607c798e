//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted workers that record every call they receive
//! - Synthesis workers that count invocations
//! - Predefined plan shapes

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use tracewise::{
    EngineConfig, Plan, Scheduler, SchedulerEvent, Task, TaskOutcome, Worker, WorkerError,
    WorkerInput, WorkerRegistry,
};

/// What a scripted worker does for one task.
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeed with the default output.
    Succeed,
    /// Succeed with this output.
    Output(Value),
    /// Fail the first `n` attempts, then succeed.
    FailTimes(u32),
    AlwaysFail,
    Skip(&'static str),
}

/// One recorded worker invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub task: String,
    pub attempt: u32,
    /// Task names present in the snapshot the worker received.
    pub seen: Vec<String>,
    pub domain_context: Value,
    pub instructions: Option<String>,
    pub at: Instant,
}

/// A worker whose behavior is scripted per task.
pub struct ScriptedWorker {
    name: String,
    scripts: HashMap<String, Script>,
    work: Duration,
    task_work: HashMap<String, Duration>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedWorker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scripts: HashMap::new(),
            work: Duration::ZERO,
            task_work: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn script(mut self, task: &str, script: Script) -> Self {
        self.scripts.insert(task.to_string(), script);
        self
    }

    /// Simulate `work` of elapsed time per call.
    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    /// Simulate `work` of elapsed time for calls of one task.
    pub fn with_task_work(mut self, task: &str, work: Duration) -> Self {
        self.task_work.insert(task.to_string(), work);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    /// Task names in the order their calls started.
    pub fn call_order(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.task).collect()
    }

    pub fn calls_for(&self, task: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.task == task).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: WorkerInput) -> Result<TaskOutcome, WorkerError> {
        let seen: Vec<String> = input.completed_results.keys().cloned().collect();
        self.calls.lock().expect("calls lock poisoned").push(Call {
            task: input.task.name.clone(),
            attempt: input.attempt,
            seen: seen.clone(),
            domain_context: (*input.domain_context).clone(),
            instructions: input.instructions.clone(),
            at: Instant::now(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let work = self
            .task_work
            .get(&input.task.name)
            .copied()
            .unwrap_or(self.work);
        if !work.is_zero() {
            tokio::time::sleep(work).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let script = self
            .scripts
            .get(&input.task.name)
            .cloned()
            .unwrap_or(Script::Succeed);
        match script {
            Script::Succeed => Ok(json!({
                "task": input.task.name,
                "worker": self.name,
                "seen": seen,
            })
            .into()),
            Script::Output(value) => Ok(value.into()),
            Script::FailTimes(n) if input.attempt <= n => Err(WorkerError::new(format!(
                "{} transient failure {}",
                input.task.name, input.attempt
            ))),
            Script::FailTimes(_) => Ok(json!({ "task": input.task.name }).into()),
            Script::AlwaysFail => Err(WorkerError::new(format!(
                "{} always fails",
                input.task.name
            ))),
            Script::Skip(reason) => Ok(TaskOutcome::Skipped {
                reason: reason.to_string(),
            }),
        }
    }
}

/// A synthesis worker that counts its calls.
pub struct CountingSynthesizer {
    pub calls: AtomicUsize,
    fail: bool,
}

impl CountingSynthesizer {
    pub fn succeeding() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for CountingSynthesizer {
    fn name(&self) -> &str {
        "counting-synthesis"
    }

    async fn process(&self, input: WorkerInput) -> Result<TaskOutcome, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(WorkerError::new("synthesis model unavailable"));
        }
        Ok(json!({
            "overview": input.overview,
            "summarized": input.completed_results.keys().cloned().collect::<Vec<_>>(),
        })
        .into())
    }
}

/// Registry with `worker` as default and for every canonical type.
pub fn registry_for(worker: Arc<ScriptedWorker>) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new(worker.clone());
    for key in ["analysis", "context", "diagnosis", "recommendation", "custom"] {
        registry.register(key, worker.clone());
    }
    registry
}

pub fn scheduler(worker: Arc<ScriptedWorker>, config: EngineConfig) -> Scheduler {
    Scheduler::new(registry_for(worker), config)
}

pub fn scheduler_with_synthesis(
    worker: Arc<ScriptedWorker>,
    synth: Arc<CountingSynthesizer>,
    config: EngineConfig,
) -> Scheduler {
    Scheduler::new(registry_for(worker).with_synthesizer(synth), config)
}

/// Retries enabled with the default backoff.
pub fn retrying(max_retries: u32) -> EngineConfig {
    EngineConfig {
        enable_retries: true,
        max_retries: Some(max_retries),
        ..EngineConfig::default()
    }
}

pub fn limited(concurrency: usize) -> EngineConfig {
    EngineConfig {
        concurrency_limit: Some(concurrency),
        ..EngineConfig::default()
    }
}

/// Drain every event currently buffered on the channel.
pub fn drain(rx: &mut mpsc::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ========== Plan Shapes ==========

/// A -> B -> C
pub fn chain_plan() -> Plan {
    Plan::new(
        "chain",
        vec![
            Task::new("A", "analysis"),
            Task::new("B", "context").depends_on(["A"]),
            Task::new("C", "diagnosis").depends_on(["B"]),
        ],
    )
}

/// A -> {B, C} -> D
pub fn diamond_plan() -> Plan {
    Plan::new(
        "diamond",
        vec![
            Task::new("A", "analysis"),
            Task::new("B", "context").depends_on(["A"]),
            Task::new("C", "context").depends_on(["A"]),
            Task::new("D", "diagnosis").depends_on(["B", "C"]),
        ],
    )
}

/// `count` tasks with no dependencies.
pub fn independent_plan(count: usize) -> Plan {
    Plan::new(
        "independent",
        (0..count)
            .map(|i| Task::new(&format!("task-{}", i), "analysis"))
            .collect(),
    )
}

/// Assert a paused-clock gap matches a scheduled delay to the millisecond.
pub fn assert_delay(actual: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(5),
        "expected a {:?} delay, got {:?}",
        expected,
        actual
    );
}

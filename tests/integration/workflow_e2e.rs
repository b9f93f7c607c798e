//! End-to-end run tests.
//!
//! These tests take a plan all the way to an `ExecutionResult` and check
//! ordering, synthesis and the shape of the result.

use serde_json::json;
use std::sync::Arc;

use tracewise::{EngineConfig, Plan, RunStatus, Task, TaskStatus};

use crate::fixtures::{
    chain_plan, diamond_plan, registry_for, scheduler, scheduler_with_synthesis,
    CountingSynthesizer, Script, ScriptedWorker,
};

/// Test: Dependency ordering
/// Given A -> B -> C
/// When the plan runs
/// Then each task sees exactly its predecessors
#[tokio::test]
async fn test_chain_runs_in_dependency_order() {
    let worker = Arc::new(ScriptedWorker::new("mock"));
    let result = scheduler(worker.clone(), EngineConfig::default())
        .run(&chain_plan(), json!({}))
        .await;

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.error.is_none());
    assert_eq!(worker.call_order(), vec!["A", "B", "C"]);

    let calls = worker.calls();
    assert!(calls[0].seen.is_empty());
    assert_eq!(calls[1].seen, vec!["A"]);
    assert_eq!(calls[2].seen, vec!["A", "B"]);

    for name in ["A", "B", "C"] {
        let r = &result.per_task_results[name];
        assert_eq!(r.attempts, 1);
        assert!(r.is_usable());
        assert_eq!(result.statuses[name], TaskStatus::Succeeded);
    }
}

/// Test: Diamond
/// Given A -> {B, C} -> D
/// Then A runs alone, B and C share a pass, D runs last seeing all three
#[tokio::test]
async fn test_diamond_dispatch() {
    let worker = Arc::new(ScriptedWorker::new("mock"));
    let result = scheduler(worker.clone(), EngineConfig::default())
        .run(&diamond_plan(), json!({}))
        .await;

    assert!(result.is_success());
    let order = worker.call_order();
    assert_eq!(order[0], "A");
    assert_eq!(order[3], "D");

    for sibling in ["B", "C"] {
        assert_eq!(worker.calls_for(sibling)[0].seen, vec!["A"]);
    }
    assert_eq!(worker.calls_for("D")[0].seen, vec!["A", "B", "C"]);
}

/// Test: Empty plan
/// Then the run completes with nothing dispatched and no synthesis
#[tokio::test]
async fn test_empty_plan() {
    let worker = Arc::new(ScriptedWorker::new("mock"));
    let synth = Arc::new(CountingSynthesizer::succeeding());
    let result =
        scheduler_with_synthesis(worker.clone(), synth.clone(), EngineConfig::default())
            .run(&Plan::default(), json!({}))
            .await;

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.per_task_results.is_empty());
    assert!(result.synthesis.is_none());
    assert!(result.error.is_none());
    assert!(worker.calls().is_empty());
    assert_eq!(synth.call_count(), 0);
}

/// Test: Synthesis runs once over all results
#[tokio::test]
async fn test_synthesis_runs_after_all_tasks() {
    let worker = Arc::new(ScriptedWorker::new("mock"));
    let synth = Arc::new(CountingSynthesizer::succeeding());
    let result =
        scheduler_with_synthesis(worker.clone(), synth.clone(), EngineConfig::default())
            .run(&diamond_plan(), json!({}))
            .await;

    assert_eq!(synth.call_count(), 1);
    let synthesis = result.synthesis.expect("synthesis result");
    assert_eq!(synthesis.task_name, "synthesis");
    assert_eq!(synthesis.output["overview"], "diamond");
    assert_eq!(
        synthesis.output["summarized"],
        json!(["A", "B", "C", "D"])
    );
    // Synthesis is not a plan task.
    assert!(!result.per_task_results.contains_key("synthesis"));
}

/// Test: Synthesis isolation
/// Given a synthesis worker that fails
/// Then the run still succeeds with a warning and no synthesis output
#[tokio::test]
async fn test_synthesis_failure_is_non_fatal() {
    let worker = Arc::new(ScriptedWorker::new("mock"));
    let synth = Arc::new(CountingSynthesizer::failing());
    let result =
        scheduler_with_synthesis(worker.clone(), synth.clone(), EngineConfig::default())
            .run(&chain_plan(), json!({}))
            .await;

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.error.is_none());
    assert!(result.synthesis.is_none());
    assert_eq!(result.per_task_results.len(), 3);
    assert_eq!(synth.call_count(), 1, "synthesis is never retried");
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("synthesis model unavailable")));
}

/// Test: Synthesis needs canonical output
/// Given only custom tasks
/// Then synthesis is not attempted
#[tokio::test]
async fn test_synthesis_skipped_without_canonical_results() {
    let worker = Arc::new(ScriptedWorker::new("mock"));
    let synth = Arc::new(CountingSynthesizer::succeeding());
    let plan = Plan::new("", vec![Task::new("x", "custom")]);
    let result =
        scheduler_with_synthesis(worker.clone(), synth.clone(), EngineConfig::default())
            .run(&plan, json!({}))
            .await;

    assert!(result.is_success());
    assert!(result.synthesis.is_none());
    assert_eq!(synth.call_count(), 0);
}

/// Test: Synthesis also ignores canonical tasks that were skipped
#[tokio::test]
async fn test_synthesis_skipped_when_canonical_tasks_skipped() {
    let worker = Arc::new(ScriptedWorker::new("mock").script("A", Script::Skip("nothing to do")));
    let synth = Arc::new(CountingSynthesizer::succeeding());
    let plan = Plan::new("", vec![Task::new("A", "analysis")]);
    let result =
        scheduler_with_synthesis(worker.clone(), synth.clone(), EngineConfig::default())
            .run(&plan, json!({}))
            .await;

    assert!(result.per_task_results["A"].skipped);
    assert_eq!(synth.call_count(), 0);
}

/// Test: Unknown task type
/// Then the default worker runs it and the fallback is reported as a warning
#[tokio::test]
async fn test_unknown_type_uses_default_worker() {
    let worker = Arc::new(ScriptedWorker::new("mock"));
    let plan = Plan::new("", vec![Task::new("lint", "trace-lint")]);
    let result = scheduler(worker.clone(), EngineConfig::default())
        .run(&plan, json!({}))
        .await;

    assert!(result.is_success());
    assert_eq!(worker.call_order(), vec!["lint"]);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("trace-lint"));
}

/// Test: Custom worker resolution
/// Given a custom task naming a registered worker
/// Then that worker runs the task
#[tokio::test]
async fn test_custom_worker_resolution() {
    let generic = Arc::new(ScriptedWorker::new("generic"));
    let profiler = Arc::new(ScriptedWorker::new("span-profiler"));
    let registry = registry_for(generic.clone()).with("span-profiler", profiler.clone());
    let plan = Plan::new(
        "",
        vec![
            Task::new("profile", "custom")
                .with_custom_worker("span-profiler")
                .with_instructions("rank spans by self time"),
            Task::new("other", "custom"),
        ],
    );
    let result = tracewise::Scheduler::new(registry, EngineConfig::default())
        .run(&plan, json!({}))
        .await;

    assert!(result.is_success());
    assert!(result.warnings.is_empty());
    assert_eq!(profiler.call_order(), vec!["profile"]);
    assert_eq!(generic.call_order(), vec!["other"]);
    assert_eq!(result.per_task_results["profile"].output["worker"], "span-profiler");
    assert_eq!(
        profiler.calls()[0].instructions.as_deref(),
        Some("rank spans by self time")
    );
    assert_eq!(generic.calls()[0].instructions, None);
}

/// Test: Plans load from JSON with camelCase aliases and run
#[tokio::test]
async fn test_plan_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plan.json");
    std::fs::write(
        &path,
        r#"{
            "overview": "slow checkout",
            "tasks": [
                {"name": "spans", "type": "analysis", "description": "find slow spans"},
                {"name": "fix", "type": "recommendation", "dependencies": ["spans"],
                 "customInstructions": "be brief"}
            ]
        }"#,
    )
    .unwrap();

    let plan = Plan::load(&path).unwrap();
    let worker = Arc::new(ScriptedWorker::new("mock"));
    let result = scheduler(worker.clone(), EngineConfig::default())
        .run(&plan, json!({"trace_id": "abc"}))
        .await;

    assert!(result.is_success());
    assert_eq!(worker.call_order(), vec!["spans", "fix"]);

    let calls = worker.calls();
    for call in &calls {
        assert_eq!(call.domain_context, json!({"trace_id": "abc"}), "{}", call.task);
    }
    assert_eq!(calls[0].instructions, None);
    assert_eq!(calls[1].instructions.as_deref(), Some("be brief"));
}

/// Test: ExecutionResult serializes for the CLI
#[tokio::test]
async fn test_execution_result_json() {
    let worker = Arc::new(ScriptedWorker::new("mock"));
    let result = scheduler(worker, EngineConfig::default())
        .run(&chain_plan(), json!({}))
        .await;

    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["status"], "completed");
    assert_eq!(value["per_task_results"]["B"]["task_type"], "context");
    assert_eq!(value["statuses"]["C"]["state"], "succeeded");
    assert!(value.get("error").is_none());

    let back: tracewise::ExecutionResult = serde_json::from_value(value).unwrap();
    assert_eq!(back.run_id, result.run_id);
    assert_eq!(back.per_task_results.len(), 3);
}

/// Test: One scheduler can run plans concurrently
#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let worker = Arc::new(ScriptedWorker::new("mock"));
    let scheduler = scheduler(worker.clone(), EngineConfig::default());
    let chain = chain_plan();
    let diamond = diamond_plan();

    let (a, b) = tokio::join!(
        scheduler.run(&chain, json!({})),
        scheduler.run(&diamond, json!({}))
    );

    assert!(a.is_success());
    assert!(b.is_success());
    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.per_task_results.len(), 3);
    assert_eq!(b.per_task_results.len(), 4);
    assert_eq!(worker.calls().len(), 7);
}

//! Conditional execution tests.

use serde_json::json;
use std::sync::Arc;

use tracewise::{Condition, EngineConfig, Plan, RunStatus, Task, TaskStatus};

use crate::fixtures::{scheduler, Script, ScriptedWorker};

fn conditional() -> EngineConfig {
    EngineConfig {
        conditional_execution: true,
        ..EngineConfig::default()
    }
}

/// triage -> deep-dive (only when severity is high) -> report
fn triage_plan() -> Plan {
    Plan::new(
        "triage",
        vec![
            Task::new("triage", "analysis"),
            Task::new("deep-dive", "diagnosis")
                .depends_on(["triage"])
                .with_condition(Condition {
                    task: "triage".to_string(),
                    pointer: Some("/severity".to_string()),
                    equals: Some(json!("high")),
                }),
            Task::new("report", "recommendation").depends_on(["deep-dive"]),
        ],
    )
}

/// Test: Condition holds
#[tokio::test]
async fn test_condition_met_runs_task() {
    let worker = Arc::new(
        ScriptedWorker::new("mock").script("triage", Script::Output(json!({"severity": "high"}))),
    );
    let result = scheduler(worker.clone(), conditional())
        .run(&triage_plan(), json!({}))
        .await;

    assert!(result.is_success());
    assert_eq!(worker.call_order(), vec!["triage", "deep-dive", "report"]);
    assert_eq!(result.statuses["deep-dive"], TaskStatus::Succeeded);
}

/// Test: Condition fails
/// Then the task is skipped without calling a worker and dependents still run
#[tokio::test]
async fn test_condition_unmet_skips_task() {
    let worker = Arc::new(
        ScriptedWorker::new("mock").script("triage", Script::Output(json!({"severity": "low"}))),
    );
    let result = scheduler(worker.clone(), conditional())
        .run(&triage_plan(), json!({}))
        .await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(worker.call_order(), vec!["triage", "report"]);

    let skipped = &result.per_task_results["deep-dive"];
    assert!(skipped.skipped);
    assert!(!skipped.failed);
    assert!(skipped.output.is_null());
    assert!(matches!(
        result.statuses["deep-dive"],
        TaskStatus::Skipped { ref reason } if reason.contains("triage")
    ));

    // The dependent sees the skipped record.
    assert_eq!(
        worker.calls_for("report")[0].seen,
        vec!["deep-dive", "triage"]
    );
}

/// Test: Conditions are ignored unless enabled
#[tokio::test]
async fn test_condition_ignored_when_disabled() {
    let worker = Arc::new(
        ScriptedWorker::new("mock").script("triage", Script::Output(json!({"severity": "low"}))),
    );
    let result = scheduler(worker.clone(), EngineConfig::default())
        .run(&triage_plan(), json!({}))
        .await;

    assert!(result.is_success());
    assert_eq!(worker.call_order(), vec!["triage", "deep-dive", "report"]);
}

/// Test: A condition on a non-dependency is rejected up front
#[tokio::test]
async fn test_condition_on_non_dependency_is_invalid() {
    let worker = Arc::new(ScriptedWorker::new("mock"));
    let plan = Plan::new(
        "",
        vec![
            Task::new("a", "analysis"),
            Task::new("b", "analysis").with_condition(Condition {
                task: "a".to_string(),
                pointer: None,
                equals: None,
            }),
        ],
    );
    let result = scheduler(worker.clone(), conditional())
        .run(&plan, json!({}))
        .await;

    assert_eq!(result.status, RunStatus::Invalid);
    assert!(worker.calls().is_empty());
}

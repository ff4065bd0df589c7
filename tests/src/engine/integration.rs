#![cfg(test)]
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use vigil_common::config::ModuleConfig;
use vigil_core::error::FailureKind;
use vigil_core::{
    DagDefinition, DagError, DagNodeConfig, DataValue, ExecutionPlan, NodeStatus, Orchestrator,
    RunError,
};

use crate::support::{self, FINDINGS, FINDINGS_COUNT, SIDE};

fn node(id: &str, module: &str) -> DagNodeConfig {
    DagNodeConfig::new(id, module)
}

async fn run(dag: DagDefinition) -> vigil_core::RunOutcome {
    Orchestrator::new(support::scripted_registry(), dag)
        .run(CancellationToken::new(), BTreeMap::new())
        .await
}

/// Two producers of the same list key land in one layer, and their consumer sees
/// both values.
#[tokio::test]
async fn producers_fan_in_to_consumer() {
    let dag = DagDefinition::new("fan-in")
        .node(node("count", "counter"))
        .node(node("a", "producer_a"))
        .node(node("b", "producer_b"));

    let plan = ExecutionPlan::build(&dag, &support::scripted_registry()).unwrap();
    assert_eq!(plan.layer_ids(), vec![vec!["a", "b"], vec!["count"]]);

    let outcome = run(dag).await;
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.context.list(FINDINGS).len(), 2);
    assert_eq!(
        outcome.context.single(FINDINGS_COUNT),
        Some(&DataValue::Integer(2))
    );
}

#[tokio::test]
async fn missing_producer_skips_only_that_branch() {
    let dag = DagDefinition::new("orphan")
        .node(node("orphan", "orphan_counter"))
        .node(node("side", "side"));

    let outcome = run(dag).await;

    assert!(matches!(
        outcome.node("orphan").unwrap().status,
        NodeStatus::Skipped(_)
    ));
    assert!(outcome.node("side").unwrap().status.is_success());
    assert_eq!(outcome.context.list(SIDE).len(), 1);

    match outcome.error {
        Some(RunError::Partial { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].instance, "orphan");
            assert!(matches!(failures[0].kind, FailureKind::Unreachable(_)));
        }
        other => panic!("expected a partial failure, got {other:?}"),
    }
}

#[tokio::test]
async fn explicit_cycle_is_rejected_before_anything_runs() {
    let dag = DagDefinition::from_json(
        r#"{
            "name": "loop",
            "nodes": [
                { "id": "a", "module": "producer_a", "depends_on": ["b"] },
                { "id": "b", "module": "side", "depends_on": ["a"] }
            ]
        }"#,
    )
    .unwrap();

    let outcome = run(dag).await;

    assert!(outcome.context.is_empty());
    match outcome.error {
        Some(RunError::Dag(DagError::Cycle(names))) => assert_eq!(names, vec!["a", "b"]),
        other => panic!("expected a cycle error, got {other:?}"),
    }
}

#[tokio::test]
async fn bad_node_config_aborts_the_run() {
    let dag = DagDefinition::new("bad-config")
        .node(node("side", "side"))
        .node(node("a", "producer_a").with_config(ModuleConfig::new().with("delay_ms", "soon")));

    let outcome = run(dag).await;

    let err = outcome.error.expect("init error");
    assert!(err.is_fatal());
    assert!(matches!(err, RunError::Init { ref instance, .. } if instance == "a"));
    assert!(!outcome.context.contains(SIDE));
}

/// A panicking module is reported as crashed; siblings still finish, and the
/// consumer of the crashed producer's key is skipped.
#[tokio::test]
async fn panic_is_contained_to_its_node() {
    let dag = DagDefinition::new("crash")
        .node(node("a", "producer_a").with_config(ModuleConfig::new().with("panic", true)))
        .node(node("b", "producer_b"))
        .node(node("side", "side"))
        .node(node("count", "counter"));

    let outcome = run(dag).await;

    assert!(matches!(
        outcome.node("a").unwrap().status,
        NodeStatus::Crashed(_)
    ));
    assert!(outcome.node("b").unwrap().status.is_success());
    assert!(outcome.node("side").unwrap().status.is_success());
    assert!(matches!(
        outcome.node("count").unwrap().status,
        NodeStatus::Skipped(_)
    ));
    assert_eq!(outcome.context.list(FINDINGS).len(), 1);
    assert_eq!(outcome.error.unwrap().failures().len(), 2);
}

#[tokio::test]
async fn failed_execute_keeps_partial_results() {
    let dag = DagDefinition::new("partial")
        .node(node("a", "producer_a").with_config(ModuleConfig::new().with("fail", true)))
        .node(node("b", "producer_b"));

    let outcome = run(dag).await;

    assert_eq!(
        outcome.context.list(FINDINGS),
        &[DataValue::from("b-finding")]
    );
    assert!(matches!(
        outcome.node("a").unwrap().status,
        NodeStatus::Failed(ref msg) if msg.contains("scripted failure")
    ));
}

/// A module that ignores cancellation is abandoned once the grace period runs out.
#[tokio::test]
async fn stubborn_module_is_abandoned_after_grace() {
    let dag = DagDefinition::new("stubborn")
        .node(
            node("slow", "producer_a").with_config(
                ModuleConfig::new()
                    .with("delay_ms", 30_000)
                    .with("stubborn", true),
            ),
        )
        .node(node("count", "counter"));

    let orchestrator = Orchestrator::new(support::scripted_registry(), dag)
        .with_grace_period(Duration::from_millis(100));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let outcome = orchestrator.run(cancel, BTreeMap::new()).await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(outcome.error.as_ref().unwrap().is_cancelled());
    assert_eq!(outcome.node("slow").unwrap().status, NodeStatus::Cancelled);
    assert_eq!(outcome.node("count").unwrap().status, NodeStatus::NotStarted);
}

#[tokio::test]
async fn cooperative_module_stops_within_grace() {
    let dag = DagDefinition::new("cooperative")
        .node(node("slow", "producer_a").with_config(ModuleConfig::new().with("delay_ms", 30_000)))
        .node(node("side", "side"));

    let orchestrator = Orchestrator::new(support::scripted_registry(), dag)
        .with_grace_period(Duration::from_secs(10));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let outcome = orchestrator.run(cancel, BTreeMap::new()).await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.node("slow").unwrap().status, NodeStatus::Cancelled);
    assert!(outcome.node("side").unwrap().status.is_success());
    assert!(matches!(outcome.error, Some(RunError::Cancelled { .. })));
}

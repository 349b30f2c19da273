//! End-to-end runs: checkpoint chains, completion values, and failure modes.

mod common;
use common::*;

use loomgraph::channels::{ChannelError, ChannelKind};
use loomgraph::checkpoint::CheckpointSource;
use loomgraph::graphs::{CompiledGraph, GraphBuilder};
use loomgraph::runtimes::{RunnerError, RuntimeConfig};
use loomgraph::scheduler::SchedulerError;
use serde_json::json;

fn two_step_graph() -> CompiledGraph {
    GraphBuilder::new()
        .add_channel("log", ChannelKind::topic())
        .add_node("a", Append { text: "a ran" })
        .add_node("b", Append { text: "b ran" })
        .set_entry("a")
        .add_edge("a", "b")
        .add_edge("b", "End")
        .compile()
        .expect("valid graph")
}

#[tokio::test]
async fn fresh_run_completes_with_accumulated_log() {
    let (runner, _) = make_runner(two_step_graph());
    let outcome = runner
        .run("t1", vec![("log".into(), json!(["start"]))])
        .await
        .unwrap();

    let values = outcome.values().expect("run should complete");
    assert_eq!(values["log"], json!(["start", "a ran", "b ran"]));
}

#[tokio::test]
async fn fresh_run_writes_the_expected_checkpoint_chain() {
    let (runner, store) = make_runner(two_step_graph());
    runner
        .run("t1", vec![("log".into(), json!(["start"]))])
        .await
        .unwrap();

    let history = store.list_blocking("t1", None, None, None).unwrap();
    assert_eq!(history.len(), 4);

    // Most recent first.
    let rounds: Vec<i64> = history.iter().map(|t| t.checkpoint.round).collect();
    assert_eq!(rounds, vec![2, 1, 0, -1]);
    let ids: Vec<u64> = history.iter().map(|t| t.checkpoint.id).collect();
    assert_eq!(ids, vec![4, 3, 2, 1]);

    let sources: Vec<CheckpointSource> = history.iter().map(|t| t.metadata.source).collect();
    assert_eq!(
        sources,
        vec![
            CheckpointSource::Loop,
            CheckpointSource::Loop,
            CheckpointSource::Loop,
            CheckpointSource::Input,
        ]
    );

    // The input marker carries the raw input as pending writes.
    let input = history.last().unwrap();
    assert_eq!(input.pending_writes.len(), 1);
    assert_eq!(input.pending_writes[0].task_id, "__input__");
    assert_eq!(input.pending_writes[0].channel, "log");
}

#[tokio::test]
async fn rerunning_an_existing_thread_is_rejected() {
    let (runner, _) = make_runner(two_step_graph());
    runner.run("t1", vec![]).await.unwrap();

    let err = runner.run("t1", vec![]).await.unwrap_err();
    assert!(matches!(err, RunnerError::ThreadExists { .. }));
}

#[tokio::test]
async fn unknown_thread_errors_on_resume_surfaces() {
    let (runner, _) = make_runner(two_step_graph());
    let err = runner.continue_run("missing").await.unwrap_err();
    assert!(matches!(err, RunnerError::UnknownThread { .. }));
}

#[tokio::test]
async fn conflicting_last_value_writes_fail_the_round() {
    let graph = GraphBuilder::new()
        .add_channel("winner", ChannelKind::LastValue)
        .add_node(
            "x",
            SetValue {
                channel: "winner",
                value: json!("x"),
            },
        )
        .add_node(
            "y",
            SetValue {
                channel: "winner",
                value: json!("y"),
            },
        )
        .set_entry("x")
        .set_entry("y")
        .add_edge("x", "End")
        .add_edge("y", "End")
        .compile()
        .unwrap();

    let (runner, store) = make_runner(graph);
    let err = runner.run("t1", vec![]).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::Scheduler(SchedulerError::Channel(ChannelError::InvalidUpdate { .. }))
    ));

    // The failed round was never checkpointed.
    let latest = store.get_blocking("t1", None).unwrap().unwrap();
    assert_eq!(latest.checkpoint.round, 0);
}

#[tokio::test]
async fn recursion_limit_aborts_a_cycle() {
    let graph = GraphBuilder::new()
        .add_channel("log", ChannelKind::topic())
        .add_node("spin", Append { text: "spin" })
        .set_entry("spin")
        .add_edge("spin", "spin")
        .compile()
        .unwrap();

    let (runner, store) =
        make_runner_with(graph, RuntimeConfig::default().with_recursion_limit(3));
    let err = runner.run("t1", vec![]).await.unwrap_err();
    assert!(matches!(err, RunnerError::RecursionLimit { limit: 3 }));

    // Rounds up to the limit are durable and recoverable.
    let latest = store.get_blocking("t1", None).unwrap().unwrap();
    assert_eq!(latest.checkpoint.round, 3);
    assert_eq!(
        latest.checkpoint.values["log"],
        json!(["spin", "spin", "spin"])
    );
}

#[tokio::test]
async fn node_failure_surfaces_with_the_node_name() {
    let graph = GraphBuilder::new()
        .add_channel("log", ChannelKind::topic())
        .add_node("bad", Failing)
        .set_entry("bad")
        .add_edge("bad", "End")
        .compile()
        .unwrap();

    let (runner, _) = make_runner(graph);
    let err = runner.run("t1", vec![]).await.unwrap_err();
    match err {
        RunnerError::Node { node, .. } => assert_eq!(node, "bad"),
        other => panic!("expected node failure, got {other:?}"),
    }
}

#[tokio::test]
async fn update_state_edits_land_as_a_new_checkpoint() {
    let (runner, store) = make_runner(two_step_graph());
    runner
        .run("t1", vec![("log".into(), json!(["start"]))])
        .await
        .unwrap();

    let stored = runner
        .update_state("t1", vec![("log".into(), json!(["edit"]))])
        .await
        .unwrap();
    assert_eq!(stored.checkpoint_id, 5);

    let latest = store.get_blocking("t1", None).unwrap().unwrap();
    assert_eq!(latest.metadata.source, CheckpointSource::Update);
    assert_eq!(
        latest.checkpoint.values["log"],
        json!(["start", "a ran", "b ran", "edit"])
    );
    // Edits chain off the checkpoint they modified.
    assert_eq!(latest.checkpoint.parents.get(""), Some(&4));

    // No node subscribes to the edited channel, so continuing is a no-op
    // completion over the edited state.
    let outcome = runner.continue_run("t1").await.unwrap();
    assert_eq!(
        outcome.values().unwrap()["log"],
        json!(["start", "a ran", "b ran", "edit"])
    );
}

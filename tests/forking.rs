//! Forking and time travel: branches share history without mutating it.

mod common;
use common::*;

use loomgraph::channels::ChannelKind;
use loomgraph::checkpoint::CheckpointSource;
use loomgraph::graphs::{CompiledGraph, GraphBuilder};
use loomgraph::runtimes::RunnerError;
use serde_json::json;

fn pipeline() -> CompiledGraph {
    GraphBuilder::new()
        .add_channel("log", ChannelKind::topic())
        .add_node("a", Append { text: "a" })
        .add_node("b", Append { text: "b" })
        .set_entry("a")
        .add_edge("a", "b")
        .add_edge("b", "End")
        .compile()
        .unwrap()
}

#[tokio::test]
async fn fork_branches_without_touching_the_original_chain() {
    let (runner, store) = make_runner(pipeline());
    runner
        .run("t1", vec![("log".into(), json!(["start"]))])
        .await
        .unwrap();

    let before = store.list_blocking("t1", None, None, None).unwrap();
    assert_eq!(before.len(), 4);

    // Fork from the post-input checkpoint (id 2, round 0).
    let branch = runner.fork("t1", 2).await.unwrap();
    assert_eq!(branch.checkpoint_id, 5);

    let tuple = store.get_blocking("t1", Some(5)).unwrap().unwrap();
    assert_eq!(tuple.metadata.source, CheckpointSource::Fork);
    assert_eq!(tuple.checkpoint.round, 0);
    assert_eq!(tuple.checkpoint.parents.get(""), Some(&2));
    assert_eq!(tuple.checkpoint.values["log"], json!(["start"]));

    // The original checkpoints are byte-for-byte intact.
    let after = store.list_blocking("t1", Some(5), None, None).unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn forking_an_unknown_checkpoint_fails() {
    let (runner, _) = make_runner(pipeline());
    runner.run("t1", vec![]).await.unwrap();

    let err = runner.fork("t1", 99).await.unwrap_err();
    assert!(matches!(err, RunnerError::UnknownCheckpoint { .. }));
}

#[tokio::test]
async fn resume_from_replays_execution_from_the_branch_point() {
    let (runner, store) = make_runner(pipeline());
    let original = runner
        .run("t1", vec![("log".into(), json!(["start"]))])
        .await
        .unwrap();
    assert_eq!(
        original.values().unwrap()["log"],
        json!(["start", "a", "b"])
    );

    // Replay from round 0: the branch re-runs both nodes to the same result.
    let replay = runner.resume_from("t1", 2).await.unwrap();
    assert_eq!(replay.values().unwrap()["log"], json!(["start", "a", "b"]));

    // The branch extended the thread rather than rewriting it.
    let history = store.list_blocking("t1", None, None, None).unwrap();
    assert!(history.len() > 4);
    let original_tail = store.get_blocking("t1", Some(4)).unwrap().unwrap();
    assert_eq!(original_tail.checkpoint.round, 2);
}

#[tokio::test]
async fn what_if_edit_then_replay_diverges() {
    let (runner, _) = make_runner(pipeline());
    runner
        .run("t1", vec![("log".into(), json!(["start"]))])
        .await
        .unwrap();

    // Rewind to the post-input snapshot and edit it.
    let branch = runner.fork("t1", 2).await.unwrap();
    runner
        .update_state("t1", vec![("log".into(), json!(["edited"]))])
        .await
        .unwrap();
    // The edit chained off the fork (the latest checkpoint).
    let latest = runner.latest("t1").await.unwrap().unwrap();
    assert_eq!(
        latest.checkpoint.parents.get(""),
        Some(&branch.checkpoint_id)
    );

    let outcome = runner.continue_run("t1").await.unwrap();
    assert_eq!(
        outcome.values().unwrap()["log"],
        json!(["start", "edited", "a", "b"])
    );
}

#[tokio::test]
async fn history_filters_by_metadata() {
    let (runner, _) = make_runner(pipeline());
    runner.run("t1", vec![]).await.unwrap();
    runner.fork("t1", 2).await.unwrap();

    let mut filter = rustc_hash::FxHashMap::default();
    filter.insert("source".to_string(), json!("fork"));
    let forks = runner.history("t1", None, None, Some(filter)).await.unwrap();
    assert_eq!(forks.len(), 1);
    assert_eq!(forks[0].metadata.source, CheckpointSource::Fork);

    let limited = runner.history("t1", None, Some(2), None).await.unwrap();
    assert_eq!(limited.len(), 2);
}

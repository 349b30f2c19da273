//! Durability modes: when checkpoints become visible in the store.

mod common;
use common::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use loomgraph::channels::ChannelKind;
use loomgraph::checkpoint::InMemoryStore;
use loomgraph::graphs::{CompiledGraph, GraphBuilder};
use loomgraph::interrupt::Resume;
use loomgraph::runtimes::{Durability, Runner, RunnerError, RuntimeConfig};
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

fn gated() -> CompiledGraph {
    GraphBuilder::new()
        .add_channel("verdict", ChannelKind::LastValue)
        .add_node(
            "gate",
            Gate {
                prompt: "go?",
                channel: "verdict",
            },
        )
        .set_entry("gate")
        .add_edge("gate", "End")
        .compile()
        .unwrap()
}

#[tokio::test]
async fn sync_mode_persists_every_round_as_it_commits() {
    let (runner, store) = make_runner_with(
        pipeline(),
        RuntimeConfig::default().with_durability(Durability::Sync),
    );
    runner.run("t1", vec![]).await.unwrap();
    assert_eq!(store.list_blocking("t1", None, None, None).unwrap().len(), 4);
}

#[tokio::test]
async fn async_mode_drains_saves_before_reporting_completion() {
    let (runner, store) = make_runner_with(
        pipeline(),
        RuntimeConfig::default().with_durability(Durability::Async),
    );
    runner.run("t1", vec![]).await.unwrap();
    // run() only returns after background saves are awaited.
    assert_eq!(store.list_blocking("t1", None, None, None).unwrap().len(), 4);
}

#[tokio::test]
async fn exit_mode_flushes_on_completion() {
    let (runner, store) = make_runner_with(
        pipeline(),
        RuntimeConfig::default().with_durability(Durability::Exit),
    );
    runner.run("t1", vec![]).await.unwrap();

    let history = store.list_blocking("t1", None, None, None).unwrap();
    assert_eq!(history.len(), 4);
    let rounds: Vec<i64> = history.iter().map(|t| t.checkpoint.round).collect();
    assert_eq!(rounds, vec![2, 1, 0, -1]);
}

#[tokio::test]
async fn exit_mode_flushes_at_an_interrupt_boundary() {
    let (runner, store) = make_runner_with(
        gated(),
        RuntimeConfig::default().with_durability(Durability::Exit),
    );
    runner.run("t1", vec![]).await.unwrap();

    // The pause made the buffered chain durable, interrupt included.
    let latest = store.get_blocking("t1", None).unwrap().unwrap();
    assert_eq!(latest.checkpoint.round, 0);
    assert!(latest
        .pending_writes
        .iter()
        .any(|w| w.channel == "__interrupt__"));

    let outcome = runner
        .resume("t1", Resume::Value(json!("go")))
        .await
        .unwrap();
    assert_eq!(outcome.values().unwrap()["verdict"], json!("go"));
}

fn conflicting() -> CompiledGraph {
    GraphBuilder::new()
        .add_channel("winner", ChannelKind::LastValue)
        .add_node(
            "left",
            SetValue {
                channel: "winner",
                value: json!("l"),
            },
        )
        .add_node(
            "right",
            SetValue {
                channel: "winner",
                value: json!("r"),
            },
        )
        .set_entry("left")
        .add_edge("Start", "right")
        .add_edge("left", "End")
        .add_edge("right", "End")
        .compile()
        .unwrap()
}

#[tokio::test]
async fn exit_mode_flushes_when_the_barrier_rejects_a_round() {
    let (runner, store) = make_runner_with(
        conflicting(),
        RuntimeConfig::default().with_durability(Durability::Exit),
    );
    let err = runner.run("t1", vec![]).await.unwrap_err();
    assert!(matches!(err, RunnerError::Scheduler(_)));

    // The committed rounds survive the failed one.
    let history = store.list_blocking("t1", None, None, None).unwrap();
    let rounds: Vec<i64> = history.iter().map(|t| t.checkpoint.round).collect();
    assert_eq!(rounds, vec![0, -1]);
}

/// Runs a two-round pipeline whose second node dies mid-round, and returns
/// how many checkpoints were durable at the moment of death plus how many
/// remained recoverable afterwards.
async fn crash_census(durability: Durability) -> (usize, usize) {
    let store = Arc::new(InMemoryStore::new());
    let observed = Arc::new(AtomicUsize::new(0));
    let graph = GraphBuilder::new()
        .add_channel("log", ChannelKind::topic())
        .add_node("a", Append { text: "a" })
        .add_node(
            "watch",
            CrashingObserver {
                store: store.clone(),
                observed: observed.clone(),
            },
        )
        .set_entry("a")
        .add_edge("a", "watch")
        .add_edge("watch", "End")
        .compile()
        .unwrap();
    let runner = Runner::new(
        graph,
        store.clone(),
        RuntimeConfig::default().with_durability(durability),
    );
    runner.run("t1", vec![]).await.unwrap_err();

    let durable = store.list_blocking("t1", None, None, None).unwrap().len();
    (observed.load(Ordering::SeqCst), durable)
}

#[tokio::test]
async fn sync_mode_keeps_committed_rounds_inside_the_crash_window() {
    let (mid_run, after) = crash_census(Durability::Sync).await;
    // Input marker, round 0, and round 1 were already durable when the
    // second round died; round 1 is the recovery point.
    assert_eq!(mid_run, 3);
    assert_eq!(after, 3);
}

#[tokio::test]
async fn exit_mode_has_nothing_durable_inside_the_crash_window() {
    let (mid_run, after) = crash_census(Durability::Exit).await;
    assert_eq!(mid_run, 0);
    // The failure boundary flushed the buffered chain.
    assert_eq!(after, 3);
}

#[tokio::test]
async fn every_mode_converges_to_the_same_final_state() {
    for durability in [Durability::Exit, Durability::Async, Durability::Sync] {
        let (runner, _) = make_runner_with(
            pipeline(),
            RuntimeConfig::default().with_durability(durability),
        );
        let outcome = runner
            .run("t1", vec![("log".into(), json!(["start"]))])
            .await
            .unwrap();
        assert_eq!(
            outcome.values().unwrap()["log"],
            json!(["start", "a", "b"]),
            "durability mode {durability}"
        );
    }
}

//! Interrupt and resume: positional matching, sibling reuse, and ambiguity.

mod common;
use common::*;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use loomgraph::channels::ChannelKind;
use loomgraph::graphs::GraphBuilder;
use loomgraph::interrupt::Resume;
use loomgraph::runtimes::RunnerError;
use rustc_hash::FxHashMap;
use serde_json::json;

fn gate_graph() -> loomgraph::graphs::CompiledGraph {
    GraphBuilder::new()
        .add_channel("verdict", ChannelKind::LastValue)
        .add_node(
            "gate",
            Gate {
                prompt: "approve?",
                channel: "verdict",
            },
        )
        .set_entry("gate")
        .add_edge("gate", "End")
        .compile()
        .unwrap()
}

#[tokio::test]
async fn interrupt_pauses_and_resume_completes() {
    let (runner, store) = make_runner(gate_graph());

    let outcome = runner.run("t1", vec![]).await.unwrap();
    let pending = outcome.interrupts().expect("run should pause");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].value, json!({"question": "approve?"}));
    assert_eq!(pending[0].node, "Custom:gate");
    assert_eq!(pending[0].round, 1);
    assert_eq!(pending[0].ordinal, 0);

    // The pause is durable: the latest checkpoint carries the interrupt.
    let latest = store.get_blocking("t1", None).unwrap().unwrap();
    assert_eq!(latest.checkpoint.round, 0);
    assert!(latest
        .pending_writes
        .iter()
        .any(|w| w.channel == "__interrupt__"));

    let outcome = runner
        .resume("t1", Resume::Value(json!("yes")))
        .await
        .unwrap();
    assert_eq!(outcome.values().unwrap()["verdict"], json!("yes"));
}

#[tokio::test]
async fn resume_without_pending_interrupt_is_rejected() {
    let (runner, _) = make_runner(gate_graph());
    runner.run("t1", vec![]).await.unwrap();
    runner
        .resume("t1", Resume::Value(json!("yes")))
        .await
        .unwrap();

    let err = runner
        .resume("t1", Resume::Value(json!("again")))
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::NoPendingInterrupt { .. }));
}

#[tokio::test]
async fn sequential_interrupts_consume_values_positionally() {
    let graph = GraphBuilder::new()
        .add_channel("answers", ChannelKind::LastValue)
        .add_node("gate", DoubleGate)
        .set_entry("gate")
        .add_edge("gate", "End")
        .compile()
        .unwrap();
    let (runner, _) = make_runner(graph);

    let outcome = runner.run("t1", vec![]).await.unwrap();
    assert_eq!(outcome.interrupts().unwrap()[0].value, json!("first?"));

    // One answer re-executes the node up to the second interrupt.
    let outcome = runner.resume("t1", Resume::Value(json!("x"))).await.unwrap();
    let pending = outcome.interrupts().expect("second pause");
    assert_eq!(pending[0].value, json!("second?"));
    assert_eq!(pending[0].ordinal, 1);

    let outcome = runner.resume("t1", Resume::Value(json!("y"))).await.unwrap();
    assert_eq!(outcome.values().unwrap()["answers"], json!(["x", "y"]));
}

#[tokio::test]
async fn a_batch_of_values_answers_future_interrupts_in_order() {
    let graph = GraphBuilder::new()
        .add_channel("answers", ChannelKind::LastValue)
        .add_node("gate", DoubleGate)
        .set_entry("gate")
        .add_edge("gate", "End")
        .compile()
        .unwrap();
    let (runner, _) = make_runner(graph);

    runner.run("t1", vec![]).await.unwrap();
    let outcome = runner
        .resume("t1", Resume::Values(vec![json!("x"), json!("y")]))
        .await
        .unwrap();
    assert_eq!(outcome.values().unwrap()["answers"], json!(["x", "y"]));
}

#[tokio::test]
async fn completed_siblings_are_not_re_executed_on_resume() {
    let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let graph = GraphBuilder::new()
        .add_channel("verdict", ChannelKind::LastValue)
        .add_channel("log", ChannelKind::topic())
        .add_node(
            "gate",
            Gate {
                prompt: "approve?",
                channel: "verdict",
            },
        )
        .add_node(
            "side",
            SideEffect {
                name: "side",
                counter: counter.clone(),
            },
        )
        .set_entry("gate")
        .set_entry("side")
        .add_edge("gate", "End")
        .add_edge("side", "End")
        .compile()
        .unwrap();
    let (runner, _) = make_runner(graph);

    runner.run("t1", vec![]).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let outcome = runner
        .resume("t1", Resume::Value(json!("ok")))
        .await
        .unwrap();
    let values = outcome.values().unwrap();
    assert_eq!(values["verdict"], json!("ok"));
    // The sibling's write survived through pending writes, not a re-run.
    assert_eq!(values["log"], json!(["side"]));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn multiple_pending_interrupts_require_resume_by_id() {
    let graph = GraphBuilder::new()
        .add_channel("v1", ChannelKind::LastValue)
        .add_channel("v2", ChannelKind::LastValue)
        .add_node(
            "gate1",
            Gate {
                prompt: "one?",
                channel: "v1",
            },
        )
        .add_node(
            "gate2",
            Gate {
                prompt: "two?",
                channel: "v2",
            },
        )
        .set_entry("gate1")
        .set_entry("gate2")
        .add_edge("gate1", "End")
        .add_edge("gate2", "End")
        .compile()
        .unwrap();
    let (runner, _) = make_runner(graph);

    let outcome = runner.run("t1", vec![]).await.unwrap();
    let pending = outcome.interrupts().unwrap().to_vec();
    assert_eq!(pending.len(), 2);

    let err = runner
        .resume("t1", Resume::Value(json!("ambiguous")))
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::AmbiguousResume));

    let mut answers = FxHashMap::default();
    for interrupt in &pending {
        let answer = if interrupt.node == "Custom:gate1" {
            json!("a1")
        } else {
            json!("a2")
        };
        answers.insert(interrupt.id.clone(), answer);
    }
    let outcome = runner.resume("t1", Resume::ById(answers)).await.unwrap();
    let values = outcome.values().unwrap();
    assert_eq!(values["v1"], json!("a1"));
    assert_eq!(values["v2"], json!("a2"));
}

#[tokio::test]
async fn continue_run_re_raises_a_pending_interrupt() {
    let (runner, _) = make_runner(gate_graph());
    runner.run("t1", vec![]).await.unwrap();

    // No new values: the gate re-executes and pauses again.
    let outcome = runner.continue_run("t1").await.unwrap();
    let pending = outcome.interrupts().expect("still paused");
    assert_eq!(pending[0].value, json!({"question": "approve?"}));
}

//! Fixture nodes shared across the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use loomgraph::control::Route;
use loomgraph::node::{Node, NodeContext, NodeError, NodeOutput};
use loomgraph::state::StateSnapshot;
use serde_json::{json, Value};

/// Appends a fixed entry to the `log` topic channel.
pub struct Append {
    pub text: &'static str,
}

#[async_trait]
impl Node for Append {
    async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::update([("log", json!([self.text]))]))
    }
}

/// Writes a fixed value to a fixed channel.
pub struct SetValue {
    pub channel: &'static str,
    pub value: Value,
}

#[async_trait]
impl Node for SetValue {
    async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::update([(self.channel, self.value.clone())]))
    }
}

/// Pauses on a single interrupt, then writes the answer to `channel`.
pub struct Gate {
    pub prompt: &'static str,
    pub channel: &'static str,
}

#[async_trait]
impl Node for Gate {
    async fn run(&self, _: StateSnapshot, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let answer = ctx.interrupt(json!({ "question": self.prompt }))?;
        Ok(NodeOutput::update([(self.channel, answer)]))
    }
}

/// Pauses on two interrupts in sequence and records both answers.
pub struct DoubleGate;

#[async_trait]
impl Node for DoubleGate {
    async fn run(&self, _: StateSnapshot, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let first = ctx.interrupt(json!("first?"))?;
        let second = ctx.interrupt(json!("second?"))?;
        Ok(NodeOutput::update([("answers", json!([first, second]))]))
    }
}

/// Counts its executions and appends to the log; used to prove completed
/// siblings are not re-run after a resume.
pub struct SideEffect {
    pub name: &'static str,
    pub counter: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for SideEffect {
    async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(NodeOutput::update([("log", json!([self.name]))]))
    }
}

/// Always fails.
pub struct Failing;

#[async_trait]
impl Node for Failing {
    async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        Err(NodeError::Other("boom".to_string()))
    }
}

/// Routes to the node named by the `next` channel via an explicit goto.
pub struct Router;

#[async_trait]
impl Node for Router {
    async fn run(&self, snapshot: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        let target = snapshot
            .get("next")
            .and_then(Value::as_str)
            .ok_or(NodeError::MissingInput { what: "next" })?
            .to_string();
        Ok(NodeOutput::goto([target.as_str()]))
    }
}

/// Queues one fan-out packet per payload.
pub struct FanOut {
    pub target: &'static str,
    pub payloads: Vec<Value>,
}

#[async_trait]
impl Node for FanOut {
    async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        let routes: Vec<Route> = self
            .payloads
            .iter()
            .map(|payload| Route::send(self.target, payload.clone()))
            .collect();
        Ok(NodeOutput::goto(routes))
    }
}

/// Appends its fan-out payload to the log.
pub struct Worker;

#[async_trait]
impl Node for Worker {
    async fn run(&self, snapshot: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        let payload = snapshot
            .task_input
            .clone()
            .ok_or(NodeError::MissingInput { what: "task input" })?;
        Ok(NodeOutput::update([("log", json!([payload]))]))
    }
}

/// Records how many checkpoints the store holds at execution time, then
/// aborts the run. Stands in for a process dying at that exact point, so
/// tests can assert what each durability mode had already made durable.
pub struct CrashingObserver {
    pub store: Arc<loomgraph::checkpoint::InMemoryStore>,
    pub observed: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for CrashingObserver {
    async fn run(&self, _: StateSnapshot, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let durable = self
            .store
            .list_blocking(&ctx.thread_id, None, None, None)
            .map_err(|e| NodeError::Other(e.to_string()))?
            .len();
        self.observed.store(durable, Ordering::SeqCst);
        Err(NodeError::Other("power loss".to_string()))
    }
}

/// Does nothing at all.
pub struct Noop;

#[async_trait]
impl Node for Noop {
    async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::empty())
    }
}

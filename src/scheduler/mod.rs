//! Superstep scheduling: deciding which tasks are due and running them.
//!
//! A node is due when, for at least one channel it subscribes to, the
//! channel holds a value and its version is newer than the version the node
//! last observed, or when a dynamic fan-out packet names it. Tasks within a
//! round run logically in parallel and may not observe each other's writes;
//! the barrier ([`barrier::apply_barrier`]) is the only place channel state
//! changes.

pub mod barrier;

use futures_util::future::join_all;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

use crate::channels::{ChannelError, ChannelRegistry, TASKS_CHANNEL};
use crate::control::SendPacket;
use crate::event_bus::Event;
use crate::graphs::CompiledGraph;
use crate::interrupt::ResumeCursor;
use crate::node::{NodeContext, NodeError, NodeOutput};
use crate::state::StateSnapshot;
use crate::types::NodeKind;
use crate::utils::ids::task_id;

pub use barrier::{apply_barrier, BarrierOutcome};

/// Version bookkeeping carried between rounds inside a checkpoint.
#[derive(Clone, Debug, Default)]
pub struct VersionState {
    /// Channel name → version counter (monotonic per thread).
    pub versions: FxHashMap<String, u64>,
    /// Encoded node → channel → last version that node observed.
    pub versions_seen: FxHashMap<String, FxHashMap<String, u64>>,
}

impl VersionState {
    #[must_use]
    pub fn version(&self, channel: &str) -> u64 {
        self.versions.get(channel).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn seen(&self, node: &str, channel: &str) -> u64 {
        self.versions_seen
            .get(node)
            .and_then(|m| m.get(channel))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn max_version(&self) -> u64 {
        self.versions.values().copied().max().unwrap_or(0)
    }
}

/// One scheduled execution of a node for the current round.
#[derive(Clone, Debug)]
pub struct Task {
    /// Deterministic id, stable across re-executions of the same round.
    pub id: String,
    pub node: NodeKind,
    /// Disambiguates fan-out instances; empty for ordinary activations.
    pub path: String,
    /// Fan-out payload, if this task came from a [`SendPacket`].
    pub input: Option<Value>,
    /// Channels whose versions caused the activation.
    pub triggers: Vec<String>,
}

/// Outcome of one executed task, error and interrupt included.
#[derive(Debug)]
pub struct TaskResult {
    pub task: Task,
    pub output: Result<NodeOutput, NodeError>,
}

/// Errors raised while scheduling or at the barrier.
#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Channel(#[from] ChannelError),

    /// A routing directive named a node the graph does not declare.
    #[error("route from `{from}` targets unknown node `{target}`")]
    #[diagnostic(
        code(loomgraph::scheduler::unknown_route_target),
        help("Conditional predicates and goto directives may only name declared nodes or End.")
    )]
    UnknownRouteTarget { from: String, target: String },

    /// A fan-out packet could not be decoded from the task queue.
    #[error("malformed fan-out packet in `{TASKS_CHANNEL}`: {0}")]
    #[diagnostic(code(loomgraph::scheduler::malformed_packet))]
    MalformedPacket(String),

    /// A fan-out packet could not be queued for the next round.
    #[error("fan-out packet for `{node}` failed to serialize")]
    #[diagnostic(code(loomgraph::scheduler::packet_encode))]
    PacketEncode {
        node: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Compute the active task set for `round`.
///
/// Deterministically ordered (node, then path) so logs and pending-write
/// attribution are reproducible; execution order remains unspecified.
pub fn prepare_tasks(
    graph: &CompiledGraph,
    registry: &ChannelRegistry,
    state: &VersionState,
    round: i64,
) -> Result<Vec<Task>, SchedulerError> {
    let mut tasks = Vec::new();

    for kind in graph.node_kinds() {
        let encoded = kind.encode();
        let triggers: Vec<String> = graph
            .subscriptions(&kind)
            .into_iter()
            .filter(|ch| registry.is_available(ch) && state.version(ch) > state.seen(&encoded, ch))
            .collect();
        if !triggers.is_empty() {
            tasks.push(Task {
                id: task_id(round, &encoded, ""),
                node: kind,
                path: String::new(),
                input: None,
                triggers,
            });
        }
    }

    if registry.is_available(TASKS_CHANNEL) {
        let queued = registry.value(TASKS_CHANNEL)?;
        let packets: Vec<SendPacket> = serde_json::from_value(queued)
            .map_err(|e| SchedulerError::MalformedPacket(e.to_string()))?;
        for (idx, packet) in packets.into_iter().enumerate() {
            let node = NodeKind::Custom(packet.node.clone());
            let path = format!("send:{idx}");
            tasks.push(Task {
                id: task_id(round, &node.encode(), &path),
                node,
                path,
                input: Some(packet.input),
                triggers: vec![TASKS_CHANNEL.to_string()],
            });
        }
    }

    tasks.sort_by(|a, b| (a.node.encode(), &a.path).cmp(&(b.node.encode(), &b.path)));
    debug!(round, count = tasks.len(), "prepared active task set");
    Ok(tasks)
}

/// Run every task of the round concurrently and collect the results.
///
/// `resume_values` maps task id → positional resume values accumulated for
/// that task (empty for tasks that never interrupted).
pub async fn run_tasks(
    graph: &CompiledGraph,
    registry: &ChannelRegistry,
    tasks: Vec<Task>,
    thread_id: &str,
    round: i64,
    event_sender: flume::Sender<Event>,
    resume_values: &FxHashMap<String, Vec<Value>>,
) -> Result<Vec<TaskResult>, SchedulerError> {
    let mut handles = Vec::with_capacity(tasks.len());

    for task in tasks {
        let node = graph
            .node(&task.node)
            .ok_or_else(|| SchedulerError::UnknownRouteTarget {
                from: TASKS_CHANNEL.to_string(),
                target: task.node.to_string(),
            })?;

        let declared: Vec<String> = graph
            .subscriptions(&task.node)
            .into_iter()
            .filter(|ch| !crate::channels::is_reserved(ch))
            .collect();
        let snapshot = StateSnapshot {
            channels: registry.read_many(declared),
            task_input: task.input.clone(),
            round,
        };
        let ctx = NodeContext {
            thread_id: thread_id.to_string(),
            node: task.node.clone(),
            round,
            path: task.path.clone(),
            event_sender: event_sender.clone(),
            resume: ResumeCursor::new(resume_values.get(&task.id).cloned().unwrap_or_default()),
        };

        let span = info_span!("task", node = %task.node, path = %task.path, round);
        let handle = tokio::spawn(async move { node.run(snapshot, ctx).await }.instrument(span));
        handles.push((task, handle));
    }

    let joined = join_all(handles.into_iter().map(|(task, handle)| async move {
        let output = match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(NodeError::Other(format!("task panicked: {join_err}"))),
        };
        TaskResult { task, output }
    }))
    .await;

    Ok(joined)
}

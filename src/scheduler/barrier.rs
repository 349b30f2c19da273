//! The round barrier: the single place channel state changes.
//!
//! Applies one round's writes, advances version counters, records what each
//! node has now seen, and folds routing (static edges, conditional edges,
//! goto directives, fan-out packets) into trigger writes for the next round.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, info_span};

use crate::channels::{self, ChannelError, ChannelRegistry, TASKS_CHANNEL};
use crate::control::Route;
use crate::graphs::CompiledGraph;
use crate::node::NodeOutput;
use crate::scheduler::{SchedulerError, Task, VersionState};
use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// What the barrier changed, for logging and diagnostics.
#[derive(Clone, Debug, Default)]
pub struct BarrierOutcome {
    /// Channels whose version advanced this round (sorted).
    pub updated_channels: Vec<String>,
    /// Nodes activated for the next round (sorted).
    pub next_nodes: Vec<NodeKind>,
}

/// Apply the writes and routes of every completed task.
///
/// `completed` must hold only successful tasks, in the deterministic order
/// produced by [`prepare_tasks`](super::prepare_tasks). An
/// [`ChannelError::InvalidUpdate`] from any channel aborts the barrier; the
/// round must then not be persisted.
pub fn apply_barrier(
    graph: &CompiledGraph,
    registry: &mut ChannelRegistry,
    state: &mut VersionState,
    round: i64,
    completed: &[(Task, NodeOutput)],
) -> Result<BarrierOutcome, SchedulerError> {
    let span = info_span!("barrier", round, tasks = completed.len());
    let _guard = span.enter();

    // Record what each task observed: the trigger versions that scheduled it.
    for (task, _) in completed {
        let observed: Vec<(String, u64)> = task
            .triggers
            .iter()
            .map(|channel| (channel.clone(), state.version(channel)))
            .collect();
        state
            .versions_seen
            .entry(task.node.encode())
            .or_default()
            .extend(observed);
    }

    // Clear transient trigger state so a stale activation never re-fires.
    let mut touched: BTreeSet<String> = BTreeSet::new();
    let trigger_channels: BTreeSet<&String> = completed
        .iter()
        .flat_map(|(task, _)| task.triggers.iter())
        .collect();
    for channel in trigger_channels {
        if registry.consume(channel) {
            touched.insert(channel.clone());
        }
    }

    // Group user writes by channel, preserving task order within a group.
    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for (task, output) in completed {
        for (channel, value) in output.writes() {
            if channels::is_reserved(channel) {
                return Err(ChannelError::invalid_update(
                    channel,
                    format!("node `{}` wrote to an engine-managed channel", task.node),
                )
                .into());
            }
            grouped.entry(channel.clone()).or_default().push(value.clone());
        }
    }

    // Each channel's update is invoked exactly once with the full batch.
    for (channel, batch) in grouped {
        if registry.apply(&channel, batch)? {
            touched.insert(channel);
        }
    }

    // Routing: static edges and goto directives, then conditional edges over
    // the post-write snapshot.
    let mut targets: BTreeMap<String, NodeKind> = BTreeMap::new();
    let mut packets: Vec<Value> = Vec::new();
    let mut add_target = |from: &NodeKind, kind: NodeKind| -> Result<(), SchedulerError> {
        if kind.is_end() {
            return Ok(());
        }
        if graph.node(&kind).is_none() {
            return Err(SchedulerError::UnknownRouteTarget {
                from: from.to_string(),
                target: kind.to_string(),
            });
        }
        targets.insert(kind.encode(), kind);
        Ok(())
    };

    for (task, output) in completed {
        for next in graph.successors(&task.node) {
            add_target(&task.node, next.clone())?;
        }
        for route in output.routes() {
            match route {
                Route::Goto(kind) => add_target(&task.node, kind.clone())?,
                Route::Send(packet) => {
                    let kind = NodeKind::Custom(packet.node.clone());
                    if graph.node(&kind).is_none() {
                        return Err(SchedulerError::UnknownRouteTarget {
                            from: task.node.to_string(),
                            target: packet.node.clone(),
                        });
                    }
                    let value = serde_json::to_value(packet).map_err(|source| {
                        SchedulerError::PacketEncode {
                            node: packet.node.clone(),
                            source,
                        }
                    })?;
                    packets.push(value);
                }
            }
        }
    }

    let ran: BTreeSet<&NodeKind> = completed.iter().map(|(task, _)| &task.node).collect();
    if !graph.conditional_edges().is_empty() {
        let snapshot = StateSnapshot {
            channels: registry.checkpoint_values(),
            task_input: None,
            round,
        };
        for edge in graph.conditional_edges() {
            if !ran.contains(&edge.from) {
                continue;
            }
            for name in (edge.predicate)(&snapshot) {
                match edge.resolve(&name) {
                    Some(kind) => add_target(&edge.from, kind)?,
                    None => {
                        return Err(SchedulerError::UnknownRouteTarget {
                            from: edge.from.to_string(),
                            target: name,
                        });
                    }
                }
            }
        }
    }

    let mut next_nodes: Vec<NodeKind> = Vec::with_capacity(targets.len());
    for kind in targets.into_values() {
        let trigger = kind.trigger_channel();
        if registry.apply(&trigger, vec![Value::Bool(true)])? {
            touched.insert(trigger);
        }
        next_nodes.push(kind);
    }
    if !packets.is_empty() && registry.apply(TASKS_CHANNEL, packets)? {
        touched.insert(TASKS_CHANNEL.to_string());
    }

    // One version bump covers everything this barrier changed.
    let next_version = state.max_version() + 1;
    for channel in &touched {
        state.versions.insert(channel.clone(), next_version);
    }

    debug!(
        round,
        updated = touched.len(),
        next = next_nodes.len(),
        "barrier applied"
    );
    Ok(BarrierOutcome {
        updated_channels: touched.into_iter().collect(),
        next_nodes,
    })
}

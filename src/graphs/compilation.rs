//! Graph validation and the immutable compiled artifact.

use std::collections::VecDeque;
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::channels::{self, ChannelDef, ChannelKind};
use crate::graphs::builder::GraphBuilder;
use crate::graphs::edges::ConditionalEdge;
use crate::node::Node;
use crate::types::NodeKind;

/// Compile-time structural errors. All fatal; none can occur at run time.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("duplicate node name: {name}")]
    #[diagnostic(code(loomgraph::graphs::duplicate_node))]
    DuplicateNode { name: String },

    #[error("duplicate channel name: {name}")]
    #[diagnostic(code(loomgraph::graphs::duplicate_channel))]
    DuplicateChannel { name: String },

    #[error("channel name `{name}` is reserved for engine use")]
    #[diagnostic(
        code(loomgraph::graphs::reserved_channel),
        help("Names starting with `__` or `branch:to:` are managed by the engine.")
    )]
    ReservedChannel { name: String },

    #[error("cannot register a node as the virtual {kind} sentinel")]
    #[diagnostic(code(loomgraph::graphs::virtual_node))]
    VirtualNode { kind: NodeKind },

    #[error("edge references undeclared node `{node}`")]
    #[diagnostic(
        code(loomgraph::graphs::dangling_edge),
        help("Every edge endpoint must be a registered node, Start, or End.")
    )]
    DanglingEdge { node: String },

    #[error("conditional edge from `{from}` maps to undeclared node `{target}`")]
    #[diagnostic(code(loomgraph::graphs::dangling_conditional_target))]
    DanglingConditionalTarget { from: String, target: String },

    #[error("node `{node}` subscribes to undeclared channel `{channel}`")]
    #[diagnostic(code(loomgraph::graphs::unknown_channel))]
    UnknownChannel { node: String, channel: String },

    #[error("graph has no entry: nothing leaves the Start sentinel")]
    #[diagnostic(
        code(loomgraph::graphs::no_entry),
        help("Add `set_entry(node)` or an edge from Start.")
    )]
    NoEntry,

    #[error("node `{name}` is not connected to the graph")]
    #[diagnostic(
        code(loomgraph::graphs::orphan_node),
        help("Connect the node with an edge, a conditional edge, or a channel subscription.")
    )]
    OrphanNode { name: String },
}

/// Immutable, validated graph consumed by the scheduler.
#[derive(Clone)]
pub struct CompiledGraph {
    nodes: FxHashMap<NodeKind, Arc<dyn Node>>,
    user_channels: Vec<ChannelDef>,
    full_schema: Vec<ChannelDef>,
    adjacency: FxHashMap<NodeKind, Vec<NodeKind>>,
    conditional: Vec<ConditionalEdge>,
    subscriptions: FxHashMap<NodeKind, Vec<String>>,
}

impl CompiledGraph {
    pub(crate) fn from_builder(builder: GraphBuilder) -> Result<Self, GraphError> {
        let GraphBuilder {
            nodes,
            channels,
            edges,
            conditional,
            subscriptions,
        } = builder;

        let mut node_map: FxHashMap<NodeKind, Arc<dyn Node>> = FxHashMap::default();
        for (kind, node) in nodes {
            if !kind.is_custom() {
                return Err(GraphError::VirtualNode { kind });
            }
            if node_map.insert(kind.clone(), node).is_some() {
                return Err(GraphError::DuplicateNode {
                    name: kind.to_string(),
                });
            }
        }

        let mut channel_names: FxHashSet<&str> = FxHashSet::default();
        for def in &channels {
            if channels::is_reserved(&def.name) {
                return Err(GraphError::ReservedChannel {
                    name: def.name.clone(),
                });
            }
            if !channel_names.insert(def.name.as_str()) {
                return Err(GraphError::DuplicateChannel {
                    name: def.name.clone(),
                });
            }
        }

        let declared = |kind: &NodeKind| kind.is_custom() && node_map.contains_key(kind);

        let mut adjacency: FxHashMap<NodeKind, Vec<NodeKind>> = FxHashMap::default();
        for (from, to) in edges {
            if !from.is_start() && !declared(&from) {
                return Err(GraphError::DanglingEdge {
                    node: from.to_string(),
                });
            }
            if !to.is_end() && !declared(&to) {
                return Err(GraphError::DanglingEdge {
                    node: to.to_string(),
                });
            }
            adjacency.entry(from).or_default().push(to);
        }

        for edge in &conditional {
            if !edge.from.is_start() && !declared(&edge.from) {
                return Err(GraphError::DanglingEdge {
                    node: edge.from.to_string(),
                });
            }
            if let Some(targets) = &edge.targets {
                for target in targets.values() {
                    if !target.is_end() && !declared(target) {
                        return Err(GraphError::DanglingConditionalTarget {
                            from: edge.from.to_string(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }

        let mut subs: FxHashMap<NodeKind, Vec<String>> = FxHashMap::default();
        for (node, channel) in subscriptions {
            if !declared(&node) {
                return Err(GraphError::DanglingEdge {
                    node: node.to_string(),
                });
            }
            if !channel_names.contains(channel.as_str()) {
                return Err(GraphError::UnknownChannel {
                    node: node.to_string(),
                    channel,
                });
            }
            subs.entry(node).or_default().push(channel);
        }

        let has_static_entry = adjacency.contains_key(&NodeKind::Start);
        let has_conditional_entry = conditional.iter().any(|e| e.from.is_start());
        if !node_map.is_empty() && !has_static_entry && !has_conditional_entry {
            return Err(GraphError::NoEntry);
        }

        Self::check_reachability(&node_map, &adjacency, &conditional, &subs)?;

        let full_schema = Self::build_full_schema(&channels, &node_map);

        Ok(Self {
            nodes: node_map,
            user_channels: channels,
            full_schema,
            adjacency,
            conditional,
            subscriptions: subs,
        })
    }

    /// BFS from Start over static edges and conditional targets. A
    /// conditional edge without a target map may route anywhere, so it makes
    /// every node reachable. Nodes subscribed to a channel are activated by
    /// data rather than edges, and nodes that carry an outgoing edge may be
    /// targeted by runtime goto or fan-out directives; both count as rooted.
    /// Only a fully disconnected node is an orphan.
    fn check_reachability(
        nodes: &FxHashMap<NodeKind, Arc<dyn Node>>,
        adjacency: &FxHashMap<NodeKind, Vec<NodeKind>>,
        conditional: &[ConditionalEdge],
        subscriptions: &FxHashMap<NodeKind, Vec<String>>,
    ) -> Result<(), GraphError> {
        if conditional.iter().any(|e| e.targets.is_none()) {
            return Ok(());
        }

        let mut reachable: FxHashSet<NodeKind> = FxHashSet::default();
        let mut queue: VecDeque<NodeKind> = VecDeque::new();
        queue.push_back(NodeKind::Start);

        for (node, _) in subscriptions.iter() {
            if reachable.insert(node.clone()) {
                queue.push_back(node.clone());
            }
        }

        while let Some(current) = queue.pop_front() {
            let mut visit = |next: &NodeKind| {
                if next.is_custom() && reachable.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            };
            if let Some(targets) = adjacency.get(&current) {
                targets.iter().for_each(&mut visit);
            }
            for edge in conditional.iter().filter(|e| e.from == current) {
                if let Some(map) = &edge.targets {
                    map.values().for_each(&mut visit);
                }
            }
        }

        for kind in nodes.keys() {
            let wired = reachable.contains(kind)
                || adjacency.contains_key(kind)
                || conditional.iter().any(|e| &e.from == kind);
            if !wired {
                return Err(GraphError::OrphanNode {
                    name: kind.to_string(),
                });
            }
        }
        Ok(())
    }

    /// User channels plus the engine-managed set: one ephemeral trigger
    /// channel per node and the non-accumulating fan-out queue.
    fn build_full_schema(
        user: &[ChannelDef],
        nodes: &FxHashMap<NodeKind, Arc<dyn Node>>,
    ) -> Vec<ChannelDef> {
        let mut schema: Vec<ChannelDef> = user.to_vec();
        let mut triggers: Vec<String> = nodes.keys().map(NodeKind::trigger_channel).collect();
        triggers.sort();
        for name in triggers {
            schema.push(ChannelDef::new(name, ChannelKind::Ephemeral));
        }
        schema.push(ChannelDef::new(
            channels::TASKS_CHANNEL,
            ChannelKind::Topic { accumulate: false },
        ));
        schema
    }

    #[must_use]
    pub fn node(&self, kind: &NodeKind) -> Option<Arc<dyn Node>> {
        self.nodes.get(kind).cloned()
    }

    /// Registered nodes in deterministic (sorted) order.
    #[must_use]
    pub fn node_kinds(&self) -> Vec<NodeKind> {
        let mut kinds: Vec<NodeKind> = self.nodes.keys().cloned().collect();
        kinds.sort_by_key(NodeKind::encode);
        kinds
    }

    /// Channels declared by the user schema.
    #[must_use]
    pub fn user_channels(&self) -> &[ChannelDef] {
        &self.user_channels
    }

    /// Complete schema including engine-managed channels.
    #[must_use]
    pub fn full_schema(&self) -> &[ChannelDef] {
        &self.full_schema
    }

    /// Static successors of a node (empty slice when none).
    #[must_use]
    pub fn successors(&self, kind: &NodeKind) -> &[NodeKind] {
        self.adjacency.get(kind).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn conditional_edges(&self) -> &[ConditionalEdge] {
        &self.conditional
    }

    /// Channels whose version changes activate this node: its trigger
    /// channel plus declared subscriptions.
    #[must_use]
    pub fn subscriptions(&self, kind: &NodeKind) -> Vec<String> {
        let mut channels = vec![kind.trigger_channel()];
        if let Some(declared) = self.subscriptions.get(kind) {
            channels.extend(declared.iter().cloned());
        }
        channels
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.node_kinds())
            .field("user_channels", &self.user_channels)
            .field("static_edges", &self.adjacency)
            .field("conditional_edges", &self.conditional.len())
            .finish()
    }
}

//! Fluent assembly of nodes, channels, and edges into a compiled graph.

use std::sync::Arc;

use crate::channels::{ChannelDef, ChannelKind};
use crate::graphs::compilation::{CompiledGraph, GraphError};
use crate::graphs::edges::ConditionalEdge;
use crate::node::Node;
use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// Builder for an execution graph.
///
/// Order of calls does not matter; everything is checked together at
/// [`compile`](Self::compile).
///
/// # Examples
///
/// ```rust,no_run
/// use loomgraph::channels::ChannelKind;
/// use loomgraph::graphs::GraphBuilder;
/// # use loomgraph::node::{Node, NodeContext, NodeError, NodeOutput};
/// # use loomgraph::state::StateSnapshot;
/// # use async_trait::async_trait;
/// # struct A; struct B;
/// # #[async_trait] impl Node for A {
/// #   async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> { Ok(NodeOutput::empty()) }
/// # }
/// # #[async_trait] impl Node for B {
/// #   async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> { Ok(NodeOutput::empty()) }
/// # }
///
/// let graph = GraphBuilder::new()
///     .add_channel("foo", ChannelKind::LastValue)
///     .add_channel("bar", ChannelKind::topic())
///     .add_node("a", A)
///     .add_node("b", B)
///     .set_entry("a")
///     .add_edge("a", "b")
///     .add_edge("b", "End")
///     .compile()
///     .expect("valid graph");
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    pub(crate) nodes: Vec<(NodeKind, Arc<dyn Node>)>,
    pub(crate) channels: Vec<ChannelDef>,
    pub(crate) edges: Vec<(NodeKind, NodeKind)>,
    pub(crate) conditional: Vec<ConditionalEdge>,
    pub(crate) subscriptions: Vec<(NodeKind, String)>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a state channel.
    #[must_use]
    pub fn add_channel(mut self, name: impl Into<String>, kind: ChannelKind) -> Self {
        self.channels.push(ChannelDef::new(name, kind));
        self
    }

    /// Register a node under a unique name.
    #[must_use]
    pub fn add_node(mut self, name: impl Into<NodeKind>, node: impl Node + 'static) -> Self {
        self.nodes.push((name.into(), Arc::new(node)));
        self
    }

    /// Static edge: after `from` runs, `to` is activated next round.
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<NodeKind>, to: impl Into<NodeKind>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Conditional edge with identity target mapping.
    #[must_use]
    pub fn add_conditional_edge(
        self,
        from: impl Into<NodeKind>,
        predicate: impl Fn(&StateSnapshot) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        self.add_conditional(ConditionalEdge::new(from, predicate))
    }

    /// Conditional edge, fully specified (predicate plus target map).
    #[must_use]
    pub fn add_conditional(mut self, edge: ConditionalEdge) -> Self {
        self.conditional.push(edge);
        self
    }

    /// Subscribe `node` to a channel: any new version of it activates the
    /// node, independent of edges.
    #[must_use]
    pub fn subscribe(mut self, node: impl Into<NodeKind>, channel: impl Into<String>) -> Self {
        self.subscriptions.push((node.into(), channel.into()));
        self
    }

    /// Sugar for `add_edge(Start, node)`.
    #[must_use]
    pub fn set_entry(self, node: impl Into<NodeKind>) -> Self {
        self.add_edge(NodeKind::Start, node)
    }

    /// Validate and freeze into a [`CompiledGraph`].
    pub fn compile(self) -> Result<CompiledGraph, GraphError> {
        CompiledGraph::from_builder(self)
    }
}

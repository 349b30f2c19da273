//! Node execution contract: the [`Node`] trait, its execution context, and
//! the tagged output nodes return.
//!
//! A node is a named computation registered in the graph. Each scheduled run
//! receives an immutable [`StateSnapshot`] of its subscribed channels plus a
//! [`NodeContext`] and returns a [`NodeOutput`]: channel writes, routing
//! directives, or both. Nodes never mutate shared state directly; the
//! barrier applies their writes after the whole round finishes.

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::control::Route;
use crate::event_bus::Event;
use crate::interrupt::{interrupt_id, Interrupt, ResumeCursor};
use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// A unit of computation scheduled by the superstep loop.
///
/// Implementations should be deterministic given the snapshot and any resume
/// values: an interrupted node is re-executed from its start on resume, so
/// side effects before an [`NodeContext::interrupt`] call must be idempotent
/// or hoisted into separately checkpointed steps.
///
/// # Examples
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use loomgraph::node::{Node, NodeContext, NodeError, NodeOutput};
/// use loomgraph::state::StateSnapshot;
/// use serde_json::json;
///
/// struct Reviewer;
///
/// #[async_trait]
/// impl Node for Reviewer {
///     async fn run(
///         &self,
///         snapshot: StateSnapshot,
///         ctx: NodeContext,
///     ) -> Result<NodeOutput, NodeError> {
///         ctx.emit("review", "asking a human")?;
///         let verdict = ctx.interrupt(json!({"draft": snapshot.get_or_null("draft")}))?;
///         Ok(NodeOutput::update([("verdict", verdict)]))
///     }
/// }
/// ```
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, snapshot: StateSnapshot, ctx: NodeContext)
        -> Result<NodeOutput, NodeError>;
}

/// Execution context injected per task invocation.
///
/// Read-only from the node's perspective; carries identity for observability
/// and the positional resume cursor behind [`interrupt`](Self::interrupt).
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// Thread this task belongs to.
    pub thread_id: String,
    /// Identity of the executing node.
    pub node: NodeKind,
    /// Round being executed.
    pub round: i64,
    /// Task path id; distinguishes fan-out instances of the same node.
    pub path: String,
    /// Sender into the run's event bus.
    pub event_sender: flume::Sender<Event>,
    pub(crate) resume: ResumeCursor,
}

impl NodeContext {
    /// Emit a node-scoped event enriched with this context's metadata.
    pub fn emit(
        &self,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), NodeContextError> {
        self.event_sender
            .send(Event::node_message_with_meta(
                self.node.to_string(),
                self.round,
                scope,
                message,
            ))
            .map_err(|_| NodeContextError::EventBusUnavailable)
    }

    /// Request external input, suspending the round if none is available yet.
    ///
    /// The nth call during this invocation consumes the nth resume value
    /// supplied for this task. When the cursor is exhausted the call returns
    /// [`NodeError::Suspended`], which node code should propagate with `?`;
    /// the scheduler persists the payload and pauses the thread.
    pub fn interrupt(&self, payload: impl Into<Value>) -> Result<Value, NodeError> {
        match self.resume.take() {
            Ok(value) => Ok(value),
            Err(ordinal) => {
                let node = self.node.encode();
                Err(NodeError::Suspended(Box::new(Interrupt {
                    id: interrupt_id(&self.thread_id, self.round, &node, &self.path, ordinal),
                    node,
                    round: self.round,
                    path: self.path.clone(),
                    ordinal,
                    value: payload.into(),
                })))
            }
        }
    }
}

/// Tagged result of one node invocation.
#[derive(Clone, Debug)]
pub enum NodeOutput {
    /// State writes only; the next frontier comes from edges alone.
    Update(Vec<(String, Value)>),
    /// Routing only; no channel writes.
    Goto(Vec<Route>),
    /// Both state writes and explicit routing.
    UpdateAndGoto {
        writes: Vec<(String, Value)>,
        routes: Vec<Route>,
    },
}

impl NodeOutput {
    /// No writes, no routes; edges alone decide what runs next.
    #[must_use]
    pub fn empty() -> Self {
        NodeOutput::Update(Vec::new())
    }

    pub fn update<C: Into<String>>(writes: impl IntoIterator<Item = (C, Value)>) -> Self {
        NodeOutput::Update(writes.into_iter().map(|(c, v)| (c.into(), v)).collect())
    }

    pub fn goto<R: Into<Route>>(routes: impl IntoIterator<Item = R>) -> Self {
        NodeOutput::Goto(routes.into_iter().map(Into::into).collect())
    }

    pub fn update_and_goto<C: Into<String>, R: Into<Route>>(
        writes: impl IntoIterator<Item = (C, Value)>,
        routes: impl IntoIterator<Item = R>,
    ) -> Self {
        NodeOutput::UpdateAndGoto {
            writes: writes.into_iter().map(|(c, v)| (c.into(), v)).collect(),
            routes: routes.into_iter().map(Into::into).collect(),
        }
    }

    /// Channel writes carried by this output.
    #[must_use]
    pub fn writes(&self) -> &[(String, Value)] {
        match self {
            NodeOutput::Update(writes) | NodeOutput::UpdateAndGoto { writes, .. } => writes,
            NodeOutput::Goto(_) => &[],
        }
    }

    /// Routing directives carried by this output.
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        match self {
            NodeOutput::Goto(routes) | NodeOutput::UpdateAndGoto { routes, .. } => routes,
            NodeOutput::Update(_) => &[],
        }
    }
}

/// Errors from [`NodeContext`] plumbing.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeContextError {
    #[error("failed to emit event: event bus unavailable")]
    #[diagnostic(
        code(loomgraph::node::event_bus_unavailable),
        help("The event bus listener may have shut down already.")
    )]
    EventBusUnavailable,
}

/// Fatal errors from node execution.
///
/// A task returning an error aborts only that round; sibling tasks' writes
/// survive as pending writes. `Suspended` is not a failure: it is how an
/// interrupt propagates out of the node body to the scheduler.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Expected input data is missing from the snapshot.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(loomgraph::node::missing_input),
        help("Check that an upstream node writes the required channel.")
    )]
    MissingInput { what: &'static str },

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(code(loomgraph::node::validation))]
    ValidationFailed(String),

    /// JSON serialization error inside the node body.
    #[error(transparent)]
    #[diagnostic(code(loomgraph::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Event bus communication error.
    #[error("event bus error: {0}")]
    #[diagnostic(code(loomgraph::node::event_bus))]
    EventBus(#[from] NodeContextError),

    /// The task paused on an interrupt with no resume value available.
    #[error("task suspended awaiting external input (ordinal {})", .0.ordinal)]
    #[diagnostic(
        code(loomgraph::node::suspended),
        help("Re-invoke the thread with a resume value to continue.")
    )]
    Suspended(Box<Interrupt>),

    /// Application-defined failure.
    #[error("{0}")]
    #[diagnostic(code(loomgraph::node::other))]
    Other(String),
}

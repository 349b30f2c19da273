//! Routing directives emitted by nodes to influence the next frontier.
//!
//! Routes are kept separate from state writes so a node can express "run
//! these next" without mutating application channels. The barrier folds
//! routes, static edges, and conditional edges into deduplicated trigger
//! writes for the following round.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::NodeKind;

/// One dynamic fan-out request: run `node` once with `input` as its task
/// payload. Several packets naming the same node in one round produce that
/// many parallel task instances, each with its own payload and path id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SendPacket {
    pub node: String,
    pub input: Value,
}

impl SendPacket {
    pub fn new(node: impl Into<String>, input: Value) -> Self {
        Self {
            node: node.into(),
            input,
        }
    }
}

/// A single routing directive in a node's output.
#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    /// Activate the named node next round (or terminate the branch via `End`).
    Goto(NodeKind),
    /// Queue a dynamic fan-out packet.
    Send(SendPacket),
}

impl Route {
    pub fn goto(node: impl Into<NodeKind>) -> Self {
        Route::Goto(node.into())
    }

    pub fn send(node: impl Into<String>, input: Value) -> Self {
        Route::Send(SendPacket::new(node, input))
    }
}

impl From<NodeKind> for Route {
    fn from(kind: NodeKind) -> Self {
        Route::Goto(kind)
    }
}

impl From<&str> for Route {
    fn from(s: &str) -> Self {
        Route::Goto(NodeKind::from(s))
    }
}

impl From<SendPacket> for Route {
    fn from(packet: SendPacket) -> Self {
        Route::Send(packet)
    }
}

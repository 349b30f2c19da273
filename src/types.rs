//! Core identifiers for the loomgraph execution engine.
//!
//! This module defines [`NodeKind`], the identity type for nodes in an
//! execution graph, including the virtual `Start` and `End` sentinels that
//! anchor entry and termination. Channel identities are plain strings scoped
//! to one graph; the reserved names the engine manages internally live in
//! [`crate::channels`].
//!
//! # Examples
//!
//! ```rust
//! use loomgraph::types::NodeKind;
//!
//! let start = NodeKind::Start;
//! let custom = NodeKind::Custom("plan".to_string());
//!
//! assert_eq!(custom.encode(), "Custom:plan");
//! assert_eq!(NodeKind::decode("Custom:plan"), custom);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a node within an execution graph.
///
/// `Start` and `End` are virtual: they carry no computation and may not be
/// registered as runnable nodes. Every graph's first edge leaves `Start`;
/// routing to `End` terminates that branch of execution.
///
/// The string codec ([`encode`](Self::encode)/[`decode`](Self::decode)) is the
/// persisted form used in checkpoints and version maps.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Virtual entry sentinel; the initial activation frontier hangs off it.
    Start,
    /// Virtual terminal sentinel; a valid routing target, never executed.
    End,
    /// User-registered node, identified by a name unique within its graph.
    Custom(String),
}

impl NodeKind {
    /// Encode into the persisted string form.
    ///
    /// - `Start` → `"Start"`
    /// - `End` → `"End"`
    /// - `Custom("plan")` → `"Custom:plan"`
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            NodeKind::Start => "Start".to_string(),
            NodeKind::End => "End".to_string(),
            NodeKind::Custom(s) => format!("Custom:{s}"),
        }
    }

    /// Decode a persisted string form.
    ///
    /// Unrecognized input falls back to `Custom` so version maps written by
    /// newer graphs still load.
    pub fn decode(s: &str) -> Self {
        if s == "Start" {
            NodeKind::Start
        } else if s == "End" {
            NodeKind::End
        } else if let Some(rest) = s.strip_prefix("Custom:") {
            NodeKind::Custom(rest.to_string())
        } else {
            NodeKind::Custom(s.to_string())
        }
    }

    /// Name of the ephemeral trigger channel that activates this node.
    ///
    /// Static edges, conditional routes, and explicit `goto` directives all
    /// fire a node by writing to its trigger channel; activation then falls
    /// out of ordinary channel versioning.
    #[must_use]
    pub fn trigger_channel(&self) -> String {
        format!("branch:to:{}", self.encode())
    }

    /// Returns `true` if this is the [`Start`](Self::Start) sentinel.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    /// Returns `true` if this is the [`End`](Self::End) sentinel.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Returns `true` if this is a user-registered node.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

// Developer experience: allow string literals where a NodeKind is expected.
impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        match s {
            "Start" => NodeKind::Start,
            "End" => NodeKind::End,
            other => NodeKind::Custom(other.to_string()),
        }
    }
}

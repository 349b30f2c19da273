//! Error types for channel reads and barrier updates.

use miette::Diagnostic;
use thiserror::Error;

/// Errors surfaced by [`Channel`](super::Channel) operations.
///
/// `Empty` is the ordinary "never written" condition and is part of normal
/// control flow (callers probe with `is_available` to avoid it). An
/// `InvalidUpdate` means a round delivered a batch the channel's cardinality
/// rule forbids; the barrier treats it as fatal for that round and the round
/// is not persisted.
#[derive(Debug, Error, Diagnostic)]
pub enum ChannelError {
    /// The channel has never been written (or was consumed and not rewritten).
    #[error("channel `{name}` is empty")]
    #[diagnostic(
        code(loomgraph::channels::empty),
        help("Probe with `is_available()` before reading, or ensure an upstream node writes this channel first.")
    )]
    Empty { name: String },

    /// The batch of same-round updates violates the channel's cardinality rule.
    #[error("invalid update for channel `{name}`: {reason}")]
    #[diagnostic(
        code(loomgraph::channels::invalid_update),
        help("Channels with overwrite semantics accept at most one update per round; use a Topic or aggregate channel for fan-in.")
    )]
    InvalidUpdate { name: String, reason: String },

    /// A checkpointed value could not be restored into this channel variant.
    #[error("corrupt snapshot for channel `{name}`: {reason}")]
    #[diagnostic(code(loomgraph::channels::corrupt_snapshot))]
    CorruptSnapshot { name: String, reason: String },
}

impl ChannelError {
    pub fn empty(name: impl Into<String>) -> Self {
        ChannelError::Empty { name: name.into() }
    }

    pub fn invalid_update(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ChannelError::InvalidUpdate {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

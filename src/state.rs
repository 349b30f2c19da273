//! Immutable state views handed to tasks and routing predicates.

use rustc_hash::FxHashMap;
use serde_json::Value;

/// Read-only view of channel state taken at the start of a round.
///
/// A task receives the values of the channels its node subscribes to (plus
/// any dynamic fan-out payload addressed to it) and must not assume it can
/// observe sibling writes: the snapshot is fixed until the barrier.
/// Conditional-edge predicates receive a snapshot of the full channel set
/// taken after the barrier applied the round's writes.
#[derive(Clone, Debug, Default)]
pub struct StateSnapshot {
    /// Channel name → materialized value. Empty channels are absent.
    pub channels: FxHashMap<String, Value>,
    /// Payload carried by a dynamic fan-out packet, if this task came from one.
    pub task_input: Option<Value>,
    /// Round the snapshot was taken for.
    pub round: i64,
}

impl StateSnapshot {
    /// Value of a channel, or `None` when it is empty or not visible here.
    #[must_use]
    pub fn get(&self, channel: &str) -> Option<&Value> {
        self.channels.get(channel)
    }

    /// Convenience accessor that treats a missing channel as JSON `null`.
    #[must_use]
    pub fn get_or_null(&self, channel: &str) -> Value {
        self.channels.get(channel).cloned().unwrap_or(Value::Null)
    }

    /// Test helper style constructor from name/value pairs.
    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            channels: pairs.into_iter().collect(),
            task_input: None,
            round: 0,
        }
    }
}

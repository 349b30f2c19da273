//! Typed state channels with pluggable merge (reducer) semantics.
//!
//! A channel is a named slot holding accumulated state. Tasks never touch
//! channels directly; they return `(channel, update)` pairs and the barrier
//! applies the full per-round batch through [`Channel::update`], exactly once
//! per channel per round. How a batch folds into the next value is the
//! channel variant's reducer policy: [`LastValue`] overwrites and accepts at
//! most one update per round, [`EphemeralValue`] overwrites and clears after
//! the following round reads it, [`Topic`] keeps an ordered multiset that is
//! optionally cleared each round, [`BinaryOperatorAggregate`] folds the batch
//! through a binary operator, and [`UniqueValue`] overwrites while asserting
//! all same-round updates are equal.
//!
//! Values are [`serde_json::Value`]; that is also the serialization contract
//! for checkpoints. Reading a never-written channel is an
//! [`ChannelError::Empty`] condition, never a silent default.

pub mod aggregate;
pub mod ephemeral;
pub mod errors;
pub mod last_value;
pub mod registry;
pub mod topic;
pub mod unique;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

pub use aggregate::BinaryOperatorAggregate;
pub use ephemeral::EphemeralValue;
pub use errors::ChannelError;
pub use last_value::LastValue;
pub use registry::ChannelRegistry;
pub use topic::Topic;
pub use unique::UniqueValue;

/// Queue of dynamic fan-out packets, drained by the scheduler each round.
pub const TASKS_CHANNEL: &str = "__tasks__";
/// Pending-write channel carrying persisted interrupt payloads.
pub const INTERRUPT_CHANNEL: &str = "__interrupt__";
/// Pending-write channel carrying accumulated resume values for a task.
pub const RESUME_CHANNEL: &str = "__resume__";
/// Pending-write marker recorded for a completed task that produced no writes.
pub const NO_WRITES_MARKER: &str = "__no_writes__";
/// Pending-write channel encoding a completed task's goto directives.
pub const GOTO_CHANNEL: &str = "__goto__";
/// Prefix of the per-node ephemeral trigger channels.
pub const TRIGGER_PREFIX: &str = "branch:to:";

/// Returns `true` for names the engine manages itself; user schemas may not
/// declare them.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name.starts_with("__") || name.starts_with(TRIGGER_PREFIX)
}

/// A named, typed state slot with an explicit merge policy.
///
/// Side-effect contract: [`update`](Channel::update) is the only mutating
/// entry point and is invoked by the barrier exactly once per round with the
/// full batch of updates from all tasks (an empty batch leaves the channel
/// untouched and returns `Ok(false)`). [`consume`](Channel::consume) is the
/// post-read clearing hook the barrier calls on channels that triggered a
/// task this round.
pub trait Channel: Send + Sync {
    /// Current materialized value, or [`ChannelError::Empty`].
    fn get(&self) -> Result<Value, ChannelError>;

    /// Cheap availability probe with no error path.
    fn is_available(&self) -> bool;

    /// Fold a batch of same-round updates into the value.
    ///
    /// Returns `Ok(true)` when the value changed, `Ok(false)` for an empty
    /// batch, and [`ChannelError::InvalidUpdate`] when the batch violates the
    /// variant's cardinality rule.
    fn update(&mut self, updates: Vec<Value>) -> Result<bool, ChannelError>;

    /// Serializable snapshot of the current value; `None` when empty.
    ///
    /// The returned value is an owned deep copy: later updates to the live
    /// channel cannot retroactively corrupt a persisted checkpoint.
    fn checkpoint(&self) -> Option<Value>;

    /// Build a fresh channel of the same variant from a snapshot.
    fn from_checkpoint(&self, snapshot: Option<Value>) -> Box<dyn Channel>;

    /// Clear transient state after the value was read by a scheduled task.
    ///
    /// Returns `true` when the call emptied the channel. Defaults to a no-op
    /// for persistent variants.
    fn consume(&mut self) -> bool {
        false
    }
}

/// Binary operator used by [`BinaryOperatorAggregate`].
pub type BinaryOperator = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;

/// Declarative description of a channel variant, held by the compiled graph's
/// schema and instantiated into live channels per thread.
#[derive(Clone)]
pub enum ChannelKind {
    /// Overwrite; rejects more than one update per round.
    LastValue,
    /// Overwrite; cleared once the following round has read it.
    Ephemeral,
    /// Ordered multiset of updates. `accumulate: false` clears the backlog
    /// each round instead of growing it.
    Topic { accumulate: bool },
    /// Fold current value and each update through a binary operator.
    Aggregate(BinaryOperator),
    /// Overwrite; asserts all same-round updates are equal (tolerates
    /// duplicate writers).
    Unique,
}

impl ChannelKind {
    /// Convenience constructor for an accumulating [`Topic`].
    #[must_use]
    pub fn topic() -> Self {
        ChannelKind::Topic { accumulate: true }
    }

    /// Convenience constructor for an aggregate channel.
    pub fn aggregate(op: impl Fn(Value, Value) -> Value + Send + Sync + 'static) -> Self {
        ChannelKind::Aggregate(Arc::new(op))
    }

    /// Instantiate a live, empty channel of this kind.
    #[must_use]
    pub fn instantiate(&self, name: impl Into<String>) -> Box<dyn Channel> {
        let name = name.into();
        match self {
            ChannelKind::LastValue => Box::new(LastValue::new(name)),
            ChannelKind::Ephemeral => Box::new(EphemeralValue::new(name)),
            ChannelKind::Topic { accumulate } => Box::new(Topic::new(name, *accumulate)),
            ChannelKind::Aggregate(op) => {
                Box::new(BinaryOperatorAggregate::new(name, op.clone()))
            }
            ChannelKind::Unique => Box::new(UniqueValue::new(name)),
        }
    }
}

impl fmt::Debug for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::LastValue => write!(f, "LastValue"),
            ChannelKind::Ephemeral => write!(f, "Ephemeral"),
            ChannelKind::Topic { accumulate } => {
                write!(f, "Topic {{ accumulate: {accumulate} }}")
            }
            ChannelKind::Aggregate(_) => write!(f, "Aggregate(..)"),
            ChannelKind::Unique => write!(f, "Unique"),
        }
    }
}

/// One entry of a graph's channel schema.
#[derive(Clone, Debug)]
pub struct ChannelDef {
    pub name: String,
    pub kind: ChannelKind,
}

impl ChannelDef {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

//! Checkpoint model and persistence contract.
//!
//! A checkpoint is an immutable record of one thread's state after a round:
//! channel values, per-channel version counters, the per-node seen-version
//! map the scheduler derives the next active set from, and bookkeeping
//! metadata. A thread is the ordered chain of checkpoints for one logical
//! run; forks branch the chain via a parent pointer without mutating it.

pub mod memory;
pub mod serializer;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;

use std::fmt;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scheduler::VersionState;

pub use memory::InMemoryStore;
pub use serializer::{JsonSerializer, Serializer, SerializerError};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use store::{CheckpointStore, StoreError, StoredRef};

/// Immutable snapshot of a thread after one round.
///
/// `id` is monotonically increasing per thread and doubles as the
/// time-ordering key. `round` is `-1` for the pre-execution input marker and
/// counts completed rounds from `0` (input applied) onward.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: u64,
    pub thread_id: String,
    /// Parent checkpoint ids keyed by namespace; forks record their origin
    /// under the root namespace `""`.
    #[serde(default)]
    pub parents: FxHashMap<String, u64>,
    pub round: i64,
    /// Channel name → snapshot value; only channels currently holding one.
    pub values: FxHashMap<String, Value>,
    pub versions: FxHashMap<String, u64>,
    pub versions_seen: FxHashMap<String, FxHashMap<String, u64>>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Extract the scheduler's version bookkeeping.
    #[must_use]
    pub fn version_state(&self) -> VersionState {
        VersionState {
            versions: self.versions.clone(),
            versions_seen: self.versions_seen.clone(),
        }
    }
}

/// Why a checkpoint exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Pre-execution marker carrying the raw input as pending writes.
    Input,
    /// Ordinary post-round snapshot written by the superstep loop.
    Loop,
    /// Caller-applied state edit.
    Update,
    /// Branch created from a prior checkpoint.
    Fork,
}

impl fmt::Display for CheckpointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckpointSource::Input => "input",
            CheckpointSource::Loop => "loop",
            CheckpointSource::Update => "update",
            CheckpointSource::Fork => "fork",
        };
        f.write_str(s)
    }
}

/// Metadata stored alongside a checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,
    pub round: i64,
    #[serde(default)]
    pub extra: FxHashMap<String, Value>,
}

impl CheckpointMetadata {
    #[must_use]
    pub fn new(source: CheckpointSource, round: i64) -> Self {
        Self {
            source,
            round,
            extra: FxHashMap::default(),
        }
    }

    /// Match against a caller-supplied filter: every filter entry must equal
    /// the corresponding field of the serialized metadata.
    #[must_use]
    pub fn matches(&self, filter: &FxHashMap<String, Value>) -> bool {
        let this = serde_json::to_value(self).unwrap_or(Value::Null);
        filter
            .iter()
            .all(|(key, expected)| this.get(key) == Some(expected))
    }
}

/// A `(channel, value)` pair recorded durably against a round before its
/// barrier completes, attributed to the producing task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub task_id: String,
    pub channel: String,
    pub value: Value,
}

/// One checkpoint together with its metadata and pending writes, as returned
/// by store lookups.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckpointTuple {
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub pending_writes: Vec<PendingWrite>,
}

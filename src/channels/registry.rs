//! Live channel set for one thread of execution.

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::errors::ChannelError;
use super::{Channel, ChannelDef};

/// Owns the instantiated channels of one running thread.
///
/// Built from a compiled graph's full schema (user channels, per-node
/// trigger channels, the fan-out queue). Only the barrier mutates it; task
/// code sees immutable snapshots taken from it.
pub struct ChannelRegistry {
    channels: FxHashMap<String, Box<dyn Channel>>,
}

impl ChannelRegistry {
    /// Instantiate every channel of `schema`, all empty.
    #[must_use]
    pub fn from_schema(schema: &[ChannelDef]) -> Self {
        let channels = schema
            .iter()
            .map(|def| (def.name.clone(), def.kind.instantiate(&def.name)))
            .collect();
        Self { channels }
    }

    /// Rebuild a live set from a checkpoint's value snapshot.
    ///
    /// Channels absent from `values` come back empty; the snapshot is
    /// deep-copied by each variant's `from_checkpoint`.
    #[must_use]
    pub fn restore(schema: &[ChannelDef], values: &FxHashMap<String, Value>) -> Self {
        let channels = schema
            .iter()
            .map(|def| {
                let blank = def.kind.instantiate(&def.name);
                let restored = blank.from_checkpoint(values.get(&def.name).cloned());
                (def.name.clone(), restored)
            })
            .collect();
        Self { channels }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.channels.get(name).is_some_and(|ch| ch.is_available())
    }

    /// Read a channel's current value.
    pub fn value(&self, name: &str) -> Result<Value, ChannelError> {
        match self.channels.get(name) {
            Some(ch) => ch.get(),
            None => Err(ChannelError::empty(name)),
        }
    }

    /// Apply one round's grouped batch to a single channel.
    pub fn apply(&mut self, name: &str, updates: Vec<Value>) -> Result<bool, ChannelError> {
        match self.channels.get_mut(name) {
            Some(ch) => ch.update(updates),
            None => Err(ChannelError::invalid_update(name, "undeclared channel")),
        }
    }

    /// Clear transient state on a channel that triggered a task this round.
    pub fn consume(&mut self, name: &str) -> bool {
        self.channels
            .get_mut(name)
            .is_some_and(|ch| ch.consume())
    }

    /// Snapshot of every channel currently holding a value.
    #[must_use]
    pub fn checkpoint_values(&self) -> FxHashMap<String, Value> {
        self.channels
            .iter()
            .filter_map(|(name, ch)| ch.checkpoint().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Materialized values of the named channels, skipping empty ones.
    #[must_use]
    pub fn read_many(&self, names: impl IntoIterator<Item = String>) -> FxHashMap<String, Value> {
        names
            .into_iter()
            .filter_map(|name| {
                let value = self.channels.get(&name).and_then(|ch| ch.get().ok())?;
                Some((name, value))
            })
            .collect()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.channels.keys().collect();
        names.sort();
        f.debug_struct("ChannelRegistry")
            .field("channels", &names)
            .finish()
    }
}

//! Overwrite channel accepting at most one update per round.

use serde_json::Value;

use super::errors::ChannelError;
use super::Channel;

/// Stores the single most recent value written to it.
///
/// Because task execution order within a round is unspecified, two writers in
/// the same round have no sound merge rule here; the batch is rejected with
/// [`ChannelError::InvalidUpdate`] instead of racing on last-write-wins.
#[derive(Clone, Debug, Default)]
pub struct LastValue {
    name: String,
    value: Option<Value>,
}

impl LastValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

impl Channel for LastValue {
    fn get(&self) -> Result<Value, ChannelError> {
        self.value.clone().ok_or_else(|| ChannelError::empty(&self.name))
    }

    fn is_available(&self) -> bool {
        self.value.is_some()
    }

    fn update(&mut self, mut updates: Vec<Value>) -> Result<bool, ChannelError> {
        match updates.len() {
            0 => Ok(false),
            1 => {
                self.value = updates.pop();
                Ok(true)
            }
            n => Err(ChannelError::invalid_update(
                &self.name,
                format!("received {n} updates in one round, expected at most 1"),
            )),
        }
    }

    fn checkpoint(&self) -> Option<Value> {
        self.value.clone()
    }

    fn from_checkpoint(&self, snapshot: Option<Value>) -> Box<dyn Channel> {
        Box::new(Self {
            name: self.name.clone(),
            value: snapshot,
        })
    }
}

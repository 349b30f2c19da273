//! Overwrite channel asserting all same-round writers agree.

use serde_json::Value;

use super::errors::ChannelError;
use super::Channel;

/// Like [`LastValue`](super::LastValue) but tolerant of duplicate writers:
/// any number of identical updates per round is accepted; differing updates
/// are an [`ChannelError::InvalidUpdate`].
#[derive(Clone, Debug, Default)]
pub struct UniqueValue {
    name: String,
    value: Option<Value>,
}

impl UniqueValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

impl Channel for UniqueValue {
    fn get(&self) -> Result<Value, ChannelError> {
        self.value.clone().ok_or_else(|| ChannelError::empty(&self.name))
    }

    fn is_available(&self) -> bool {
        self.value.is_some()
    }

    fn update(&mut self, mut updates: Vec<Value>) -> Result<bool, ChannelError> {
        if updates.is_empty() {
            return Ok(false);
        }
        if updates.windows(2).any(|w| w[0] != w[1]) {
            return Err(ChannelError::invalid_update(
                &self.name,
                "writers disagreed within one round",
            ));
        }
        self.value = updates.pop();
        Ok(true)
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

//! Overwrite channel cleared after the following round has read it.

use serde_json::Value;

use super::errors::ChannelError;
use super::Channel;

/// Holds a value for exactly one round of readers.
///
/// The barrier calls [`consume`](Channel::consume) once the channel has
/// triggered a task, so a stale trigger never re-fires. Multiple same-round
/// writers are tolerated only when they agree; the trigger-fanout path writes
/// a deduplicated batch.
#[derive(Clone, Debug, Default)]
pub struct EphemeralValue {
    name: String,
    value: Option<Value>,
}

impl EphemeralValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

impl Channel for EphemeralValue {
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
                "received conflicting updates in one round",
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

    fn consume(&mut self) -> bool {
        self.value.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn consume_clears_after_read() {
        let mut ch = EphemeralValue::new("branch:to:Custom:a");
        ch.update(vec![json!(true)]).unwrap();
        assert!(ch.is_available());
        assert!(ch.consume());
        assert!(!ch.is_available());
        assert!(!ch.consume());
    }

    #[test]
    fn agreeing_duplicate_writers_are_fine() {
        let mut ch = EphemeralValue::new("t");
        assert!(ch.update(vec![json!(true), json!(true)]).unwrap());
        let err = ch.update(vec![json!(1), json!(2)]).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidUpdate { .. }));
    }
}

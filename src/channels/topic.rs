//! Ordered multiset channel for fan-in accumulation.

use serde_json::Value;

use super::errors::ChannelError;
use super::Channel;

/// Collects every update into an ordered sequence.
///
/// With `accumulate: true` (the default) the sequence grows across rounds.
/// With `accumulate: false` the backlog is replaced by each round's batch and
/// cleared on [`consume`](Channel::consume), which is how the dynamic fan-out
/// queue avoids re-dispatching old packets.
///
/// An update that is itself a JSON array is flattened into its elements, so
/// `[a]` then `[b]` across rounds reads the same as `[a, b]` at once.
#[derive(Clone, Debug)]
pub struct Topic {
    name: String,
    values: Vec<Value>,
    accumulate: bool,
    written: bool,
}

impl Topic {
    pub fn new(name: impl Into<String>, accumulate: bool) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            accumulate,
            written: false,
        }
    }
}

impl Channel for Topic {
    fn get(&self) -> Result<Value, ChannelError> {
        if !self.written {
            return Err(ChannelError::empty(&self.name));
        }
        Ok(Value::Array(self.values.clone()))
    }

    fn is_available(&self) -> bool {
        self.written
    }

    fn update(&mut self, updates: Vec<Value>) -> Result<bool, ChannelError> {
        if updates.is_empty() {
            return Ok(false);
        }
        if !self.accumulate {
            self.values.clear();
        }
        for update in updates {
            match update {
                Value::Array(items) => self.values.extend(items),
                other => self.values.push(other),
            }
        }
        self.written = true;
        Ok(true)
    }

    fn checkpoint(&self) -> Option<Value> {
        if self.written {
            Some(Value::Array(self.values.clone()))
        } else {
            None
        }
    }

    fn from_checkpoint(&self, snapshot: Option<Value>) -> Box<dyn Channel> {
        let (values, written) = match snapshot {
            Some(Value::Array(items)) => (items, true),
            Some(other) => (vec![other], true),
            None => (Vec::new(), false),
        };
        Box::new(Self {
            name: self.name.clone(),
            values,
            accumulate: self.accumulate,
            written,
        })
    }

    fn consume(&mut self) -> bool {
        if self.accumulate || !self.written {
            return false;
        }
        self.values.clear();
        self.written = false;
        true
    }
}

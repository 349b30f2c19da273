//! Fold channel applying a binary operator across updates.

use serde_json::Value;

use super::errors::ChannelError;
use super::{BinaryOperator, Channel};

/// Folds the current value and each update through a binary operator.
///
/// The operator should be associative (and commutative if multiple writers
/// may hit the channel in one round), because neither update order within a
/// round nor task ordering is specified.
#[derive(Clone)]
pub struct BinaryOperatorAggregate {
    name: String,
    value: Option<Value>,
    op: BinaryOperator,
}

impl BinaryOperatorAggregate {
    pub fn new(name: impl Into<String>, op: BinaryOperator) -> Self {
        Self {
            name: name.into(),
            value: None,
            op,
        }
    }
}

impl Channel for BinaryOperatorAggregate {
    fn get(&self) -> Result<Value, ChannelError> {
        self.value.clone().ok_or_else(|| ChannelError::empty(&self.name))
    }

    fn is_available(&self) -> bool {
        self.value.is_some()
    }

    fn update(&mut self, updates: Vec<Value>) -> Result<bool, ChannelError> {
        if updates.is_empty() {
            return Ok(false);
        }
        let mut iter = updates.into_iter();
        let mut acc = match self.value.take() {
            Some(current) => current,
            // First ever update seeds the accumulator.
            None => iter.next().expect("non-empty batch"),
        };
        for update in iter {
            acc = (self.op)(acc, update);
        }
        self.value = Some(acc);
        Ok(true)
    }

    fn checkpoint(&self) -> Option<Value> {
        self.value.clone()
    }

    fn from_checkpoint(&self, snapshot: Option<Value>) -> Box<dyn Channel> {
        Box::new(Self {
            name: self.name.clone(),
            value: snapshot,
            op: self.op.clone(),
        })
    }
}

impl std::fmt::Debug for BinaryOperatorAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryOperatorAggregate")
            .field("name", &self.name)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

//! Interrupt/resume primitives: positional pause requests and the resume
//! values that answer them.
//!
//! An interrupt is identified by where it was raised, not by what it carried:
//! (thread, round, node, path, ordinal-of-call). Matching a resume value to a
//! pending interrupt is strictly positional; the nth `interrupt` call during
//! a node's (re-)execution consumes the nth resume value supplied for that
//! task, in call order. The interrupted node always re-executes from its
//! start, so earlier interrupt calls replay against already-consumed values.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Deterministic id for the `ordinal`th interrupt raised by one task.
#[must_use]
pub fn interrupt_id(thread_id: &str, round: i64, node: &str, path: &str, ordinal: usize) -> String {
    format!("{thread_id}:{round}:{node}:{path}:{ordinal}")
}

/// A pause request raised inside a task, persisted until resumed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    /// Positional identity, see [`interrupt_id`].
    pub id: String,
    /// Encoded node identity that raised the interrupt.
    pub node: String,
    /// Round the interrupt was raised in.
    pub round: i64,
    /// Task path (disambiguates fan-out instances).
    pub path: String,
    /// Zero-based position of the `interrupt` call within the node invocation.
    pub ordinal: usize,
    /// Payload handed to the external party (question, form, diff, ...).
    pub value: Value,
}

/// Resume input supplied when re-invoking an interrupted thread.
#[derive(Clone, Debug)]
pub enum Resume {
    /// Answer the sole pending interrupt.
    Value(Value),
    /// Answer interrupts positionally, in call order.
    Values(Vec<Value>),
    /// Answer by interrupt id when several are outstanding.
    ById(FxHashMap<String, Value>),
}

impl Resume {
    /// Flatten into the positional list for one pending task, given that
    /// task's outstanding interrupts in ordinal order.
    #[must_use]
    pub fn values_for(&self, pending: &[Interrupt]) -> Vec<Value> {
        match self {
            Resume::Value(v) => vec![v.clone()],
            Resume::Values(vs) => vs.clone(),
            Resume::ById(map) => pending
                .iter()
                .filter_map(|i| map.get(&i.id).cloned())
                .collect(),
        }
    }
}

/// Positional cursor over the resume values available to one task execution.
///
/// Shared into the node context; each `interrupt` call advances it. When the
/// cursor runs out, the call that fell off the end suspends the task with the
/// next ordinal.
#[derive(Clone, Debug, Default)]
pub struct ResumeCursor {
    values: Arc<Vec<Value>>,
    next: Arc<AtomicUsize>,
}

impl ResumeCursor {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: Arc::new(values),
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Consume the next resume value; `Err(ordinal)` when none is left.
    pub fn take(&self) -> Result<Value, usize> {
        let ordinal = self.next.fetch_add(1, Ordering::SeqCst);
        self.values.get(ordinal).cloned().ok_or(ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_hands_out_values_positionally() {
        let cursor = ResumeCursor::new(vec![json!("x"), json!("y")]);
        assert_eq!(cursor.take().unwrap(), json!("x"));
        assert_eq!(cursor.take().unwrap(), json!("y"));
        assert_eq!(cursor.take().unwrap_err(), 2);
    }

    #[test]
    fn by_id_resume_orders_by_pending_ordinals() {
        let a = Interrupt {
            id: interrupt_id("t", 1, "Custom:h", "", 0),
            node: "Custom:h".into(),
            round: 1,
            path: String::new(),
            ordinal: 0,
            value: json!("first?"),
        };
        let b = Interrupt {
            ordinal: 1,
            id: interrupt_id("t", 1, "Custom:h", "", 1),
            ..a.clone()
        };
        let mut map = FxHashMap::default();
        map.insert(b.id.clone(), json!("y"));
        map.insert(a.id.clone(), json!("x"));

        let resume = Resume::ById(map);
        assert_eq!(resume.values_for(&[a, b]), vec![json!("x"), json!("y")]);
    }
}

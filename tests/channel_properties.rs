//! Property tests over channel reducer semantics.

use std::sync::Arc;

use loomgraph::channels::{BinaryOperator, BinaryOperatorAggregate, Channel, Topic};
use proptest::prelude::*;

fn json_scalar() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        any::<i64>().prop_map(serde_json::Value::from),
        any::<bool>().prop_map(serde_json::Value::from),
        "[a-z]{0,8}".prop_map(serde_json::Value::from),
    ]
}

fn batches() -> impl Strategy<Value = Vec<Vec<serde_json::Value>>> {
    prop::collection::vec(prop::collection::vec(json_scalar(), 0..5), 0..6)
}

fn sum_op() -> BinaryOperator {
    Arc::new(|a, b| serde_json::Value::from(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)))
}

proptest! {
    /// An accumulating topic applied batch by batch reads the same as the
    /// flat concatenation of every non-empty batch.
    #[test]
    fn topic_accumulation_equals_concatenation(batches in batches()) {
        let mut topic = Topic::new("log", true);
        let mut expected = Vec::new();
        for batch in &batches {
            topic.update(batch.clone()).unwrap();
            expected.extend(batch.iter().cloned());
        }

        if batches.iter().any(|b| !b.is_empty()) {
            prop_assert_eq!(topic.get().unwrap(), serde_json::Value::Array(expected));
        } else {
            prop_assert!(!topic.is_available());
        }
    }

    /// Nested arrays flatten into their elements, so pre-flattened input
    /// yields the same sequence.
    #[test]
    fn topic_flattens_array_updates(values in prop::collection::vec(json_scalar(), 1..8)) {
        let mut wrapped = Topic::new("log", true);
        wrapped.update(vec![serde_json::Value::Array(values.clone())]).unwrap();

        let mut flat = Topic::new("log", true);
        flat.update(values.clone()).unwrap();

        prop_assert_eq!(wrapped.get().unwrap(), flat.get().unwrap());
    }

    /// Checkpoint then restore is lossless for a topic mid-accumulation.
    #[test]
    fn topic_restore_roundtrips(values in prop::collection::vec(json_scalar(), 1..8)) {
        let mut topic = Topic::new("log", true);
        topic.update(values).unwrap();

        let restored = topic.from_checkpoint(topic.checkpoint());
        prop_assert_eq!(restored.get().unwrap(), topic.get().unwrap());
    }

    /// Summation folds to the same total no matter how the updates are
    /// grouped into batches.
    #[test]
    fn aggregate_sum_is_grouping_independent(numbers in prop::collection::vec(-1000i64..1000, 1..20),
                                             split in 0usize..20) {
        let split = split.min(numbers.len());
        let values: Vec<serde_json::Value> =
            numbers.iter().copied().map(serde_json::Value::from).collect();

        let mut all_at_once = BinaryOperatorAggregate::new("total", sum_op());
        all_at_once.update(values.clone()).unwrap();

        let mut in_two_rounds = BinaryOperatorAggregate::new("total", sum_op());
        let (head, tail) = values.split_at(split);
        if !head.is_empty() {
            in_two_rounds.update(head.to_vec()).unwrap();
        }
        if !tail.is_empty() {
            in_two_rounds.update(tail.to_vec()).unwrap();
        }

        let total: i64 = numbers.iter().sum();
        prop_assert_eq!(all_at_once.get().unwrap(), serde_json::Value::from(total));
        prop_assert_eq!(in_two_rounds.get().unwrap(), serde_json::Value::from(total));
    }
}

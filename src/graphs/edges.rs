//! Edge types: static adjacency lives in the compiled graph; this module
//! holds the conditional (predicate-driven) form.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::state::StateSnapshot;
use crate::types::NodeKind;

/// Routing function over post-barrier state; returns zero or more target
/// names. Evaluated once per round for each node that ran.
pub type EdgePredicate = Arc<dyn Fn(&StateSnapshot) -> Vec<String> + Send + Sync>;

/// A conditional edge: after `from` runs, `predicate` picks the next nodes.
///
/// Without a `targets` map the returned names resolve as node names directly
/// (identity mapping, `"End"` terminates the branch). With a map, returned
/// names are looked up first, which keeps predicates decoupled from node
/// naming.
#[derive(Clone)]
pub struct ConditionalEdge {
    pub from: NodeKind,
    pub predicate: EdgePredicate,
    pub targets: Option<FxHashMap<String, NodeKind>>,
}

impl ConditionalEdge {
    pub fn new(
        from: impl Into<NodeKind>,
        predicate: impl Fn(&StateSnapshot) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            from: from.into(),
            predicate: Arc::new(predicate),
            targets: None,
        }
    }

    /// Attach an explicit name → node mapping for predicate results.
    #[must_use]
    pub fn with_targets<K, N>(mut self, targets: impl IntoIterator<Item = (K, N)>) -> Self
    where
        K: Into<String>,
        N: Into<NodeKind>,
    {
        self.targets = Some(
            targets
                .into_iter()
                .map(|(k, n)| (k.into(), n.into()))
                .collect(),
        );
        self
    }

    /// Resolve one predicate result to a node, honoring the target map.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<NodeKind> {
        match &self.targets {
            Some(map) => map.get(name).cloned(),
            None => Some(NodeKind::from(name)),
        }
    }
}

impl fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("from", &self.from)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

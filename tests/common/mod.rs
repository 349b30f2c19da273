#![allow(dead_code)]

pub mod nodes;

pub use nodes::*;

use std::sync::Arc;

use loomgraph::checkpoint::InMemoryStore;
use loomgraph::graphs::CompiledGraph;
use loomgraph::runtimes::{Runner, RuntimeConfig};

/// Runner over a shared in-memory store so tests can inspect persistence.
pub fn make_runner(graph: CompiledGraph) -> (Runner, Arc<InMemoryStore>) {
    make_runner_with(graph, RuntimeConfig::default())
}

pub fn make_runner_with(
    graph: CompiledGraph,
    config: RuntimeConfig,
) -> (Runner, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let runner = Runner::new(graph, store.clone(), config);
    (runner, store)
}

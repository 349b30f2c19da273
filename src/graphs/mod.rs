//! Graph definition: builder, edges, and the compiled, validated artifact
//! the scheduler executes.
//!
//! A graph is assembled fluently ([`GraphBuilder`]), then checked and frozen
//! by [`GraphBuilder::compile`] into a [`CompiledGraph`]. All structural
//! problems (duplicate nodes, dangling targets, orphans, missing entry) are
//! compile-time errors raised before any round runs. Cycles are allowed by
//! construction and bounded only by the runtime's round ceiling.

pub mod builder;
pub mod compilation;
pub mod edges;

pub use builder::GraphBuilder;
pub use compilation::{CompiledGraph, GraphError};
pub use edges::{ConditionalEdge, EdgePredicate};

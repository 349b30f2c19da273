//! # Loomgraph: Durable Graph Execution Engine
//!
//! Loomgraph runs directed graphs of async nodes over typed state channels
//! using superstep scheduling: all due nodes of a round execute against the
//! same immutable snapshot, and a barrier merges their writes through each
//! channel's reducer exactly once. Every round boundary is checkpointed, so
//! a thread of execution can survive a crash, pause on a human-in-the-loop
//! interrupt, resume with answers, fork into what-if branches, and time
//! travel to any prior checkpoint.
//!
//! ## Core Concepts
//!
//! - **Nodes**: Async units of work returning channel writes and routing
//! - **Channels**: Named state slots with explicit merge (reducer) policies
//! - **Scheduler**: Version-gated activation, one superstep at a time
//! - **Barrier**: The single place channel state changes, once per round
//! - **Checkpoints**: Immutable per-round snapshots forming a forkable chain
//! - **Interrupts**: Positional pause/resume points inside node bodies
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use loomgraph::channels::ChannelKind;
//! use loomgraph::checkpoint::InMemoryStore;
//! use loomgraph::graphs::GraphBuilder;
//! use loomgraph::node::{Node, NodeContext, NodeError, NodeOutput};
//! use loomgraph::runtimes::{Runner, RuntimeConfig};
//! use loomgraph::state::StateSnapshot;
//! use serde_json::json;
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl Node for Greet {
//!     async fn run(
//!         &self,
//!         snapshot: StateSnapshot,
//!         ctx: NodeContext,
//!     ) -> Result<NodeOutput, NodeError> {
//!         ctx.emit("greet", "composing greeting")?;
//!         let name = snapshot.get_or_null("name");
//!         Ok(NodeOutput::update([("greeting", json!(format!("hello, {name}")))]))
//!     }
//! }
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = GraphBuilder::new()
//!     .add_channel("name", ChannelKind::LastValue)
//!     .add_channel("greeting", ChannelKind::LastValue)
//!     .add_node("greet", Greet)
//!     .set_entry("greet")
//!     .compile()?;
//!
//! let runner = Runner::new(graph, Arc::new(InMemoryStore::new()), RuntimeConfig::default());
//! let outcome = runner.run("thread-1", vec![("name".into(), json!("ada"))]).await?;
//! println!("{:?}", outcome.values());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`types`] - Node identity, including the Start/End sentinels
//! - [`channels`] - Channel variants, reducers, and the live registry
//! - [`graphs`] - Graph construction and compile-time validation
//! - [`node`] - The node trait, execution context, and outputs
//! - [`control`] - Routing directives (goto and dynamic fan-out)
//! - [`scheduler`] - Task preparation, execution, and the round barrier
//! - [`checkpoint`] - Checkpoint model and pluggable stores
//! - [`interrupt`] - Pause/resume primitives
//! - [`runtimes`] - The runner: durability, recovery, forking, history
//! - [`event_bus`] - Structured run events fanned out to sinks

pub mod channels;
pub mod checkpoint;
pub mod control;
pub mod event_bus;
pub mod graphs;
pub mod interrupt;
pub mod node;
pub mod runtimes;
pub mod scheduler;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod utils;

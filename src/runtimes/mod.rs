//! Durable execution runtime: the runner, its configuration, and the
//! execution-facing outcome types.

pub mod execution;
pub mod runner;
pub mod runtime_config;

pub use execution::{Durability, RunOutcome};
pub use runner::{Runner, RunnerError, INPUT_TASK_ID};
pub use runtime_config::RuntimeConfig;

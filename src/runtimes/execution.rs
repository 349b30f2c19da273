//! Execution-facing types: durability modes and run outcomes.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::interrupt::Interrupt;

/// When checkpoints written by the superstep loop reach the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Durability {
    /// Buffer everything in memory; flush once the run completes, pauses,
    /// or fails. Fastest, but a crash mid-run loses the whole run.
    Exit,
    /// Hand each checkpoint to a background save and keep stepping. A crash
    /// can lose the most recent round(s).
    Async,
    /// Await every save before the next round starts. The default.
    #[default]
    Sync,
}

impl FromStr for Durability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exit" => Ok(Durability::Exit),
            "async" => Ok(Durability::Async),
            "sync" => Ok(Durability::Sync),
            other => Err(format!("unknown durability mode `{other}`")),
        }
    }
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Durability::Exit => "exit",
            Durability::Async => "async",
            Durability::Sync => "sync",
        };
        f.write_str(s)
    }
}

/// How an invocation of a thread ended.
#[derive(Clone, Debug)]
pub enum RunOutcome {
    /// The active set drained; final values of the user-declared channels.
    Complete(FxHashMap<String, Value>),
    /// One or more tasks paused awaiting external input. Sorted by
    /// (node, path, ordinal) for deterministic presentation.
    Interrupted(Vec<Interrupt>),
}

impl RunOutcome {
    /// Final channel values, if the run completed.
    #[must_use]
    pub fn values(&self) -> Option<&FxHashMap<String, Value>> {
        match self {
            RunOutcome::Complete(values) => Some(values),
            RunOutcome::Interrupted(_) => None,
        }
    }

    /// Pending interrupts, if the run paused.
    #[must_use]
    pub fn interrupts(&self) -> Option<&[Interrupt]> {
        match self {
            RunOutcome::Complete(_) => None,
            RunOutcome::Interrupted(interrupts) => Some(interrupts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durability_parses_case_insensitively() {
        assert_eq!("Exit".parse::<Durability>().unwrap(), Durability::Exit);
        assert_eq!("ASYNC".parse::<Durability>().unwrap(), Durability::Async);
        assert_eq!("sync".parse::<Durability>().unwrap(), Durability::Sync);
        assert!("eventually".parse::<Durability>().is_err());
    }

    #[test]
    fn default_is_sync() {
        assert_eq!(Durability::default(), Durability::Sync);
    }
}

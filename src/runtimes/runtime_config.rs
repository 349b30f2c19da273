//! Runner configuration.

use super::execution::Durability;

/// Tunable knobs for a [`Runner`](super::Runner).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Maximum number of rounds per invocation before the run is aborted.
    pub recursion_limit: usize,
    /// Checkpoint persistence mode.
    pub durability: Durability,
    /// Attach a stdout sink to the event bus.
    pub stdout_events: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 25,
            durability: Durability::default(),
            stdout_events: false,
        }
    }
}

impl RuntimeConfig {
    /// Build from the environment (after loading `.env` if present):
    /// `LOOMGRAPH_RECURSION_LIMIT`, `LOOMGRAPH_DURABILITY`,
    /// `LOOMGRAPH_STDOUT_EVENTS`. Unset or unparsable variables fall back to
    /// the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("LOOMGRAPH_RECURSION_LIMIT") {
            if let Ok(limit) = raw.parse() {
                config.recursion_limit = limit;
            }
        }
        if let Ok(raw) = std::env::var("LOOMGRAPH_DURABILITY") {
            if let Ok(mode) = raw.parse() {
                config.durability = mode;
            }
        }
        if let Ok(raw) = std::env::var("LOOMGRAPH_STDOUT_EVENTS") {
            config.stdout_events = matches!(raw.as_str(), "1" | "true" | "yes");
        }
        config
    }

    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    #[must_use]
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    #[must_use]
    pub fn with_stdout_events(mut self, enabled: bool) -> Self {
        self.stdout_events = enabled;
        self
    }
}

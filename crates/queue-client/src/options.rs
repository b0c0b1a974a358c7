//! Client options

use serde::Deserialize;

fn default_change() -> u32 {
    15
}

fn default_balanced() -> bool {
    true
}

/// Per-client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientOptions {
    /// Logical operation name; pool locks and metrics are scoped by it
    pub queue: String,
    /// Switch sessions each time the fleet-wide success count hits a multiple of this
    #[serde(default = "default_change")]
    pub change: u32,
    /// Pick the least-used session when a usage counter is available
    #[serde(default = "default_balanced")]
    pub balanced: bool,
    /// Attempt ceiling per `request` call; unlimited when unset
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl ClientOptions {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            change: default_change(),
            balanced: default_balanced(),
            max_attempts: None,
        }
    }

    pub fn with_change(mut self, change: u32) -> Self {
        self.change = change.max(1);
        self
    }

    pub fn with_balanced(mut self, balanced: bool) -> Self {
        self.balanced = balanced;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

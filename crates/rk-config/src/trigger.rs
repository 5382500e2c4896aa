use std::time::Duration;

use serde::Deserialize;

use crate::types::{HumanDuration, TriggerPolicy};

/// `[trigger]` section: micro-batch scheduling shared by all pipelines.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub interval: HumanDuration,
    pub policy: TriggerPolicy,
    /// Upper bound on the final drain trigger run during shutdown.
    pub drain_timeout: HumanDuration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            interval: HumanDuration::from(Duration::from_secs(60)),
            policy: TriggerPolicy::Queue,
            drain_timeout: HumanDuration::from(Duration::from_secs(30)),
        }
    }
}

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryConfig;
use crate::types::{HumanDuration, SourceKind};

/// `[source]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Input file. Relative paths are resolved against the config file's
    /// parent directory.
    pub path: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: HumanDuration,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Upper bound on enriched records held in the feed at once.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
    /// Polled batches at least this large are decoded on blocking threads.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    #[serde(default)]
    pub reconnect: RetryConfig,
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration::from(Duration::from_millis(500))
}

fn default_max_batch_size() -> usize {
    1000
}

fn default_feed_capacity() -> usize {
    100_000
}

fn default_parallel_threshold() -> usize {
    256
}

use std::path::PathBuf;

use serde::Deserialize;

use crate::types::{HumanDuration, SinkKind};

/// One `[sinks.<pipeline>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    /// Output path, required for `file` and `keyed_file`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Checkpoint location (directory). Must be unique per pipeline.
    pub checkpoint: PathBuf,
    /// Per-pipeline override of `trigger.interval`.
    #[serde(default)]
    pub trigger_interval: Option<HumanDuration>,
}

/// The `[sinks]` table: exactly one sink per output pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct SinksConfig {
    pub raw: SinkConfig,
    pub time_kpi: SinkConfig,
    pub country_kpi: SinkConfig,
}

impl SinksConfig {
    /// `(section name, config)` in pipeline order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &SinkConfig)> {
        [
            ("raw", &self.raw),
            ("time_kpi", &self.time_kpi),
            ("country_kpi", &self.country_kpi),
        ]
        .into_iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut SinkConfig> {
        [&mut self.raw, &mut self.time_kpi, &mut self.country_kpi].into_iter()
    }
}

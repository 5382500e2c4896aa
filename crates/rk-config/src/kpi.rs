use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::logging::LoggingConfig;
use crate::metrics::MetricsConfig;
use crate::retry::RetryConfig;
use crate::sink::SinksConfig;
use crate::source::SourceConfig;
use crate::trigger::TriggerConfig;
use crate::validate;
use crate::window::{WindowConfig, WindowSection};

// ---------------------------------------------------------------------------
// Raw TOML structure (intermediate representation)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct KpiConfigRaw {
    source: SourceConfig,
    #[serde(default)]
    window: WindowSection,
    #[serde(default)]
    trigger: TriggerConfig,
    #[serde(default)]
    retry: RetryConfig,
    sinks: SinksConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

// ---------------------------------------------------------------------------
// KpiConfig (resolved, validated)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct KpiConfig {
    pub source: SourceConfig,
    pub window: WindowConfig,
    pub trigger: TriggerConfig,
    /// Sink write retry policy.
    pub retry: RetryConfig,
    pub sinks: SinksConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl KpiConfig {
    /// Read and parse a `retail-kpi.toml` file. Relative paths inside the
    /// file are resolved against its parent directory.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let mut config: KpiConfig = content.parse()?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base_dir);
        Ok(config)
    }

    /// Rebase every relative path in the config onto `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        rebase(&mut self.source.path, base_dir);
        for sink in self.sinks.iter_mut() {
            if let Some(p) = sink.path.as_mut() {
                rebase(p, base_dir);
            }
            rebase(&mut sink.checkpoint, base_dir);
        }
        if let Some(f) = self.logging.file.as_mut() {
            rebase(f, base_dir);
        }
    }
}

fn rebase(path: &mut PathBuf, base_dir: &Path) {
    if path.is_relative() {
        *path = base_dir.join(&*path);
    }
}

impl FromStr for KpiConfig {
    type Err = anyhow::Error;

    /// Parse a TOML string into a resolved, validated [`KpiConfig`].
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let raw: KpiConfigRaw = toml::from_str(toml_str)?;

        let config = KpiConfig {
            source: raw.source,
            window: raw.window.resolve(),
            trigger: raw.trigger,
            retry: raw.retry,
            sinks: raw.sinks,
            logging: raw.logging,
            metrics: raw.metrics,
        };

        validate::validate(&config)?;

        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use crate::types::{HumanDuration, SinkKind, SourceKind, TriggerPolicy};
    use std::time::Duration;

    const FULL_TOML: &str = r#"
[source]
kind = "file"
path = "data/events.jsonl"
poll_interval = "500ms"
max_batch_size = 1000
feed_capacity = 100000

[source.reconnect]
initial_backoff = "500ms"
max_backoff = "30s"
max_attempts = 10

[window]
size = "1m"
slide = "1m"
allowed_lateness = "1m"

[trigger]
interval = "1m"
policy = "queue"
drain_timeout = "30s"

[retry]
initial_backoff = "500ms"
max_backoff = "30s"
max_attempts = 5

[sinks.raw]
kind = "console"
checkpoint = "checkpoints/raw"

[sinks.time_kpi]
kind = "keyed_file"
path = "out/time-kpi.json"
checkpoint = "checkpoints/time-kpi"

[sinks.country_kpi]
kind = "keyed_file"
path = "out/country-kpi.json"
checkpoint = "checkpoints/country-kpi"
trigger_interval = "30s"

[logging]
level = "info"
format = "json"
file = "logs/retail-kpi.log"

[metrics]
enabled = true
report_interval = "10s"
prometheus_listen = "127.0.0.1:9911"
"#;

    #[test]
    fn load_full_toml() {
        let cfg: KpiConfig = FULL_TOML.parse().unwrap();

        // source
        assert_eq!(cfg.source.kind, SourceKind::File);
        assert_eq!(cfg.source.path, PathBuf::from("data/events.jsonl"));
        assert_eq!(
            cfg.source.poll_interval.as_duration(),
            Duration::from_millis(500)
        );
        assert_eq!(cfg.source.max_batch_size, 1000);
        assert_eq!(cfg.source.feed_capacity, 100_000);
        assert_eq!(cfg.source.reconnect.max_attempts, 10);

        // window
        assert!(cfg.window.is_tumbling());
        assert_eq!(cfg.window.size.as_millis_i64(), 60_000);
        assert_eq!(cfg.window.allowed_lateness.as_millis_i64(), 60_000);

        // trigger
        assert_eq!(cfg.trigger.policy, TriggerPolicy::Queue);
        assert_eq!(cfg.trigger.drain_timeout.as_duration(), Duration::from_secs(30));

        // sinks
        assert_eq!(cfg.sinks.raw.kind, SinkKind::Console);
        assert!(cfg.sinks.raw.path.is_none());
        assert_eq!(cfg.sinks.time_kpi.kind, SinkKind::KeyedFile);
        assert_eq!(
            cfg.sinks.country_kpi.trigger_interval,
            Some("30s".parse::<HumanDuration>().unwrap())
        );
        let names: Vec<&str> = cfg.sinks.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["raw", "time_kpi", "country_kpi"]);

        // ambient
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert!(cfg.metrics.enabled);
        assert_eq!(cfg.metrics.prometheus_listen, "127.0.0.1:9911");
    }

    #[test]
    fn optional_sections_default() {
        let toml = r#"
[source]
kind = "file"
path = "events.jsonl"

[sinks.raw]
kind = "console"
checkpoint = "ck/raw"

[sinks.time_kpi]
kind = "console"
checkpoint = "ck/time"

[sinks.country_kpi]
kind = "console"
checkpoint = "ck/country"
"#;
        let cfg: KpiConfig = toml.parse().unwrap();
        assert_eq!(cfg.window, WindowConfig::default());
        assert_eq!(cfg.trigger.interval.as_duration(), Duration::from_secs(60));
        assert_eq!(cfg.retry, RetryConfig::default());
        assert_eq!(cfg.source.max_batch_size, 1000);
        assert!(!cfg.metrics.enabled);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn resolve_paths_rebases_relative_only() {
        let toml = FULL_TOML.replace(
            "path = \"out/time-kpi.json\"",
            "path = \"/abs/time-kpi.json\"",
        );
        let mut cfg: KpiConfig = toml.parse().unwrap();
        cfg.resolve_paths(Path::new("/etc/rk"));
        assert_eq!(cfg.source.path, PathBuf::from("/etc/rk/data/events.jsonl"));
        assert_eq!(
            cfg.sinks.time_kpi.path.as_deref(),
            Some(Path::new("/abs/time-kpi.json"))
        );
        assert_eq!(
            cfg.sinks.raw.checkpoint,
            PathBuf::from("/etc/rk/checkpoints/raw")
        );
        assert_eq!(
            cfg.logging.file.as_deref(),
            Some(Path::new("/etc/rk/logs/retail-kpi.log"))
        );
    }

    #[test]
    fn reject_unknown_policy() {
        let toml = FULL_TOML.replace("policy = \"queue\"", "policy = \"parallel\"");
        assert!(toml.parse::<KpiConfig>().is_err());
    }

    #[test]
    fn reject_unknown_sink_kind() {
        let toml = FULL_TOML.replace("kind = \"console\"", "kind = \"kafka\"");
        assert!(toml.parse::<KpiConfig>().is_err());
    }

    #[test]
    fn reject_unknown_top_level_section() {
        let toml = format!("{FULL_TOML}\n[server]\nlisten = \"x\"\n");
        assert!(toml.parse::<KpiConfig>().is_err());
    }

    #[test]
    fn missing_sinks_fails() {
        let toml = r#"
[source]
kind = "file"
path = "events.jsonl"
"#;
        assert!(toml.parse::<KpiConfig>().is_err());
    }
}

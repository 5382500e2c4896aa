use std::collections::HashSet;

use crate::kpi::KpiConfig;
use crate::retry::RetryConfig;

/// Internal validation, called automatically during `KpiConfig::from_str` / `load`.
pub(crate) fn validate(config: &KpiConfig) -> anyhow::Result<()> {
    let w = &config.window;
    if w.size.is_zero() {
        anyhow::bail!("window.size must be > 0");
    }
    if w.slide.is_zero() {
        anyhow::bail!("window.slide must be > 0");
    }
    if w.slide.as_duration() > w.size.as_duration() {
        anyhow::bail!(
            "window.slide ({}) must not exceed window.size ({})",
            w.slide,
            w.size,
        );
    }

    if config.trigger.interval.is_zero() {
        anyhow::bail!("trigger.interval must be > 0");
    }

    if config.source.max_batch_size == 0 {
        anyhow::bail!("source.max_batch_size must be > 0");
    }
    if config.source.feed_capacity == 0 {
        anyhow::bail!("source.feed_capacity must be > 0");
    }
    if config.source.poll_interval.is_zero() {
        anyhow::bail!("source.poll_interval must be > 0");
    }

    check_retry("retry", &config.retry)?;
    check_retry("source.reconnect", &config.source.reconnect)?;

    // Each pipeline owns its checkpoint location.
    let mut seen = HashSet::new();
    for (name, sink) in config.sinks.iter() {
        if sink.kind.needs_path() && sink.path.is_none() {
            anyhow::bail!("sinks.{name}: kind {:?} requires a path", sink.kind);
        }
        if sink.checkpoint.as_os_str().is_empty() {
            anyhow::bail!("sinks.{name}.checkpoint must not be empty");
        }
        if !seen.insert(sink.checkpoint.clone()) {
            anyhow::bail!(
                "sinks.{name}.checkpoint {:?} is shared with another pipeline",
                sink.checkpoint,
            );
        }
        if let Some(iv) = sink.trigger_interval
            && iv.is_zero()
        {
            anyhow::bail!("sinks.{name}.trigger_interval must be > 0");
        }
    }

    Ok(())
}

fn check_retry(section: &str, retry: &RetryConfig) -> anyhow::Result<()> {
    if retry.max_attempts == 0 {
        anyhow::bail!("{section}.max_attempts must be > 0");
    }
    if retry.initial_backoff.as_duration() > retry.max_backoff.as_duration() {
        anyhow::bail!(
            "{section}.initial_backoff ({}) exceeds {section}.max_backoff ({})",
            retry.initial_backoff,
            retry.max_backoff,
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::KpiConfig;

    /// Minimal valid TOML for validation tests.
    const MINIMAL_TOML: &str = r#"
[source]
kind = "file"
path = "events.jsonl"

[window]
size = "1m"
slide = "1m"

[trigger]
interval = "1m"

[retry]
max_attempts = 3

[sinks.raw]
kind = "console"
checkpoint = "ck/raw"

[sinks.time_kpi]
kind = "file"
path = "out/time.jsonl"
checkpoint = "ck/time"

[sinks.country_kpi]
kind = "keyed_file"
path = "out/country.json"
checkpoint = "ck/country"
"#;

    fn reject(toml: String, needle: &str) {
        let err = toml.parse::<KpiConfig>().unwrap_err();
        assert!(
            err.to_string().contains(needle),
            "expected error containing {needle:?}, got: {err}",
        );
    }

    #[test]
    fn minimal_is_valid() {
        assert!(MINIMAL_TOML.parse::<KpiConfig>().is_ok());
    }

    #[test]
    fn reject_zero_window_size() {
        reject(
            MINIMAL_TOML.replace("size = \"1m\"", "size = \"0s\""),
            "window.size",
        );
    }

    #[test]
    fn reject_zero_slide() {
        reject(
            MINIMAL_TOML.replace("slide = \"1m\"", "slide = \"0s\""),
            "window.slide",
        );
    }

    #[test]
    fn reject_slide_larger_than_size() {
        reject(
            MINIMAL_TOML.replace("slide = \"1m\"", "slide = \"2m\""),
            "must not exceed",
        );
    }

    #[test]
    fn accept_sliding_window() {
        let toml = MINIMAL_TOML.replace("slide = \"1m\"", "slide = \"30s\"");
        let cfg: KpiConfig = toml.parse().unwrap();
        assert!(!cfg.window.is_tumbling());
    }

    #[test]
    fn reject_zero_trigger_interval() {
        reject(
            MINIMAL_TOML.replace("interval = \"1m\"", "interval = \"0s\""),
            "trigger.interval",
        );
    }

    #[test]
    fn reject_zero_batch_size() {
        reject(
            MINIMAL_TOML.replace(
                "path = \"events.jsonl\"",
                "path = \"events.jsonl\"\nmax_batch_size = 0",
            ),
            "max_batch_size",
        );
    }

    #[test]
    fn reject_zero_feed_capacity() {
        reject(
            MINIMAL_TOML.replace(
                "path = \"events.jsonl\"",
                "path = \"events.jsonl\"\nfeed_capacity = 0",
            ),
            "feed_capacity",
        );
    }

    #[test]
    fn reject_zero_retry_attempts() {
        reject(
            MINIMAL_TOML.replace("max_attempts = 3", "max_attempts = 0"),
            "retry.max_attempts",
        );
    }

    #[test]
    fn reject_file_sink_without_path() {
        reject(
            MINIMAL_TOML.replace("path = \"out/time.jsonl\"\n", ""),
            "sinks.time_kpi",
        );
    }

    #[test]
    fn reject_shared_checkpoint_location() {
        reject(
            MINIMAL_TOML.replace("checkpoint = \"ck/time\"", "checkpoint = \"ck/raw\""),
            "shared with another pipeline",
        );
    }

    #[test]
    fn reject_zero_pipeline_trigger_override() {
        reject(
            MINIMAL_TOML.replace(
                "checkpoint = \"ck/country\"",
                "checkpoint = \"ck/country\"\ntrigger_interval = \"0s\"",
            ),
            "sinks.country_kpi.trigger_interval",
        );
    }
}

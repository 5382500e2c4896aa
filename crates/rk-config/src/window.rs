use std::time::Duration;

use serde::Deserialize;

use crate::types::HumanDuration;

// ---------------------------------------------------------------------------
// WindowSection: deserialized from [window]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct WindowSection {
    pub size: Option<HumanDuration>,
    pub slide: Option<HumanDuration>,
    pub allowed_lateness: Option<HumanDuration>,
}

// ---------------------------------------------------------------------------
// WindowConfig: fully resolved window configuration
// ---------------------------------------------------------------------------

/// Event-time window geometry shared by the time-KPI and country-KPI
/// pipelines. `slide == size` gives tumbling windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub size: HumanDuration,
    pub slide: HumanDuration,
    pub allowed_lateness: HumanDuration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        let minute = HumanDuration::from(Duration::from_secs(60));
        Self {
            size: minute,
            slide: minute,
            allowed_lateness: minute,
        }
    }
}

impl WindowConfig {
    pub fn is_tumbling(&self) -> bool {
        self.size == self.slide
    }
}

impl WindowSection {
    /// Fill unset fields. An omitted `slide` follows `size`.
    pub(crate) fn resolve(self) -> WindowConfig {
        let defaults = WindowConfig::default();
        let size = self.size.unwrap_or(defaults.size);
        WindowConfig {
            size,
            slide: self.slide.unwrap_or(size),
            allowed_lateness: self.allowed_lateness.unwrap_or(defaults.allowed_lateness),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_section_is_one_minute_tumbling() {
        let wc = WindowSection::default().resolve();
        assert_eq!(wc, WindowConfig::default());
        assert!(wc.is_tumbling());
        assert_eq!(wc.allowed_lateness.as_millis_i64(), 60_000);
    }

    #[test]
    fn slide_follows_size_when_omitted() {
        let sec = WindowSection {
            size: Some("5m".parse().unwrap()),
            slide: None,
            allowed_lateness: None,
        };
        let wc = sec.resolve();
        assert_eq!(wc.slide, "5m".parse::<HumanDuration>().unwrap());
        assert!(wc.is_tumbling());
    }

    #[test]
    fn explicit_slide_makes_sliding() {
        let sec = WindowSection {
            size: Some("10m".parse().unwrap()),
            slide: Some("5m".parse().unwrap()),
            allowed_lateness: Some("30s".parse().unwrap()),
        };
        let wc = sec.resolve();
        assert!(!wc.is_tumbling());
        assert_eq!(wc.allowed_lateness.as_millis_i64(), 30_000);
    }
}

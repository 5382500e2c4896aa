use rk_config::WindowConfig;
use serde::{Deserialize, Serialize};

/// Window geometry in epoch milliseconds. `slide == size` is tumbling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub size_ms: i64,
    pub slide_ms: i64,
}

impl WindowSpec {
    pub fn tumbling(size_ms: i64) -> Self {
        Self {
            size_ms,
            slide_ms: size_ms,
        }
    }

    pub fn sliding(size_ms: i64, slide_ms: i64) -> Self {
        Self { size_ms, slide_ms }
    }

    pub fn from_config(config: &WindowConfig) -> Self {
        Self::sliding(config.size.as_millis_i64(), config.slide.as_millis_i64())
    }

    pub fn is_tumbling(&self) -> bool {
        self.size_ms == self.slide_ms
    }

    /// Every `[start, end)` containing `ts_ms`, in ascending start order.
    ///
    /// Starts are aligned to multiples of `slide_ms` from the epoch; negative
    /// timestamps floor towards negative infinity.
    pub fn windows_for(&self, ts_ms: i64) -> Vec<(i64, i64)> {
        let last_start = ts_ms.div_euclid(self.slide_ms) * self.slide_ms;
        let mut out = Vec::with_capacity((self.size_ms / self.slide_ms).max(1) as usize);
        let mut start = last_start;
        while start > ts_ms - self.size_ms {
            out.push((start, start + self.size_ms));
            start -= self.slide_ms;
        }
        out.reverse();
        out
    }

    /// Whether `[start, end)` is a window this geometry can produce.
    pub fn is_aligned(&self, start: i64, end: i64) -> bool {
        end - start == self.size_ms && start.rem_euclid(self.slide_ms) == 0
    }
}

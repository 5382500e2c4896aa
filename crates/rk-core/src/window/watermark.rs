/// Event-time watermark of one windowed pipeline, in epoch milliseconds.
///
/// Timestamps observed during a micro-batch only become visible through
/// [`finalize`](Self::finalize) at the batch boundary, so lateness checks made
/// while the batch is being read always use the previous batch's watermark.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    current: i64,
    allowed_lateness_ms: i64,
    pending_max: Option<i64>,
}

impl WatermarkTracker {
    pub fn new(allowed_lateness_ms: i64) -> Self {
        Self {
            current: i64::MIN,
            allowed_lateness_ms,
            pending_max: None,
        }
    }

    /// Fold an event timestamp into the pending batch maximum.
    pub fn observe(&mut self, ts_ms: i64) {
        self.pending_max = Some(self.pending_max.map_or(ts_ms, |m| m.max(ts_ms)));
    }

    /// Publish `max(current, batch_max - allowed_lateness)` and reset the
    /// pending maximum. Returns the published watermark.
    pub fn finalize(&mut self) -> i64 {
        if let Some(max) = self.pending_max.take() {
            let candidate = max.saturating_sub(self.allowed_lateness_ms);
            self.current = self.current.max(candidate);
        }
        self.current
    }

    /// The last published watermark (`i64::MIN` before the first event).
    pub fn current(&self) -> i64 {
        self.current
    }

    /// `None` until a watermark has been published.
    pub fn published(&self) -> Option<i64> {
        (self.current != i64::MIN).then_some(self.current)
    }

    /// Restore from a checkpoint. Never lowers the watermark.
    pub fn restore(&mut self, watermark: i64) {
        self.current = self.current.max(watermark);
        self.pending_max = None;
    }
}

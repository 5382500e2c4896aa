use rk_config::WindowConfig;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::event::EnrichedEvent;

use super::aggregate::{Grouping, WindowAggregate, WindowId};
use super::assign::WindowSpec;
use super::manager::{AssignOutcome, OpenWindow, WindowManager};
use super::watermark::WatermarkTracker;

/// Everything a windowed pipeline needs to resume: watermark, open windows
/// and tombstones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub watermark: i64,
    pub open: Vec<OpenWindow>,
    pub tombstones: Vec<WindowId>,
}

/// What one micro-batch did to the window state.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Windows closed by this batch, in emission order.
    pub emitted: Vec<WindowAggregate>,
    pub accepted: usize,
    pub late_dropped: usize,
    /// Watermark published at the end of the batch.
    pub watermark: Option<i64>,
}

// ---------------------------------------------------------------------------
// KpiAggregation
// ---------------------------------------------------------------------------

/// Window state of one windowed pipeline: its watermark tracker and window
/// manager. Owned by the pipeline task, never shared.
#[derive(Debug, Clone)]
pub struct KpiAggregation {
    tracker: WatermarkTracker,
    manager: WindowManager,
}

impl KpiAggregation {
    pub fn new(spec: WindowSpec, grouping: Grouping, allowed_lateness_ms: i64) -> Self {
        Self {
            tracker: WatermarkTracker::new(allowed_lateness_ms),
            manager: WindowManager::new(spec, grouping, allowed_lateness_ms),
        }
    }

    pub fn from_config(config: &WindowConfig, grouping: Grouping) -> Self {
        Self::new(
            WindowSpec::from_config(config),
            grouping,
            config.allowed_lateness.as_millis_i64(),
        )
    }

    /// Run one micro-batch.
    ///
    /// Lateness is judged against the watermark published by the previous
    /// batch; the watermark is then advanced over the whole batch and every
    /// window it passes is closed.
    pub fn run_batch<'a, I>(&mut self, events: I) -> BatchOutcome
    where
        I: IntoIterator<Item = &'a EnrichedEvent>,
    {
        let arrival_wm = self.tracker.current();
        let mut outcome = BatchOutcome::default();

        for ev in events {
            self.tracker.observe(ev.event_time_ms());
            match self.manager.assign(ev, arrival_wm) {
                AssignOutcome::Accepted(_) => outcome.accepted += 1,
                AssignOutcome::DroppedLate => outcome.late_dropped += 1,
            }
        }

        let wm = self.tracker.finalize();
        outcome.emitted = self.manager.advance(wm);
        outcome.watermark = self.tracker.published();
        outcome
    }

    pub fn watermark(&self) -> Option<i64> {
        self.tracker.published()
    }

    pub fn open_windows(&self) -> usize {
        self.manager.open_count()
    }

    pub fn tombstones(&self) -> usize {
        self.manager.tombstone_count()
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let (open, tombstones) = self.manager.snapshot();
        WindowSnapshot {
            watermark: self.tracker.current(),
            open,
            tombstones,
        }
    }

    /// Load checkpointed state. The watermark never moves backwards.
    pub fn restore(&mut self, snapshot: WindowSnapshot) -> CoreResult<()> {
        let watermark = self.tracker.current().max(snapshot.watermark);
        self.manager
            .restore(snapshot.open, snapshot.tombstones, watermark)?;
        self.tracker.restore(watermark);
        Ok(())
    }
}

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CoreReason, CoreResult, core_err};
use crate::event::EnrichedEvent;

use super::aggregate::{AggState, Grouping, WindowAggregate, WindowId};
use super::assign::WindowSpec;

/// Result of assigning one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    /// Folded into this many open windows.
    Accepted(usize),
    /// Every candidate window was already closed.
    DroppedLate,
}

/// An open window and its running state, as persisted in a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenWindow {
    pub id: WindowId,
    pub state: AggState,
}

// ---------------------------------------------------------------------------
// WindowManager
// ---------------------------------------------------------------------------

/// Open windows of one grouping, keyed and ordered by [`WindowId`].
///
/// Lifecycle: OPEN → CLOSED (aggregate emitted, tombstone kept) → RELEASED
/// once the watermark reaches `window_end + allowed_lateness`. A tombstoned
/// window never reopens.
#[derive(Debug, Clone)]
pub struct WindowManager {
    spec: WindowSpec,
    grouping: Grouping,
    allowed_lateness_ms: i64,
    open: BTreeMap<WindowId, AggState>,
    tombstones: BTreeSet<WindowId>,
}

impl WindowManager {
    pub fn new(spec: WindowSpec, grouping: Grouping, allowed_lateness_ms: i64) -> Self {
        Self {
            spec,
            grouping,
            allowed_lateness_ms,
            open: BTreeMap::new(),
            tombstones: BTreeSet::new(),
        }
    }

    /// Fold `ev` into every window that contains it and is still open as of
    /// `arrival_watermark`.
    pub fn assign(&mut self, ev: &EnrichedEvent, arrival_watermark: i64) -> AssignOutcome {
        let key = self.grouping.key_for(ev);
        let mut accepted = 0;
        for (start, end) in self.spec.windows_for(ev.event_time_ms()) {
            if end <= arrival_watermark {
                continue;
            }
            let id = WindowId {
                end,
                start,
                key: key.clone(),
            };
            if self.tombstones.contains(&id) {
                continue;
            }
            self.open.entry(id).or_default().add(ev);
            accepted += 1;
        }
        if accepted == 0 {
            AssignOutcome::DroppedLate
        } else {
            AssignOutcome::Accepted(accepted)
        }
    }

    /// Close every window with `window_end <= watermark`, in
    /// `(window_end, window_start, group_key)` order, then release tombstones
    /// the watermark has moved past.
    pub fn advance(&mut self, watermark: i64) -> Vec<WindowAggregate> {
        let mut emitted = Vec::new();
        while let Some(entry) = self.open.first_entry() {
            if entry.key().end > watermark {
                break;
            }
            let (id, state) = entry.remove_entry();
            emitted.push(state.finish(&id));
            self.tombstones.insert(id);
        }

        while let Some(first) = self.tombstones.first() {
            if first.end.saturating_add(self.allowed_lateness_ms) > watermark {
                break;
            }
            self.tombstones.pop_first();
        }
        emitted
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Open windows and tombstones in id order.
    pub fn snapshot(&self) -> (Vec<OpenWindow>, Vec<WindowId>) {
        let open = self
            .open
            .iter()
            .map(|(id, state)| OpenWindow {
                id: id.clone(),
                state: state.clone(),
            })
            .collect();
        let tombstones = self.tombstones.iter().cloned().collect();
        (open, tombstones)
    }

    /// Replace all window state. Rejects windows that do not belong to this
    /// grouping or geometry, and open windows already closed by `watermark`.
    pub fn restore(
        &mut self,
        open: Vec<OpenWindow>,
        tombstones: Vec<WindowId>,
        watermark: i64,
    ) -> CoreResult<()> {
        let mut restored = BTreeMap::new();
        for ow in open {
            self.check_restored(&ow.id)?;
            if ow.id.end <= watermark {
                return Err(core_err(
                    CoreReason::WindowState,
                    format!(
                        "open window [{}, {}) already closed by watermark {watermark}",
                        ow.id.start, ow.id.end
                    ),
                ));
            }
            if restored.insert(ow.id.clone(), ow.state).is_some() {
                return Err(core_err(
                    CoreReason::WindowState,
                    format!("duplicate open window [{}, {})", ow.id.start, ow.id.end),
                ));
            }
        }
        let mut dead = BTreeSet::new();
        for id in tombstones {
            self.check_restored(&id)?;
            dead.insert(id);
        }
        self.open = restored;
        self.tombstones = dead;
        Ok(())
    }

    fn check_restored(&self, id: &WindowId) -> CoreResult<()> {
        if !self.grouping.accepts(&id.key) {
            return Err(core_err(
                CoreReason::WindowState,
                format!("window key {:?} does not match grouping {:?}", id.key, self.grouping),
            ));
        }
        if !self.spec.is_aligned(id.start, id.end) {
            return Err(core_err(
                CoreReason::WindowState,
                format!(
                    "window [{}, {}) does not match size {}ms / slide {}ms",
                    id.start, id.end, self.spec.size_ms, self.spec.slide_ms
                ),
            ));
        }
        Ok(())
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use orion_error::compat_prelude::*;
use orion_error::prelude::*;
use tokio::sync::Mutex;

use crate::error::{CoreReason, CoreResult, core_err};
use crate::window::WindowSnapshot;

use super::record::{BatchPlan, CheckpointRecord, decode_record, encode_record};
use super::store::CheckpointStore;

/// What a successful batch commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitProgress {
    pub batch_id: u64,
    pub committed_offset: Option<u64>,
}

struct Slot {
    store: Arc<dyn CheckpointStore>,
    /// Last record durably written (or recovered) for this sink.
    last: Mutex<CheckpointRecord>,
}

// ---------------------------------------------------------------------------
// CheckpointCoordinator
// ---------------------------------------------------------------------------

/// Plans, commits and recovers per-sink checkpoints.
///
/// Each sink has its own store and its own slot lock; sinks never contend
/// with each other. The slot lock is held across the store write, and the
/// cached record only changes after the store accepted the new bytes.
#[derive(Default)]
pub struct CheckpointCoordinator {
    slots: HashMap<String, Slot>,
}

impl CheckpointCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a store to `sink_id`. Registration happens before any pipeline
    /// runs.
    pub fn register(
        &mut self,
        sink_id: impl Into<String>,
        store: Arc<dyn CheckpointStore>,
    ) -> CoreResult<()> {
        let sink_id = sink_id.into();
        if self.slots.contains_key(&sink_id) {
            return Err(core_err(
                CoreReason::Checkpoint,
                format!("checkpoint slot {sink_id:?} registered twice"),
            ));
        }
        let last = Mutex::new(CheckpointRecord::fresh(sink_id.clone()));
        self.slots.insert(sink_id, Slot { store, last });
        Ok(())
    }

    /// Load the last committed state for `sink_id`, or a fresh record when
    /// nothing was stored yet.
    pub async fn recover(&self, sink_id: &str) -> CoreResult<CheckpointRecord> {
        let slot = self.slot(sink_id)?;
        let mut last = slot.last.lock().await;
        let record = match slot.store.get(sink_id).await.owe(CoreReason::Checkpoint)? {
            Some(bytes) => decode_record(&bytes).map_err(|e| {
                core_err(
                    CoreReason::Checkpoint,
                    format!("recover {sink_id:?}: {e}"),
                )
            })?,
            None => CheckpointRecord::fresh(sink_id),
        };
        if record.sink_id != sink_id {
            return Err(core_err(
                CoreReason::Checkpoint,
                format!(
                    "checkpoint for {sink_id:?} belongs to {:?}",
                    record.sink_id
                ),
            ));
        }
        *last = record.clone();
        Ok(record)
    }

    /// Persist the boundary of the next batch before it is processed.
    ///
    /// Re-planning the pending plan is a no-op; planning a different batch
    /// while one is pending is an error.
    pub async fn plan(&self, sink_id: &str, plan: BatchPlan) -> CoreResult<()> {
        let slot = self.slot(sink_id)?;
        let mut last = slot.last.lock().await;
        if let Some(pending) = last.planned {
            if pending == plan {
                return Ok(());
            }
            return Err(core_err(
                CoreReason::Checkpoint,
                format!("{sink_id:?}: batch {} is still pending", pending.batch_id),
            ));
        }
        if plan.batch_id != last.batch_id + 1 {
            return Err(core_err(
                CoreReason::Checkpoint,
                format!(
                    "{sink_id:?}: planned batch {} does not follow committed batch {}",
                    plan.batch_id, last.batch_id
                ),
            ));
        }
        if last.committed_offset.is_some_and(|c| plan.end_offset <= c) {
            return Err(core_err(
                CoreReason::Checkpoint,
                format!(
                    "{sink_id:?}: planned end offset {} is not past committed offset {:?}",
                    plan.end_offset, last.committed_offset
                ),
            ));
        }

        let mut next = last.clone();
        next.planned = Some(plan);
        Self::write(slot, sink_id, &next).await?;
        *last = next;
        Ok(())
    }

    /// Atomically record progress and window state, clearing the plan.
    pub async fn commit(
        &self,
        sink_id: &str,
        progress: CommitProgress,
        window_state: Option<WindowSnapshot>,
    ) -> CoreResult<CheckpointRecord> {
        let slot = self.slot(sink_id)?;
        let mut last = slot.last.lock().await;
        if progress.batch_id != last.batch_id + 1 {
            return Err(core_err(
                CoreReason::Checkpoint,
                format!(
                    "{sink_id:?}: commit of batch {} does not follow committed batch {}",
                    progress.batch_id, last.batch_id
                ),
            ));
        }
        if let Some(plan) = last.planned
            && (plan.batch_id != progress.batch_id
                || progress.committed_offset != Some(plan.end_offset))
        {
            return Err(core_err(
                CoreReason::Checkpoint,
                format!(
                    "{sink_id:?}: commit {progress:?} does not match pending plan {plan:?}"
                ),
            ));
        }
        if progress.committed_offset < last.committed_offset {
            return Err(core_err(
                CoreReason::Checkpoint,
                format!(
                    "{sink_id:?}: committed offset would regress from {:?} to {:?}",
                    last.committed_offset, progress.committed_offset
                ),
            ));
        }

        let next = CheckpointRecord {
            sink_id: sink_id.to_string(),
            batch_id: progress.batch_id,
            committed_offset: progress.committed_offset,
            window_state,
            planned: None,
        };
        Self::write(slot, sink_id, &next).await?;
        log::debug!(
            "checkpoint committed: sink={sink_id} batch={} offset={:?}",
            next.batch_id,
            next.committed_offset
        );
        *last = next.clone();
        Ok(next)
    }

    /// Last record known to be durable for `sink_id`.
    pub async fn last_committed(&self, sink_id: &str) -> Option<CheckpointRecord> {
        let slot = self.slots.get(sink_id)?;
        Some(slot.last.lock().await.clone())
    }

    fn slot(&self, sink_id: &str) -> CoreResult<&Slot> {
        self.slots.get(sink_id).ok_or_else(|| {
            core_err(
                CoreReason::Checkpoint,
                format!("no checkpoint store registered for {sink_id:?}"),
            )
        })
    }

    async fn write(slot: &Slot, sink_id: &str, record: &CheckpointRecord) -> CoreResult<()> {
        let bytes = encode_record(record)?;
        slot.store.put(sink_id, &bytes).await.owe(CoreReason::Checkpoint)
    }
}

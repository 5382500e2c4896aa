//! Per-pipeline health and progress, shared by the ingest task, the pipeline
//! tasks and the `/status` endpoint.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rk_core::checkpoint::CheckpointRecord;
use rk_core::output::PipelineId;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineHealth {
    Running,
    /// Sink writes keep failing; the planned batch is retried on the next
    /// trigger.
    Degraded,
    /// A checkpoint could not be committed. Needs a restart.
    Halted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub pipeline: &'static str,
    pub health: PipelineHealth,
    /// Last committed batch.
    pub batch_id: u64,
    pub committed_offset: Option<u64>,
    /// Batch planned but not committed yet.
    pub pending_batch: Option<u64>,
    pub watermark: Option<String>,
    pub open_windows: usize,
    pub rows_emitted: u64,
    pub late_dropped: u64,
    /// Offsets ingested but not committed by this pipeline. Filled in by
    /// [`StatusBoard::snapshot`].
    pub lag: Option<u64>,
    pub last_error: Option<String>,
    /// The pipeline can re-read evicted offsets from the source, so it only
    /// holds feed eviction while running.
    #[serde(skip)]
    pub can_replay: bool,
}

impl PipelineStatus {
    /// Whether feed eviction has to wait for this pipeline's commits.
    fn holds_eviction(&self) -> bool {
        match self.health {
            PipelineHealth::Running => true,
            PipelineHealth::Degraded => !self.can_replay,
            PipelineHealth::Halted => false,
        }
    }

    fn recovered(id: PipelineId, record: &CheckpointRecord) -> Self {
        Self {
            pipeline: id.as_str(),
            health: PipelineHealth::Running,
            batch_id: record.batch_id,
            committed_offset: record.committed_offset,
            pending_batch: record.planned.map(|p| p.batch_id),
            watermark: None,
            open_windows: record.window_state.as_ref().map_or(0, |w| w.open.len()),
            rows_emitted: 0,
            late_dropped: 0,
            lag: None,
            last_error: None,
            can_replay: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestStatus {
    pub source: String,
    pub connected: bool,
    pub records_read: u64,
    pub decode_errors: u64,
    /// Highest offset published to the feed.
    pub high_offset: Option<u64>,
    /// Offset last committed back to the source.
    pub source_committed: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub ingest: IngestStatus,
    pub pipelines: Vec<PipelineStatus>,
}

/// Shared status registry. Writers hold the lock only to copy a few fields.
pub struct StatusBoard {
    pipelines: RwLock<BTreeMap<PipelineId, PipelineStatus>>,
    ingest: RwLock<IngestStatus>,
}

impl StatusBoard {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            pipelines: RwLock::new(BTreeMap::new()),
            ingest: RwLock::new(IngestStatus {
                source: source.into(),
                connected: false,
                records_read: 0,
                decode_errors: 0,
                high_offset: None,
                source_committed: None,
            }),
        }
    }

    /// Seed a pipeline's entry from its recovered checkpoint.
    pub fn register(&self, id: PipelineId, record: &CheckpointRecord) {
        write(&self.pipelines).insert(id, PipelineStatus::recovered(id, record));
    }

    pub fn update_pipeline(&self, id: PipelineId, f: impl FnOnce(&mut PipelineStatus)) {
        if let Some(status) = write(&self.pipelines).get_mut(&id) {
            f(status);
        }
    }

    pub fn update_ingest(&self, f: impl FnOnce(&mut IngestStatus)) {
        f(&mut write(&self.ingest));
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<PipelineStatus> {
        read(&self.pipelines).get(&id).cloned()
    }

    pub fn ingest(&self) -> IngestStatus {
        read(&self.ingest).clone()
    }

    /// Highest offset every registered pipeline has committed, i.e. what the
    /// source may be told is consumed. `None` while any pipeline has not
    /// committed anything.
    pub fn min_committed(&self) -> Option<u64> {
        let pipelines = read(&self.pipelines);
        if pipelines.is_empty() {
            return None;
        }
        pipelines
            .values()
            .map(|s| s.committed_offset)
            .min()
            .flatten()
    }

    /// Offset the feed may evict through: the lowest commit among pipelines
    /// still reading from the feed. Degraded pipelines with a replay handle
    /// and halted ones do not count. `None` while a counted pipeline has not
    /// committed, or when no pipeline counts.
    pub fn eviction_floor(&self) -> Option<u64> {
        let pipelines = read(&self.pipelines);
        let mut holders = pipelines.values().filter(|s| s.holds_eviction()).peekable();
        holders.peek()?;
        holders.map(|s| s.committed_offset).min().flatten()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let ingest = self.ingest();
        let pipelines = read(&self.pipelines)
            .values()
            .cloned()
            .map(|mut s| {
                s.lag = ingest.high_offset.map(|high| match s.committed_offset {
                    Some(c) => high.saturating_sub(c),
                    None => high + 1,
                });
                s
            })
            .collect();
        StatusSnapshot { ingest, pipelines }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rk_core::checkpoint::BatchPlan;

    fn record(id: PipelineId, batch_id: u64, committed: Option<u64>) -> CheckpointRecord {
        CheckpointRecord {
            batch_id,
            committed_offset: committed,
            ..CheckpointRecord::fresh(id.as_str())
        }
    }

    #[test]
    fn min_committed_waits_for_every_pipeline() {
        let board = StatusBoard::new("memory");
        assert_eq!(board.min_committed(), None);

        board.register(PipelineId::Raw, &record(PipelineId::Raw, 3, Some(40)));
        board.register(PipelineId::TimeKpi, &record(PipelineId::TimeKpi, 0, None));
        assert_eq!(board.min_committed(), None);

        board.update_pipeline(PipelineId::TimeKpi, |s| s.committed_offset = Some(12));
        assert_eq!(board.min_committed(), Some(12));
    }

    #[test]
    fn eviction_floor_skips_stalled_pipelines() {
        let board = StatusBoard::new("memory");
        board.register(PipelineId::Raw, &record(PipelineId::Raw, 5, Some(40)));
        board.register(PipelineId::TimeKpi, &record(PipelineId::TimeKpi, 1, Some(7)));
        board.register(PipelineId::CountryKpi, &record(PipelineId::CountryKpi, 2, Some(9)));
        assert_eq!(board.eviction_floor(), Some(7));

        // Degraded without a way to re-read still pins the feed.
        board.update_pipeline(PipelineId::TimeKpi, |s| s.health = PipelineHealth::Degraded);
        assert_eq!(board.eviction_floor(), Some(7));

        board.update_pipeline(PipelineId::TimeKpi, |s| s.can_replay = true);
        assert_eq!(board.eviction_floor(), Some(9));
        assert_eq!(board.min_committed(), Some(7));

        board.update_pipeline(PipelineId::CountryKpi, |s| s.health = PipelineHealth::Halted);
        assert_eq!(board.eviction_floor(), Some(40));

        board.update_pipeline(PipelineId::Raw, |s| s.health = PipelineHealth::Halted);
        assert_eq!(board.eviction_floor(), None);
    }

    #[test]
    fn recovered_entry_reports_pending_plan() {
        let board = StatusBoard::new("memory");
        let mut rec = record(PipelineId::CountryKpi, 2, Some(9));
        rec.planned = Some(BatchPlan {
            batch_id: 3,
            end_offset: 15,
        });
        board.register(PipelineId::CountryKpi, &rec);
        let status = board.pipeline(PipelineId::CountryKpi).unwrap();
        assert_eq!(status.pending_batch, Some(3));
        assert_eq!(status.health, PipelineHealth::Running);
        assert_eq!(status.pipeline, "country_kpi");
    }

    #[test]
    fn snapshot_computes_lag_from_high_offset() {
        let board = StatusBoard::new("memory");
        board.register(PipelineId::Raw, &record(PipelineId::Raw, 1, Some(4)));
        board.register(PipelineId::TimeKpi, &record(PipelineId::TimeKpi, 0, None));
        board.update_ingest(|i| i.high_offset = Some(9));

        let snap = board.snapshot();
        let lags: Vec<_> = snap.pipelines.iter().map(|p| (p.pipeline, p.lag)).collect();
        assert_eq!(lags, vec![("raw", Some(5)), ("time_kpi", Some(10))]);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["pipelines"][0]["health"], "running");
        assert_eq!(json["ingest"]["high_offset"], 9);
    }
}

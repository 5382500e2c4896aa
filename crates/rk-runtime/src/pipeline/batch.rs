use std::fmt::Display;
use std::time::Instant;

use orion_error::prelude::*;
use rk_config::WindowConfig;
use rk_core::checkpoint::{BatchPlan, CheckpointRecord, CommitProgress};
use rk_core::error::{CoreError, CoreResult};
use rk_core::event::time::format_millis;
use rk_core::feed::FeedRead;
use rk_core::output::{OutputRow, PipelineId};
use rk_core::window::KpiAggregation;

use crate::error::RuntimeResult;
use crate::retry::retry_with_backoff;
use crate::source::SourceError;
use crate::status::PipelineHealth;

use super::{PipelineContext, ReplayReader};

/// What one trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerOutcome {
    /// Nothing new in the feed.
    Idle,
    /// A planned batch is not fully in the feed yet.
    Waiting,
    Committed { batch_id: u64, rows: usize },
    /// Sink writes or a source re-read failed; the plan is kept and retried
    /// next trigger.
    Degraded,
    /// A checkpoint could not be written. No further batches run.
    Halted,
}

struct BatchRows {
    rows: Vec<OutputRow>,
    late_dropped: usize,
}

/// One output pipeline: committed progress plus window state.
///
/// Each batch is processed on a copy of the window state that only replaces
/// the live state after the checkpoint commit, so a failed write or commit
/// leaves the pipeline exactly at its last committed batch.
pub(crate) struct PipelineTask {
    id: PipelineId,
    ctx: PipelineContext,
    /// Last durable checkpoint, including a pending plan.
    last: CheckpointRecord,
    window: Option<KpiAggregation>,
    /// Source handle for ranges the feed evicted while this pipeline lagged.
    replay: Option<ReplayReader>,
    halted: bool,
}

impl PipelineTask {
    /// Rebuild the pipeline from its last committed checkpoint.
    pub async fn recover(
        id: PipelineId,
        ctx: PipelineContext,
        window_config: &WindowConfig,
        replay: Option<ReplayReader>,
    ) -> RuntimeResult<Self> {
        let last = ctx.coordinator.recover(id.as_str()).await.err_conv()?;
        let window = match id.grouping() {
            Some(grouping) => {
                let mut agg = KpiAggregation::from_config(window_config, grouping);
                if let Some(snapshot) = last.window_state.clone() {
                    agg.restore(snapshot).err_conv()?;
                }
                Some(agg)
            }
            None => None,
        };

        ctx.status.register(id, &last);
        let watermark = window.as_ref().and_then(KpiAggregation::watermark);
        let can_replay = replay.is_some();
        ctx.status.update_pipeline(id, |s| {
            s.watermark = watermark.map(format_millis);
            s.can_replay = can_replay;
        });
        rk_info!(
            pipe,
            pipeline = %id,
            batch_id = last.batch_id,
            committed_offset = ?last.committed_offset,
            pending = ?last.planned,
            can_replay,
            "pipeline recovered"
        );

        Ok(Self {
            id,
            ctx,
            last,
            window,
            replay,
            halted: false,
        })
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// Run one micro-batch: plan, process, write, commit.
    pub async fn run_trigger(&mut self) -> TriggerOutcome {
        if self.halted {
            return TriggerOutcome::Halted;
        }
        let committed = self.last.committed_offset;

        let (plan, read) = match self.last.planned {
            Some(plan) => {
                let read = self
                    .ctx
                    .feed
                    .read_after(committed, Some(plan.end_offset))
                    .await;
                if !read.gap && read.covered_through != Some(plan.end_offset) {
                    rk_debug!(
                        pipe,
                        pipeline = %self.id,
                        batch_id = plan.batch_id,
                        end_offset = plan.end_offset,
                        "feed behind planned batch"
                    );
                    return TriggerOutcome::Waiting;
                }
                (plan, read)
            }
            None => {
                let read = self.ctx.feed.read_after(committed, None).await;
                let end_offset = if read.gap {
                    match read.covered_through {
                        Some(end) => Some(end),
                        None => self.ctx.feed.high_offset().await,
                    }
                } else {
                    read.covered_through.filter(|_| read.has_progress())
                };
                let Some(end_offset) = end_offset else {
                    return TriggerOutcome::Idle;
                };
                let plan = BatchPlan {
                    batch_id: self.last.batch_id + 1,
                    end_offset,
                };
                if let Err(e) = self.ctx.coordinator.plan(self.id.as_str(), plan).await {
                    return self.halt("plan", e).await;
                }
                self.last.planned = Some(plan);
                self.ctx
                    .status
                    .update_pipeline(self.id, |s| s.pending_batch = Some(plan.batch_id));
                (plan, read)
            }
        };

        let read = if read.gap {
            match self.catch_up(committed, plan).await {
                Ok(read) => read,
                Err(e) => return self.degrade(plan, "replay", e).await,
            }
        } else {
            read
        };

        let started = Instant::now();
        let mut next_window = self.window.clone();
        let batch = match build_rows(&read, next_window.as_mut()) {
            Ok(batch) => batch,
            Err(e) => return self.halt("serialise", e).await,
        };

        if let Err(e) = self.write_rows(&batch.rows).await {
            if let Some(metrics) = &self.ctx.metrics {
                metrics.inc_sink_failure(self.id);
            }
            return self.degrade(plan, "sink", e).await;
        }

        let progress = CommitProgress {
            batch_id: plan.batch_id,
            committed_offset: Some(plan.end_offset),
        };
        let snapshot = next_window.as_ref().map(KpiAggregation::snapshot);
        match self
            .ctx
            .coordinator
            .commit(self.id.as_str(), progress, snapshot)
            .await
        {
            Ok(record) => self.last = record,
            Err(e) => return self.halt("commit", e).await,
        }
        self.window = next_window;

        self.publish_progress(&batch);
        self.evict_consumed().await;
        if let Some(metrics) = &self.ctx.metrics {
            metrics.add_pipeline_batch(self.id, batch.rows.len(), batch.late_dropped);
            metrics.observe_pipeline_batch(self.id, started.elapsed());
        }
        rk_debug!(
            pipe,
            pipeline = %self.id,
            batch_id = plan.batch_id,
            end_offset = plan.end_offset,
            rows = batch.rows.len(),
            late = batch.late_dropped,
            "batch committed"
        );
        TriggerOutcome::Committed {
            batch_id: plan.batch_id,
            rows: batch.rows.len(),
        }
    }

    /// Commit everything currently in the feed.
    pub async fn drain(&mut self) -> TriggerOutcome {
        loop {
            let outcome = self.run_trigger().await;
            if !matches!(outcome, TriggerOutcome::Committed { .. }) {
                return outcome;
            }
        }
    }

    /// Records for `plan` when the feed evicted part of it. Without a replay
    /// handle the remaining feed records are used and the rest is lost.
    async fn catch_up(
        &mut self,
        committed: Option<u64>,
        plan: BatchPlan,
    ) -> Result<FeedRead, SourceError> {
        if let Some(metrics) = &self.ctx.metrics {
            metrics.inc_cursor_gap(self.id);
        }
        let Some(replay) = self.replay.as_mut() else {
            rk_warn!(
                pipe,
                pipeline = %self.id,
                committed_offset = ?committed,
                "feed no longer holds every record after the committed offset"
            );
            return Ok(self
                .ctx
                .feed
                .read_after(committed, Some(plan.end_offset))
                .await);
        };
        rk_info!(
            pipe,
            pipeline = %self.id,
            batch_id = plan.batch_id,
            committed_offset = ?committed,
            end_offset = plan.end_offset,
            "feed evicted past the committed offset, re-reading from source"
        );
        replay.read(committed, plan.end_offset).await
    }

    async fn write_rows(&self, rows: &[OutputRow]) -> CoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let id = self.id;
        let dispatcher = &self.ctx.dispatcher;
        let metrics = self.ctx.metrics.as_deref();
        retry_with_backoff(
            &self.ctx.retry,
            || dispatcher.dispatch(id, rows),
            |retry, e, delay| {
                rk_warn!(
                    pipe,
                    pipeline = %id,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "sink write failed, backing off"
                );
                if let Some(metrics) = metrics {
                    metrics.inc_sink_retry(id);
                }
            },
        )
        .await
    }

    /// The batch stays planned. A degraded pipeline that can re-read from the
    /// source stops holding feed eviction.
    async fn degrade(
        &mut self,
        plan: BatchPlan,
        stage: &'static str,
        error: impl Display,
    ) -> TriggerOutcome {
        rk_error!(
            pipe,
            pipeline = %self.id,
            stage,
            batch_id = plan.batch_id,
            error = %error,
            "batch failed, stays planned"
        );
        let cause = format!("{stage}: {error}");
        self.ctx.status.update_pipeline(self.id, |s| {
            s.health = PipelineHealth::Degraded;
            s.last_error = Some(cause);
        });
        self.evict_consumed().await;
        TriggerOutcome::Degraded
    }

    async fn halt(&mut self, stage: &'static str, error: CoreError) -> TriggerOutcome {
        self.halted = true;
        rk_error!(
            pipe,
            pipeline = %self.id,
            stage,
            batch_id = self.last.batch_id,
            committed_offset = ?self.last.committed_offset,
            error = %error,
            "pipeline halted"
        );
        let cause = format!("{stage}: {error}");
        self.ctx.status.update_pipeline(self.id, |s| {
            s.health = PipelineHealth::Halted;
            s.last_error = Some(cause);
        });
        self.evict_consumed().await;
        TriggerOutcome::Halted
    }

    fn publish_progress(&self, batch: &BatchRows) {
        let watermark = self.window.as_ref().and_then(KpiAggregation::watermark);
        let open_windows = self.window.as_ref().map_or(0, KpiAggregation::open_windows);
        let last = &self.last;
        self.ctx.status.update_pipeline(self.id, |s| {
            s.health = PipelineHealth::Running;
            s.batch_id = last.batch_id;
            s.committed_offset = last.committed_offset;
            s.pending_batch = None;
            s.watermark = watermark.map(format_millis);
            s.open_windows = open_windows;
            s.rows_emitted += batch.rows.len() as u64;
            s.late_dropped += batch.late_dropped as u64;
            s.last_error = None;
        });
    }

    /// Drop feed batches every pipeline still reading the feed has committed.
    async fn evict_consumed(&self) {
        let Some(offset) = self.ctx.status.eviction_floor() else {
            return;
        };
        let evicted = self.ctx.feed.evict_through(offset).await;
        if evicted.batches > 0 {
            rk_debug!(
                res,
                through = offset,
                batches = evicted.batches,
                records = evicted.records,
                "feed batches evicted"
            );
            if let Some(metrics) = &self.ctx.metrics {
                metrics.add_feed_evicted(evicted);
            }
        }
    }
}

/// Rows for one batch. Windowed pipelines fold the batch into `window` and
/// emit the windows it closed; the raw pipeline projects every record.
fn build_rows(read: &FeedRead, window: Option<&mut KpiAggregation>) -> CoreResult<BatchRows> {
    match window {
        None => {
            let rows = read
                .records()
                .map(|r| OutputRow::raw(r.offset, &r.event))
                .collect::<CoreResult<Vec<_>>>()?;
            Ok(BatchRows {
                rows,
                late_dropped: 0,
            })
        }
        Some(agg) => {
            let outcome = agg.run_batch(read.records().map(|r| &r.event));
            let rows = outcome
                .emitted
                .iter()
                .map(OutputRow::window)
                .collect::<CoreResult<Vec<_>>>()?;
            Ok(BatchRows {
                rows,
                late_dropped: outcome.late_dropped,
            })
        }
    }
}

//! Output pipelines: one task per [`PipelineId`], each with its own trigger,
//! sink, checkpoint slot and window state.

mod batch;
mod replay;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use rk_config::{KpiConfig, RetryConfig, TriggerPolicy};
use rk_core::checkpoint::CheckpointCoordinator;
use rk_core::feed::SharedFeed;
use rk_core::output::PipelineId;
use rk_core::sink::SinkDispatcher;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::metrics::RuntimeMetrics;
use crate::status::StatusBoard;

pub(crate) use batch::{PipelineTask, TriggerOutcome};
pub(crate) use replay::ReplayReader;

/// Handles shared by every pipeline task.
#[derive(Clone)]
pub(crate) struct PipelineContext {
    pub feed: Arc<SharedFeed>,
    pub dispatcher: Arc<SinkDispatcher>,
    pub coordinator: Arc<CheckpointCoordinator>,
    pub status: Arc<StatusBoard>,
    pub metrics: Option<Arc<RuntimeMetrics>>,
    pub retry: RetryConfig,
}

/// When a pipeline's trigger fires.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TriggerSchedule {
    pub interval: Duration,
    pub policy: TriggerPolicy,
    pub drain_timeout: Duration,
}

impl TriggerSchedule {
    /// Shared `[trigger]` settings with the pipeline's own interval override.
    pub fn for_pipeline(config: &KpiConfig, id: PipelineId) -> Self {
        let interval = config
            .sinks
            .iter()
            .find(|(name, _)| *name == id.as_str())
            .and_then(|(_, sink)| sink.trigger_interval)
            .unwrap_or(config.trigger.interval);
        Self {
            interval: interval.as_duration(),
            policy: config.trigger.policy,
            drain_timeout: config.trigger.drain_timeout.as_duration(),
        }
    }
}

/// Run one pipeline until cancelled, then run a final drain bounded by the
/// drain timeout.
///
/// Triggers never overlap: a batch always runs to completion before the
/// next tick or the cancellation is looked at.
pub(crate) async fn run_pipeline_task(
    mut task: PipelineTask,
    schedule: TriggerSchedule,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let id = task.id();
    let mut tick = tokio::time::interval(schedule.interval);
    tick.set_missed_tick_behavior(match schedule.policy {
        TriggerPolicy::Queue => MissedTickBehavior::Burst,
        TriggerPolicy::Skip => MissedTickBehavior::Skip,
    });
    rk_info!(
        pipe,
        pipeline = %id,
        interval = ?schedule.interval,
        policy = ?schedule.policy,
        "pipeline started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                if task.run_trigger().await == TriggerOutcome::Halted {
                    // Stay parked so shutdown joins every pipeline the same way.
                    cancel.cancelled().await;
                    return Ok(());
                }
            }
        }
    }

    match tokio::time::timeout(schedule.drain_timeout, task.drain()).await {
        Ok(outcome) => rk_debug!(pipe, pipeline = %id, ?outcome, "final drain complete"),
        Err(_) => rk_warn!(
            pipe,
            pipeline = %id,
            timeout = ?schedule.drain_timeout,
            "final drain timed out, the planned batch is replayed on restart"
        ),
    }
    Ok(())
}

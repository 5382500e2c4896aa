use std::sync::Arc;

use orion_error::compat_prelude::*;
use orion_error::prelude::*;
use rk_config::KpiConfig;
use rk_core::feed::SharedFeed;
use rk_core::output::PipelineId;

use crate::error::{RuntimeReason, RuntimeResult};
use crate::metrics::maybe_build_metrics;
use crate::pipeline::{PipelineContext, PipelineTask, ReplayReader};
use crate::sink_build::{build_coordinator, build_sink_dispatcher};
use crate::source::Source;
use crate::status::StatusBoard;

use super::types::BootstrapData;

// ---------------------------------------------------------------------------
// Phase 1: open sinks, recover checkpoints, position the feed
// ---------------------------------------------------------------------------

/// Open every sink, recover every pipeline from its checkpoint and start the
/// feed after the lowest committed offset. `replay_handles` are matched to
/// [`PipelineId::ALL`] in order.
pub(super) async fn bootstrap(
    config: &KpiConfig,
    source: String,
    replay_handles: [Option<Box<dyn Source>>; PipelineId::ALL.len()],
) -> RuntimeResult<BootstrapData> {
    // 1. Sinks, one per pipeline
    let dispatcher = Arc::new(
        build_sink_dispatcher(&config.sinks)
            .await
            .owe(RuntimeReason::Bootstrap)?,
    );

    // 2. Checkpoint stores
    let coordinator = Arc::new(build_coordinator(&config.sinks)?);

    // 3. Shared state
    let feed = Arc::new(SharedFeed::new(config.source.feed_capacity));
    let status = Arc::new(StatusBoard::new(source));
    let metrics = maybe_build_metrics(&config.metrics);

    // 4. Recover pipelines; registers each one on the status board
    let ctx = PipelineContext {
        feed: Arc::clone(&feed),
        dispatcher: Arc::clone(&dispatcher),
        coordinator,
        status: Arc::clone(&status),
        metrics: metrics.clone(),
        retry: config.retry,
    };
    let mut pipelines = Vec::with_capacity(PipelineId::ALL.len());
    for (id, handle) in PipelineId::ALL.into_iter().zip(replay_handles) {
        let replay = handle.map(|h| ReplayReader::new(h, config.source.max_batch_size));
        pipelines.push(PipelineTask::recover(id, ctx.clone(), &config.window, replay).await?);
    }

    // 5. Everything at or below the slowest pipeline's commit is consumed
    let start_after = status.min_committed();
    feed.start_after(start_after).await.err_conv()?;
    rk_debug!(pipe, start_after = ?start_after, "feed positioned");

    Ok(BootstrapData {
        feed,
        dispatcher,
        status,
        metrics,
        pipelines,
    })
}

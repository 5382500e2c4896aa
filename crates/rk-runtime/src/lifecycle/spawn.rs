use std::net::SocketAddr;
use std::sync::Arc;

use orion_error::compat_prelude::*;
use rk_config::KpiConfig;
use rk_core::feed::SharedFeed;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeResult;
use crate::ingest_task::{IngestTask, run_ingest};
use crate::metrics::{RuntimeMetrics, run_metrics_task};
use crate::pipeline::{PipelineTask, TriggerSchedule, run_pipeline_task};
use crate::source::Source;
use crate::status::StatusBoard;

use super::types::TaskGroup;

// ---------------------------------------------------------------------------
// Phase 2: task spawn helpers
// ---------------------------------------------------------------------------

/// Bind the metrics listener and spawn the exporter.
/// Returns (listen_addr, task_group).
pub(super) async fn spawn_metrics_task(
    metrics: Arc<RuntimeMetrics>,
    config: &KpiConfig,
    status: &Arc<StatusBoard>,
    feed: &Arc<SharedFeed>,
    cancel: CancellationToken,
) -> RuntimeResult<(SocketAddr, TaskGroup)> {
    let listener = TcpListener::bind(&config.metrics.prometheus_listen)
        .await
        .owe_sys()?;
    let listen_addr = listener.local_addr().owe_sys()?;
    let mut group = TaskGroup::new("metrics");
    group.push(tokio::spawn(run_metrics_task(
        metrics,
        config.metrics.clone(),
        listener,
        Arc::clone(status),
        Arc::clone(feed),
        cancel,
    )));
    Ok((listen_addr, group))
}

/// Spawn one task per output pipeline, each on its own trigger.
pub(super) fn spawn_pipeline_tasks(
    pipelines: Vec<PipelineTask>,
    config: &KpiConfig,
    cancel: CancellationToken,
) -> TaskGroup {
    let mut group = TaskGroup::new("pipelines");
    for task in pipelines {
        let schedule = TriggerSchedule::for_pipeline(config, task.id());
        group.push(tokio::spawn(run_pipeline_task(
            task,
            schedule,
            cancel.child_token(),
        )));
    }
    group
}

/// Spawn the ingest loop. If it fails (the source stays unreachable past its
/// reconnect budget) the whole engine is cancelled.
pub(super) fn spawn_ingest_task(
    source: Box<dyn Source>,
    config: &KpiConfig,
    feed: &Arc<SharedFeed>,
    status: &Arc<StatusBoard>,
    metrics: Option<Arc<RuntimeMetrics>>,
    cancel: CancellationToken,
) -> TaskGroup {
    let task = IngestTask {
        source,
        feed: Arc::clone(feed),
        status: Arc::clone(status),
        metrics,
        config: config.source.clone(),
        cancel: cancel.child_token(),
    };
    let mut group = TaskGroup::new("ingest");
    group.push(tokio::spawn(async move {
        let result = run_ingest(task).await;
        if let Err(ref e) = result {
            rk_error!(sys, error = %e, "ingest failed, shutting the engine down");
            cancel.cancel();
        }
        result
    }));
    group
}

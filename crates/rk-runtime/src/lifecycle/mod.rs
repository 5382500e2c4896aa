mod bootstrap;
mod signal;
mod spawn;
mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use orion_error::op_context;
use orion_error::prelude::*;
use rk_config::KpiConfig;
use rk_core::output::PipelineId;
use rk_core::sink::SinkDispatcher;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeResult;
use crate::source::{FileSource, Source};
use crate::status::{StatusBoard, StatusSnapshot};

// Re-export public API
pub use signal::wait_for_signal;

use bootstrap::bootstrap;
use spawn::{spawn_ingest_task, spawn_metrics_task, spawn_pipeline_tasks};
use types::TaskGroup;

// ---------------------------------------------------------------------------
// Engine: the top-level lifecycle handle
// ---------------------------------------------------------------------------

/// Manages the full lifecycle of the KPI engine: bootstrap, run, and
/// graceful shutdown.
///
/// Task groups are stored in start order and joined in reverse (LIFO)
/// during [`wait`](Self::wait): ingest stops first, then every pipeline
/// runs a final drain and commit, then the sinks are stopped, and finally
/// the metrics exporter exits.
pub struct Engine {
    cancel: CancellationToken,
    /// Separate cancel token for pipeline tasks, triggered only after ingest
    /// has fully stopped so the final drain sees every published record.
    pipeline_cancel: CancellationToken,
    groups: Vec<TaskGroup>,
    dispatcher: Arc<SinkDispatcher>,
    status: Arc<StatusBoard>,
    metrics_addr: Option<SocketAddr>,
}

impl Engine {
    /// Bootstrap the engine reading the configured `[source]`.
    pub async fn start(config: KpiConfig) -> RuntimeResult<Self> {
        let source = Box::new(FileSource::new(&config.source.path));
        Self::start_with_source(config, source).await
    }

    /// Bootstrap the engine around an already constructed source.
    #[tracing::instrument(name = "engine.start", skip_all, fields(source = %source.describe()))]
    pub async fn start_with_source(
        config: KpiConfig,
        source: Box<dyn Source>,
    ) -> RuntimeResult<Self> {
        let mut op = op_context!("engine-bootstrap").with_auto_log();
        op.record("source", source.describe().as_str());
        op.record("window", config.window.size.to_string().as_str());

        let cancel = CancellationToken::new();
        let pipeline_cancel = CancellationToken::new();

        // Phase 1: sinks, checkpoints, recovered pipelines
        let replay_handles = PipelineId::ALL.map(|_| source.replay_handle());
        let data = bootstrap(&config, source.describe(), replay_handles).await?;
        rk_info!(
            sys,
            pipelines = data.pipelines.len(),
            start_after = ?data.status.min_committed(),
            "engine bootstrap complete"
        );

        // Phase 2: spawn task groups (start order: metrics → pipelines → ingest)
        let mut groups: Vec<TaskGroup> = Vec::with_capacity(3);

        let mut metrics_addr = None;
        if let Some(metrics) = &data.metrics {
            let (addr, group) = spawn_metrics_task(
                Arc::clone(metrics),
                &config,
                &data.status,
                &data.feed,
                cancel.child_token(),
            )
            .await?;
            rk_info!(sys, listen = %addr, "metrics endpoint listening");
            metrics_addr = Some(addr);
            groups.push(group);
        }

        groups.push(spawn_pipeline_tasks(
            data.pipelines,
            &config,
            pipeline_cancel.child_token(),
        ));

        groups.push(spawn_ingest_task(
            source,
            &config,
            &data.feed,
            &data.status,
            data.metrics.clone(),
            cancel.clone(),
        ));

        op.mark_suc();
        Ok(Self {
            cancel,
            pipeline_cancel,
            groups,
            dispatcher: data.dispatcher,
            status: data.status,
            metrics_addr,
        })
    }

    /// Current ingest and pipeline status.
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Address of the `/metrics` and `/status` endpoint, when enabled.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Request graceful shutdown of all tasks.
    pub fn shutdown(&self) {
        rk_info!(sys, "initiating graceful shutdown");
        self.cancel.cancel();
    }

    /// Wait for all task groups to complete after shutdown.
    ///
    /// Groups are joined in LIFO order: ingest → pipelines → metrics.
    ///
    /// Two-phase shutdown: ingest is joined first, so every record it read is
    /// in the feed. Only then are the pipelines cancelled so their final
    /// drain commits it. Sinks are stopped once no pipeline writes anymore.
    /// Every group is joined even if one fails; the first error is returned.
    pub async fn wait(mut self) -> RuntimeResult<()> {
        let mut first_err = None;
        while let Some(group) = self.groups.pop() {
            let name = group.name;
            if name == "metrics" {
                // The exporter only stops on the root token.
                self.cancel.cancel();
            }
            rk_debug!(sys, task_group = name, "waiting for task group to finish");
            match group.wait().await {
                Ok(()) => rk_debug!(sys, task_group = name, "task group finished"),
                Err(e) => {
                    rk_error!(sys, task_group = name, error = %e, "task group failed");
                    first_err.get_or_insert(e);
                }
            }

            match name {
                // Ingest fully stopped; the feed holds everything read.
                "ingest" => self.pipeline_cancel.cancel(),
                "pipelines" => self.dispatcher.stop_all().await,
                _ => {}
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Returns a clone of the root cancellation token (for signal integration).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

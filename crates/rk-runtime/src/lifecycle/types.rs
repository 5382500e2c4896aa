use std::sync::Arc;

use tokio::task::JoinHandle;

use orion_error::compat_prelude::*;
use orion_error::prelude::*;
use rk_core::feed::SharedFeed;
use rk_core::sink::SinkDispatcher;

use crate::error::{RuntimeReason, RuntimeResult};
use crate::metrics::RuntimeMetrics;
use crate::pipeline::PipelineTask;
use crate::status::StatusBoard;

// ---------------------------------------------------------------------------
// TaskGroup: named collection of async tasks for ordered shutdown
// ---------------------------------------------------------------------------

/// A named group of async tasks that are shut down together.
///
/// Groups are assembled in *start order* and joined in *reverse order*
/// (LIFO) during shutdown:
///
///   start:  metrics → pipelines → ingest
///   join:   ingest → pipelines → metrics
///
/// Ingest stops publishing before the pipelines drain, and the pipelines
/// finish their last commit before the status endpoint goes away.
pub(crate) struct TaskGroup {
    pub(super) name: &'static str,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

impl TaskGroup {
    pub(super) fn new(name: &'static str) -> Self {
        Self {
            name,
            handles: Vec::new(),
        }
    }

    pub(super) fn push(&mut self, handle: JoinHandle<anyhow::Result<()>>) {
        self.handles.push(handle);
    }

    /// Join all tasks in this group, returning the first error. Every task is
    /// joined even when an earlier one failed.
    pub(super) async fn wait(self) -> RuntimeResult<()> {
        let mut first_err = None;
        for handle in self.handles {
            let result = handle
                .await
                .map_err(|e| {
                    StructError::from(RuntimeReason::Shutdown)
                        .with_detail(format!("task join error: {e}"))
                })
                .and_then(|r| r.owe(RuntimeReason::Shutdown));
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

// ---------------------------------------------------------------------------
// BootstrapData: shared handles built before any task runs
// ---------------------------------------------------------------------------

pub(super) struct BootstrapData {
    pub feed: Arc<SharedFeed>,
    pub dispatcher: Arc<SinkDispatcher>,
    pub status: Arc<StatusBoard>,
    pub metrics: Option<Arc<RuntimeMetrics>>,
    /// Recovered from their checkpoints, in [`PipelineId::ALL`] order.
    ///
    /// [`PipelineId::ALL`]: rk_core::output::PipelineId::ALL
    pub pipelines: Vec<PipelineTask>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_joins_all_and_reports_first_error() {
        let mut group = TaskGroup::new("test");
        group.push(tokio::spawn(async { anyhow::bail!("first") }));
        let (tx, rx) = tokio::sync::oneshot::channel();
        group.push(tokio::spawn(async move {
            tx.send(()).ok();
            Ok(())
        }));
        group.push(tokio::spawn(async { anyhow::bail!("second") }));

        let err = group.wait().await.unwrap_err();
        let err = format!("{err:?}");
        assert!(err.contains("first"), "{err}");
        assert!(!err.contains("second"), "{err}");
        rx.await.unwrap();
    }
}

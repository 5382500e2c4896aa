use std::collections::HashMap;
use std::sync::Arc;

use orion_error::prelude::*;

use crate::error::{CoreReason, CoreResult};
use crate::output::{OutputRow, PipelineId};

use super::runtime::SinkRuntime;

// ---------------------------------------------------------------------------
// SinkDispatcher: pipeline → sink routing (pre-bound at startup)
// ---------------------------------------------------------------------------

/// Routes serialised rows from an output pipeline to its sink.
///
/// Pipeline→sink bindings are fixed at startup. Each pipeline has exactly
/// one sink; a failure in one sink never touches another pipeline.
#[derive(Debug)]
pub struct SinkDispatcher {
    routes: HashMap<PipelineId, Arc<SinkRuntime>>,
}

impl SinkDispatcher {
    /// Create a dispatcher from pre-resolved bindings. Every pipeline in
    /// [`PipelineId::ALL`] must be bound.
    pub fn new(routes: HashMap<PipelineId, Arc<SinkRuntime>>) -> CoreResult<Self> {
        for pipeline in PipelineId::ALL {
            if !routes.contains_key(&pipeline) {
                return Err(StructError::from(CoreReason::SinkWrite)
                    .with_detail(format!("no sink bound for pipeline {pipeline}")));
            }
        }
        Ok(Self { routes })
    }

    /// Write rows through the pipeline's sink. Empty batches are a no-op.
    pub async fn dispatch(&self, pipeline: PipelineId, rows: &[OutputRow]) -> CoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sink = self.sink(pipeline)?;
        sink.write(rows).await
    }

    fn sink(&self, pipeline: PipelineId) -> CoreResult<&Arc<SinkRuntime>> {
        self.routes.get(&pipeline).ok_or_else(|| {
            StructError::from(CoreReason::SinkWrite)
                .with_detail(format!("no sink bound for pipeline {pipeline}"))
        })
    }

    /// Gracefully stop all sinks.
    pub async fn stop_all(&self) {
        for pipeline in PipelineId::ALL {
            if let Some(sink) = self.routes.get(&pipeline)
                && let Err(e) = sink.stop().await
            {
                log::warn!("sink stop error: {e}");
            }
        }
    }
}

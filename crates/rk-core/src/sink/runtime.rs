use orion_error::prelude::*;
use tokio::sync::Mutex;

use crate::error::{CoreReason, CoreResult};
use crate::output::OutputRow;

use super::Sink;

/// Runtime state for a single sink instance.
///
/// Wraps a boxed [`Sink`] with its name and the kind it was built from, and
/// serialises access so a pipeline's writes never interleave with `stop`.
pub struct SinkRuntime {
    pub name: String,
    pub kind: &'static str,
    pub handle: Mutex<Box<dyn Sink>>,
}

impl SinkRuntime {
    pub fn new(name: impl Into<String>, kind: &'static str, sink: Box<dyn Sink>) -> Self {
        Self {
            name: name.into(),
            kind,
            handle: Mutex::new(sink),
        }
    }

    /// Write one batch of rows.
    pub async fn write(&self, rows: &[OutputRow]) -> CoreResult<()> {
        let mut handle = self.handle.lock().await;
        handle
            .write(rows)
            .await
            .map_err(|e| {
                StructError::from(CoreReason::SinkWrite)
                    .with_detail(format!("sink {:?} write error: {e:#}", self.name))
            })
    }

    /// Gracefully stop the sink.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let mut handle = self.handle.lock().await;
        handle
            .stop()
            .await
            .map_err(|e| anyhow::anyhow!("sink {:?} stop error: {e}", self.name))
    }
}

impl std::fmt::Debug for SinkRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkRuntime")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

//! Output sinks and the pipeline → sink dispatcher.

mod console;
mod dispatch;
mod file;
mod keyed;
mod memory;
mod runtime;

pub use console::ConsoleSink;
pub use dispatch::SinkDispatcher;
pub use file::JsonLinesSink;
pub use keyed::KeyedFileSink;
pub use memory::{MemorySink, MemorySinkHandle};
pub use runtime::SinkRuntime;

use async_trait::async_trait;

use crate::output::OutputRow;

/// Destination for serialised output rows.
///
/// `write` either persists the whole slice or returns an error; callers retry
/// the same rows on failure, so keyed sinks must upsert and append-only sinks
/// may see duplicates.
#[async_trait]
pub trait Sink: Send {
    async fn write(&mut self, rows: &[OutputRow]) -> anyhow::Result<()>;

    /// Flush and release resources.
    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

//! Replayable event sources.
//!
//! A source hands out raw payloads tagged with a monotonically increasing
//! offset. Offsets are stable across reconnects and restarts, so a consumer
//! can `seek` back to the first offset it has not committed yet.

mod file;
mod memory;

use async_trait::async_trait;

pub use file::FileSource;
pub use memory::{MemorySource, MemorySourceHandle};

/// One raw payload and its source offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub offset: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source disconnected: {0}")]
    Disconnected(String),
    #[error("source i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Source: Send + Sync {
    /// Return up to `max_records` records in ascending offset order. An empty
    /// vec means nothing new is available yet.
    async fn poll(&mut self, max_records: usize) -> Result<Vec<SourceRecord>, SourceError>;

    /// Everything at or below `offset` has been durably consumed.
    async fn commit(&mut self, offset: u64) -> Result<(), SourceError>;

    /// Position the source so the next poll starts at `next_offset`.
    async fn seek(&mut self, next_offset: u64) -> Result<(), SourceError>;

    /// Re-establish the connection and resume after the last committed
    /// offset.
    async fn reconnect(&mut self) -> Result<(), SourceError>;

    /// Human-readable endpoint, for logs.
    fn describe(&self) -> String;

    /// A second, independent handle over the same offsets. Pipelines that
    /// fell behind the feed re-read their missing range through it. `None`
    /// when the source cannot be read twice.
    fn replay_handle(&self) -> Option<Box<dyn Source>> {
        None
    }
}

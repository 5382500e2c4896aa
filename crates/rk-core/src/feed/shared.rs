use tokio::sync::{Notify, RwLock};

use crate::error::CoreResult;

use super::EnrichedFeed;
use super::types::{AppendOutcome, Evicted, FeedRead, FeedRecord};

/// Point-in-time feed occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub records: usize,
    pub batches: usize,
    pub high_offset: Option<u64>,
}

/// [`EnrichedFeed`] shared between the ingest task (single writer) and the
/// pipeline tasks (readers).
pub struct SharedFeed {
    inner: RwLock<EnrichedFeed>,
    /// Signalled whenever eviction frees room.
    drained: Notify,
}

impl SharedFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(EnrichedFeed::new(capacity)),
            drained: Notify::new(),
        }
    }

    pub async fn append(
        &self,
        last_offset: u64,
        records: Vec<FeedRecord>,
    ) -> CoreResult<AppendOutcome> {
        self.inner.write().await.append(last_offset, records)
    }

    /// Wait until `incoming` records fit. Cancel-safe.
    pub async fn wait_for_room(&self, incoming: usize) {
        loop {
            // Created before the check so a concurrent eviction is not missed.
            let notified = self.drained.notified();
            if self.inner.read().await.has_room(incoming) {
                return;
            }
            notified.await;
        }
    }

    pub async fn read_after(&self, after: Option<u64>, through: Option<u64>) -> FeedRead {
        self.inner.read().await.read_after(after, through)
    }

    pub async fn evict_through(&self, offset: u64) -> Evicted {
        let evicted = self.inner.write().await.evict_through(offset);
        self.drained.notify_waiters();
        evicted
    }

    pub async fn start_after(&self, offset: Option<u64>) -> CoreResult<()> {
        self.inner.write().await.start_after(offset)
    }

    pub async fn high_offset(&self) -> Option<u64> {
        self.inner.read().await.high_offset()
    }

    pub async fn stats(&self) -> FeedStats {
        let feed = self.inner.read().await;
        FeedStats {
            records: feed.len(),
            batches: feed.batch_count(),
            high_offset: feed.high_offset(),
        }
    }
}

use std::sync::Arc;

use crate::event::EnrichedEvent;

/// One enriched event and the source offset it was read from.
#[derive(Debug, Clone)]
pub struct FeedRecord {
    pub offset: u64,
    pub event: EnrichedEvent,
}

/// Result of [`EnrichedFeed::append`](super::EnrichedFeed::append).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { seq: u64 },
    /// `last_offset` was not past the feed's high offset; nothing was added.
    Stale,
}

/// What one [`evict_through`](super::EnrichedFeed::evict_through) removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evicted {
    pub batches: usize,
    pub records: usize,
}

/// One ingested poll.
pub(super) struct FeedBatch {
    /// Highest source offset this batch covers, including records that
    /// failed to decode.
    pub(super) last_offset: u64,
    pub(super) records: Arc<[FeedRecord]>,
}

/// Records visible to one reader, shared with the feed without copying.
#[derive(Debug, Clone, Default)]
pub struct FeedRead {
    pub(super) chunks: Vec<Arc<[FeedRecord]>>,
    pub(super) after: Option<u64>,
    pub(super) through: Option<u64>,
    /// Highest offset covered by this read, `None` when nothing is covered.
    pub covered_through: Option<u64>,
    /// The reader's position fell behind eviction; some records are gone.
    pub gap: bool,
}

impl FeedRead {
    /// A read assembled outside the feed (re-read from the source) covering
    /// exactly `(after, through]`.
    pub fn replayed(after: Option<u64>, through: u64, records: Vec<FeedRecord>) -> Self {
        Self {
            chunks: vec![Arc::from(records)],
            after,
            through: Some(through),
            covered_through: Some(through),
            gap: false,
        }
    }

    /// Records with `after < offset <= covered_through`, in offset order.
    pub fn records(&self) -> impl Iterator<Item = &FeedRecord> {
        let after = self.after;
        let through = self.through;
        self.chunks.iter().flat_map(|c| c.iter()).filter(move |r| {
            after.is_none_or(|a| r.offset > a) && through.is_none_or(|t| r.offset <= t)
        })
    }

    pub fn record_count(&self) -> usize {
        self.records().count()
    }

    /// Whether the read moved past `after`.
    pub fn has_progress(&self) -> bool {
        match (self.covered_through, self.after) {
            (Some(c), Some(a)) => c > a,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

//! The enriched feed: a bounded, replayable, multi-reader log of enriched
//! events between ingestion and the output pipelines.
//!
//! Ingestion appends one batch per source poll; each pipeline reads by
//! source offset with its own cursor. Batches are evicted once every
//! pipeline that still reads from the feed has committed past them.

mod cursor;
mod eviction;
mod shared;
mod types;


pub use shared::{FeedStats, SharedFeed};
pub use types::{AppendOutcome, Evicted, FeedRead, FeedRecord};

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{CoreReason, CoreResult, core_err};

use types::FeedBatch;

/// Append-at-back, evict-at-front buffer of [`FeedBatch`]es.
pub struct EnrichedFeed {
    pub(super) batches: VecDeque<FeedBatch>,
    pub(super) capacity: usize,
    pub(super) total_records: usize,
    /// Highest offset ever appended.
    pub(super) high_offset: Option<u64>,
    /// Highest offset no longer held, by eviction or a recovery reset.
    pub(super) evicted_through: Option<u64>,
    /// Next sequence number to assign to an appended batch.
    pub(super) next_seq: u64,
}

impl EnrichedFeed {
    /// Create an empty feed holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            batches: VecDeque::new(),
            capacity,
            total_records: 0,
            high_offset: None,
            evicted_through: None,
            next_seq: 0,
        }
    }

    /// Append one polled batch covering offsets up to `last_offset`.
    ///
    /// `records` may be empty when every polled record failed to decode; the
    /// batch is still kept so readers move past those offsets. A batch that
    /// does not move past the high offset (a replay overlap after a source
    /// seek) is ignored. Records must be in ascending offset order and not
    /// beyond `last_offset`.
    pub fn append(&mut self, last_offset: u64, records: Vec<FeedRecord>) -> CoreResult<AppendOutcome> {
        if self.high_offset.is_some_and(|h| last_offset <= h) {
            return Ok(AppendOutcome::Stale);
        }

        let floor = self.high_offset;
        let records: Vec<FeedRecord> = records
            .into_iter()
            .filter(|r| floor.is_none_or(|h| r.offset > h))
            .collect();
        if records.windows(2).any(|w| w[0].offset >= w[1].offset)
            || records.last().is_some_and(|r| r.offset > last_offset)
        {
            return Err(core_err(
                CoreReason::DataFormat,
                format!("feed batch ending at offset {last_offset} is not in offset order"),
            ));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.total_records += records.len();
        self.high_offset = Some(last_offset);
        self.batches.push_back(FeedBatch {
            last_offset,
            records: Arc::from(records),
        });
        Ok(AppendOutcome::Appended { seq })
    }

    /// Whether `incoming` more records fit. An empty feed always accepts, so
    /// an oversized poll cannot stall ingestion.
    pub fn has_room(&self, incoming: usize) -> bool {
        self.batches.is_empty() || self.total_records + incoming <= self.capacity
    }

    pub fn high_offset(&self) -> Option<u64> {
        self.high_offset
    }

    /// Set the starting position after recovery: offsets `<= offset` are
    /// treated as already consumed. Only allowed on an empty feed.
    pub fn start_after(&mut self, offset: Option<u64>) -> CoreResult<()> {
        if !self.batches.is_empty() {
            return Err(core_err(
                CoreReason::DataFormat,
                "feed start position can only be set before the first append",
            ));
        }
        self.high_offset = offset;
        self.evicted_through = offset;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.total_records
    }

    pub fn is_empty(&self) -> bool {
        self.total_records == 0
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

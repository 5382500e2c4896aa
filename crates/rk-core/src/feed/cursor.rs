use super::EnrichedFeed;
use super::types::FeedRead;

impl EnrichedFeed {
    /// Read records with offsets in `(after, through]`.
    ///
    /// `after = None` reads from the beginning; `through = None` reads to the
    /// high offset. `covered_through` is the highest offset the returned
    /// batches cover (capped at `through`), so a caller replaying a planned
    /// batch can tell whether the feed has caught up. `gap = true` means
    /// records after `after` were already evicted.
    pub fn read_after(&self, after: Option<u64>, through: Option<u64>) -> FeedRead {
        let mut read = FeedRead {
            after,
            through,
            gap: self
                .evicted_through
                .is_some_and(|e| after.is_none_or(|a| a < e)),
            ..FeedRead::default()
        };

        for batch in &self.batches {
            if after.is_some_and(|a| batch.last_offset <= a) {
                continue;
            }
            if !batch.records.is_empty() {
                read.chunks.push(batch.records.clone()); // Arc clone, zero data copy
            }
            let end = through.map_or(batch.last_offset, |t| batch.last_offset.min(t));
            read.covered_through = Some(end);
            if through.is_some_and(|t| batch.last_offset >= t) {
                break;
            }
        }
        read
    }
}

use super::EnrichedFeed;
use super::types::Evicted;

impl EnrichedFeed {
    /// Drop front batches fully covered by `offset`. Readers still behind
    /// `offset` see a gap on their next read.
    pub fn evict_through(&mut self, offset: u64) -> Evicted {
        let mut evicted = Evicted::default();
        while let Some(front) = self.batches.front() {
            if front.last_offset > offset {
                break;
            }
            let last = front.last_offset;
            let count = front.records.len();
            self.batches.pop_front();
            self.total_records -= count;
            self.evicted_through = Some(last);
            evicted.batches += 1;
            evicted.records += count;
        }
        evicted
    }
}

use rk_core::event::decode_and_enrich;
use rk_core::feed::{FeedRead, FeedRecord};

use crate::source::{Source, SourceError};

/// Re-reads an offset range straight from the source for a pipeline whose
/// committed offset the feed already evicted.
pub(crate) struct ReplayReader {
    source: Box<dyn Source>,
    max_records: usize,
}

impl ReplayReader {
    pub fn new(source: Box<dyn Source>, max_records: usize) -> Self {
        Self {
            source,
            max_records: max_records.max(1),
        }
    }

    /// Decoded records in `(after, through]`. Payloads that fail to decode
    /// are skipped, as they were on ingest.
    pub async fn read(
        &mut self,
        after: Option<u64>,
        through: u64,
    ) -> Result<FeedRead, SourceError> {
        self.source.seek(after.map_or(0, |a| a + 1)).await?;
        let mut records = Vec::new();
        let mut skipped = 0usize;
        'poll: loop {
            let polled = self.source.poll(self.max_records).await?;
            if polled.is_empty() {
                break;
            }
            for r in polled {
                if r.offset > through {
                    break 'poll;
                }
                match decode_and_enrich(&r.payload) {
                    Ok(event) => records.push(FeedRecord {
                        offset: r.offset,
                        event,
                    }),
                    Err(_) => skipped += 1,
                }
                if r.offset == through {
                    break 'poll;
                }
            }
        }
        rk_debug!(
            pipe,
            ?after,
            through,
            records = records.len(),
            skipped,
            "range re-read from source"
        );
        Ok(FeedRead::replayed(after, through, records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn payload(invoice: i64) -> String {
        format!(
            r#"{{"invoice_no":{invoice},"country":"UK","timestamp":"2024-03-01T10:00:00Z","type":"ORDER","items":[]}}"#
        )
    }

    #[tokio::test]
    async fn rereads_exactly_the_requested_range() {
        let (source, handle) = MemorySource::new();
        for i in 0..6 {
            handle.push(payload(i));
        }
        handle.push("not json");
        handle.push(payload(7));

        let mut reader = ReplayReader::new(Box::new(source), 2);
        let read = reader.read(Some(2), 6).await.unwrap();
        let offsets: Vec<_> = read.records().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![3, 4, 5]);
        assert_eq!(read.covered_through, Some(6));
        assert!(!read.gap);

        let read = reader.read(None, 1).await.unwrap();
        let offsets: Vec<_> = read.records().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 1]);
    }
}

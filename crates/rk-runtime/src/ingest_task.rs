use std::sync::Arc;
use std::time::Instant;

use rk_config::SourceConfig;
use rk_core::event::{DecodeError, decode_and_enrich};
use rk_core::feed::{AppendOutcome, FeedRecord, SharedFeed};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::metrics::RuntimeMetrics;
use crate::source::{Source, SourceError, SourceRecord};
use crate::status::StatusBoard;

/// Everything the ingest loop owns.
pub(crate) struct IngestTask {
    pub source: Box<dyn Source>,
    pub feed: Arc<SharedFeed>,
    pub status: Arc<StatusBoard>,
    pub metrics: Option<Arc<RuntimeMetrics>>,
    pub config: SourceConfig,
    pub cancel: CancellationToken,
}

#[derive(Default)]
struct Decoded {
    records: Vec<FeedRecord>,
    errors: Vec<(u64, DecodeError)>,
}

impl Decoded {
    fn extend(&mut self, other: Decoded) {
        self.records.extend(other.records);
        self.errors.extend(other.errors);
    }
}

/// Poll the source, decode and enrich, publish to the feed, and tell the
/// source what every pipeline has committed. Runs until cancelled or until
/// the source stays unreachable past its reconnect budget.
#[tracing::instrument(name = "ingest", skip_all)]
pub(crate) async fn run_ingest(task: IngestTask) -> anyhow::Result<()> {
    let mut ingest = Ingest {
        task,
        source_committed: None,
    };
    if !ingest.resume().await? {
        return Ok(());
    }

    let mut tick = tokio::time::interval(ingest.task.config.poll_interval.as_duration());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = ingest.task.cancel.cancelled() => break,
            _ = tick.tick() => {}
        }
        ingest.commit_source().await;
        if !ingest.drain_source().await? {
            break;
        }
    }
    ingest.commit_source().await;
    rk_debug!(pipe, "ingest task stopped");
    Ok(())
}

struct Ingest {
    task: IngestTask,
    source_committed: Option<u64>,
}

impl Ingest {
    /// Position the source after the lowest offset every pipeline has
    /// committed. Returns `false` if cancelled while reconnecting.
    async fn resume(&mut self) -> anyhow::Result<bool> {
        let Some(committed) = self.task.status.min_committed() else {
            return Ok(true);
        };
        if let Err(e) = self.task.source.commit(committed).await {
            rk_warn!(conn, offset = committed, error = %e, "source commit failed");
        }
        self.source_committed = Some(committed);
        match self.task.source.seek(committed + 1).await {
            Ok(()) => {
                rk_info!(conn, next_offset = committed + 1, "source resumed");
                Ok(true)
            }
            Err(e) => self.reconnect(e).await,
        }
    }

    /// Poll until the source has nothing more to give right now. Returns
    /// `false` when cancelled.
    async fn drain_source(&mut self) -> anyhow::Result<bool> {
        let max = self.task.config.max_batch_size;
        loop {
            tokio::select! {
                biased;
                _ = self.task.cancel.cancelled() => return Ok(false),
                _ = self.task.feed.wait_for_room(max) => {}
            }

            let polled = match self.task.source.poll(max).await {
                Ok(polled) => polled,
                Err(e) => return self.reconnect(e).await,
            };
            self.task.status.update_ingest(|s| s.connected = true);
            if let Some(metrics) = &self.task.metrics {
                metrics.add_source_poll(polled.len());
            }
            if polled.is_empty() {
                return Ok(true);
            }
            let full = polled.len() >= max;
            self.publish(polled).await?;
            self.commit_source().await;
            if !full {
                return Ok(true);
            }
        }
    }

    async fn publish(&mut self, mut polled: Vec<SourceRecord>) -> anyhow::Result<()> {
        // A reconnect rewinds to the committed offset; skip what the feed
        // already holds.
        if let Some(high) = self.task.feed.high_offset().await {
            polled.retain(|r| r.offset > high);
        }
        let Some(last_offset) = polled.last().map(|r| r.offset) else {
            return Ok(());
        };
        let read = polled.len();

        let started = Instant::now();
        let decoded = if read >= self.task.config.parallel_threshold {
            decode_parallel(polled).await?
        } else {
            decode_chunk(polled)
        };
        if let Some(metrics) = &self.task.metrics {
            metrics.observe_decode(started.elapsed());
            metrics.add_decode_errors(decoded.errors.len());
        }
        for (offset, error) in &decoded.errors {
            rk_warn!(pipe, offset = *offset, error = %error, "dropping undecodable event");
        }
        let decode_errors = decoded.errors.len() as u64;
        let records = decoded.records.len();

        let outcome = self
            .task
            .feed
            .append(last_offset, decoded.records)
            .await
            .map_err(|e| anyhow::anyhow!("feed append up to offset {last_offset}: {e}"))?;
        match outcome {
            AppendOutcome::Appended { seq } => {
                rk_debug!(pipe, seq, last_offset, records, "feed batch appended");
                if let Some(metrics) = &self.task.metrics {
                    metrics.inc_feed_append();
                }
                self.task.status.update_ingest(|s| {
                    s.records_read += read as u64;
                    s.decode_errors += decode_errors;
                    s.high_offset = Some(last_offset);
                });
            }
            AppendOutcome::Stale => {
                rk_debug!(pipe, last_offset, "polled batch already in feed");
            }
        }
        Ok(())
    }

    /// Commit the lowest offset all pipelines have committed back to the
    /// source.
    async fn commit_source(&mut self) {
        let Some(offset) = self.task.status.min_committed() else {
            return;
        };
        if self.source_committed.is_some_and(|c| c >= offset) {
            return;
        }
        match self.task.source.commit(offset).await {
            Ok(()) => {
                self.source_committed = Some(offset);
                self.task
                    .status
                    .update_ingest(|s| s.source_committed = Some(offset));
            }
            Err(e) => rk_warn!(conn, offset, error = %e, "source commit failed"),
        }
    }

    /// Reconnect with bounded exponential backoff. Returns `false` when
    /// cancelled, an error once the attempts are exhausted.
    async fn reconnect(&mut self, cause: SourceError) -> anyhow::Result<bool> {
        let endpoint = self.task.source.describe();
        rk_warn!(conn, source = %endpoint, error = %cause, "source disconnected");
        self.task.status.update_ingest(|s| s.connected = false);

        let policy = self.task.config.reconnect;
        for attempt in 1..=policy.max_attempts {
            let delay = policy.backoff_for(attempt);
            tokio::select! {
                biased;
                _ = self.task.cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(delay) => {}
            }
            if let Some(metrics) = &self.task.metrics {
                metrics.inc_source_reconnect();
            }
            match self.task.source.reconnect().await {
                Ok(()) => {
                    rk_info!(conn, source = %endpoint, attempt, "source reconnected");
                    self.task.status.update_ingest(|s| s.connected = true);
                    return Ok(true);
                }
                Err(e) => rk_warn!(
                    conn,
                    source = %endpoint,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "source reconnect failed"
                ),
            }
        }
        anyhow::bail!(
            "source {endpoint} unreachable after {} reconnect attempts",
            policy.max_attempts
        )
    }
}

fn decode_chunk(records: Vec<SourceRecord>) -> Decoded {
    let mut out = Decoded::default();
    for r in records {
        match decode_and_enrich(&r.payload) {
            Ok(event) => out.records.push(FeedRecord {
                offset: r.offset,
                event,
            }),
            Err(e) => out.errors.push((r.offset, e)),
        }
    }
    out
}

/// Decode on blocking threads, one chunk per worker, and reassemble in
/// offset order.
async fn decode_parallel(records: Vec<SourceRecord>) -> anyhow::Result<Decoded> {
    let workers = std::thread::available_parallelism().map_or(4, |n| n.get());
    let chunk_size = records.len().div_ceil(workers).max(1);

    let mut set = JoinSet::new();
    let mut iter = records.into_iter();
    let mut chunks = 0usize;
    loop {
        let chunk: Vec<SourceRecord> = iter.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        let idx = chunks;
        set.spawn_blocking(move || (idx, decode_chunk(chunk)));
        chunks += 1;
    }

    let mut parts = Vec::with_capacity(chunks);
    while let Some(joined) = set.join_next().await {
        parts.push(joined.map_err(|e| anyhow::anyhow!("decode worker failed: {e}"))?);
    }
    parts.sort_by_key(|(idx, _)| *idx);

    let mut out = Decoded::default();
    for (_, part) in parts {
        out.extend(part);
    }
    Ok(out)
}

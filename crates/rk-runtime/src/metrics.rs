use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rk_config::MetricsConfig;
use rk_core::feed::{Evicted, SharedFeed};
use rk_core::output::PipelineId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::status::StatusBoard;

const DEFAULT_HISTOGRAM_BUCKETS_SECONDS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0,
];

/// Lock-free histogram with fixed buckets.
///
/// Each observation increments exactly one bucket (non-cumulative storage).
struct Histogram {
    upper_bounds_nanos: Vec<u64>,
    bucket_counts: Vec<AtomicU64>,
    sum_nanos: AtomicU64,
}

impl Histogram {
    fn from_seconds_bounds(bounds: &[f64]) -> Self {
        let upper_bounds_nanos = bounds
            .iter()
            .map(|sec| (*sec * 1_000_000_000.0) as u64)
            .collect::<Vec<_>>();
        let bucket_counts = (0..=upper_bounds_nanos.len())
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>();
        Self {
            upper_bounds_nanos,
            bucket_counts,
            sum_nanos: AtomicU64::new(0),
        }
    }

    fn observe_duration(&self, elapsed: Duration) {
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
        let idx = self
            .upper_bounds_nanos
            .iter()
            .position(|bound| nanos <= *bound)
            .unwrap_or(self.upper_bounds_nanos.len());
        self.bucket_counts[idx].fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            upper_bounds_nanos: self.upper_bounds_nanos.clone(),
            bucket_counts: self
                .bucket_counts
                .iter()
                .map(|v| v.load(Ordering::Relaxed))
                .collect(),
            sum_seconds: self.sum_nanos.load(Ordering::Relaxed) as f64 / 1_000_000_000.0,
        }
    }
}

struct HistogramSnapshot {
    upper_bounds_nanos: Vec<u64>,
    bucket_counts: Vec<u64>,
    sum_seconds: f64,
}

/// Counters of one output pipeline.
struct PipelineCounters {
    batches_total: AtomicU64,
    rows_emitted_total: AtomicU64,
    late_dropped_total: AtomicU64,
    sink_retries_total: AtomicU64,
    sink_failures_total: AtomicU64,
    cursor_gap_total: AtomicU64,
    batch_seconds: Histogram,
}

impl PipelineCounters {
    fn new() -> Self {
        Self {
            batches_total: AtomicU64::new(0),
            rows_emitted_total: AtomicU64::new(0),
            late_dropped_total: AtomicU64::new(0),
            sink_retries_total: AtomicU64::new(0),
            sink_failures_total: AtomicU64::new(0),
            cursor_gap_total: AtomicU64::new(0),
            batch_seconds: Histogram::from_seconds_bounds(DEFAULT_HISTOGRAM_BUCKETS_SECONDS),
        }
    }
}

/// Shared runtime metrics store.
///
/// Counters are lock-free atomics. The pipeline label set is fixed, so
/// hot-path updates never allocate.
pub struct RuntimeMetrics {
    source_polls_total: AtomicU64,
    source_records_total: AtomicU64,
    source_reconnects_total: AtomicU64,
    decode_errors_total: AtomicU64,

    feed_batches_appended_total: AtomicU64,
    feed_batches_evicted_total: AtomicU64,
    feed_records_evicted_total: AtomicU64,
    feed_records: AtomicU64,
    feed_batches: AtomicU64,

    decode_seconds: Histogram,
    pipelines: BTreeMap<&'static str, PipelineCounters>,
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self {
            source_polls_total: AtomicU64::new(0),
            source_records_total: AtomicU64::new(0),
            source_reconnects_total: AtomicU64::new(0),
            decode_errors_total: AtomicU64::new(0),
            feed_batches_appended_total: AtomicU64::new(0),
            feed_batches_evicted_total: AtomicU64::new(0),
            feed_records_evicted_total: AtomicU64::new(0),
            feed_records: AtomicU64::new(0),
            feed_batches: AtomicU64::new(0),
            decode_seconds: Histogram::from_seconds_bounds(DEFAULT_HISTOGRAM_BUCKETS_SECONDS),
            pipelines: PipelineId::ALL
                .iter()
                .map(|p| (p.as_str(), PipelineCounters::new()))
                .collect(),
        }
    }

    pub fn add_source_poll(&self, records: usize) {
        self.source_polls_total.fetch_add(1, Ordering::Relaxed);
        self.source_records_total
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn inc_source_reconnect(&self) {
        self.source_reconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_decode_errors(&self, count: usize) {
        self.decode_errors_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn observe_decode(&self, elapsed: Duration) {
        self.decode_seconds.observe_duration(elapsed);
    }

    pub fn inc_feed_append(&self) {
        self.feed_batches_appended_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_feed_evicted(&self, evicted: Evicted) {
        self.feed_batches_evicted_total
            .fetch_add(evicted.batches as u64, Ordering::Relaxed);
        self.feed_records_evicted_total
            .fetch_add(evicted.records as u64, Ordering::Relaxed);
    }

    pub fn add_pipeline_batch(&self, pipeline: PipelineId, rows: usize, late: usize) {
        if let Some(c) = self.pipelines.get(pipeline.as_str()) {
            c.batches_total.fetch_add(1, Ordering::Relaxed);
            c.rows_emitted_total.fetch_add(rows as u64, Ordering::Relaxed);
            c.late_dropped_total.fetch_add(late as u64, Ordering::Relaxed);
        }
    }

    pub fn observe_pipeline_batch(&self, pipeline: PipelineId, elapsed: Duration) {
        if let Some(c) = self.pipelines.get(pipeline.as_str()) {
            c.batch_seconds.observe_duration(elapsed);
        }
    }

    pub fn inc_sink_retry(&self, pipeline: PipelineId) {
        if let Some(c) = self.pipelines.get(pipeline.as_str()) {
            c.sink_retries_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_sink_failure(&self, pipeline: PipelineId) {
        if let Some(c) = self.pipelines.get(pipeline.as_str()) {
            c.sink_failures_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_cursor_gap(&self, pipeline: PipelineId) {
        if let Some(c) = self.pipelines.get(pipeline.as_str()) {
            c.cursor_gap_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Sample feed occupancy; kept off the scrape path.
    pub async fn sample_feed(&self, feed: &SharedFeed) {
        let stats = feed.stats().await;
        self.feed_records
            .store(stats.records as u64, Ordering::Relaxed);
        self.feed_batches
            .store(stats.batches as u64, Ordering::Relaxed);
    }

    fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(8 * 1024);
        let mut rendered_types = BTreeSet::new();

        for (name, value) in [
            ("rk_source_polls_total", &self.source_polls_total),
            ("rk_source_records_total", &self.source_records_total),
            ("rk_source_reconnects_total", &self.source_reconnects_total),
            ("rk_decode_errors_total", &self.decode_errors_total),
            ("rk_feed_batches_appended_total", &self.feed_batches_appended_total),
            ("rk_feed_batches_evicted_total", &self.feed_batches_evicted_total),
            ("rk_feed_records_evicted_total", &self.feed_records_evicted_total),
        ] {
            self.render_sample(
                &mut out,
                &mut rendered_types,
                name,
                "counter",
                &[],
                value.load(Ordering::Relaxed),
            );
        }
        for (name, value) in [
            ("rk_feed_records", &self.feed_records),
            ("rk_feed_batches", &self.feed_batches),
        ] {
            self.render_sample(
                &mut out,
                &mut rendered_types,
                name,
                "gauge",
                &[],
                value.load(Ordering::Relaxed),
            );
        }
        self.render_histogram(
            &mut out,
            &mut rendered_types,
            "rk_decode_seconds",
            &[],
            &self.decode_seconds,
        );

        for (pipeline, c) in &self.pipelines {
            let labels = [("pipeline", *pipeline)];
            for (name, value) in [
                ("rk_pipeline_batches_total", &c.batches_total),
                ("rk_pipeline_rows_emitted_total", &c.rows_emitted_total),
                ("rk_pipeline_late_dropped_total", &c.late_dropped_total),
                ("rk_pipeline_sink_retries_total", &c.sink_retries_total),
                ("rk_pipeline_sink_failures_total", &c.sink_failures_total),
                ("rk_pipeline_cursor_gap_total", &c.cursor_gap_total),
            ] {
                self.render_sample(
                    &mut out,
                    &mut rendered_types,
                    name,
                    "counter",
                    &labels,
                    value.load(Ordering::Relaxed),
                );
            }
            self.render_histogram(
                &mut out,
                &mut rendered_types,
                "rk_pipeline_batch_seconds",
                &labels,
                &c.batch_seconds,
            );
        }

        out
    }

    fn render_sample(
        &self,
        out: &mut String,
        rendered_types: &mut BTreeSet<String>,
        name: &str,
        kind: &str,
        labels: &[(&str, &str)],
        value: u64,
    ) {
        self.render_type_once(out, rendered_types, name, kind);
        let _ = writeln!(out, "{name}{} {value}", format_labels(labels));
    }

    fn render_histogram(
        &self,
        out: &mut String,
        rendered_types: &mut BTreeSet<String>,
        name: &str,
        labels: &[(&str, &str)],
        histogram: &Histogram,
    ) {
        let snapshot = histogram.snapshot();
        self.render_type_once(out, rendered_types, name, "histogram");
        let mut cumulative = 0u64;
        for (idx, upper_bound_nanos) in snapshot.upper_bounds_nanos.iter().enumerate() {
            cumulative = cumulative.saturating_add(snapshot.bucket_counts[idx]);
            let le = format!("{:.6}", *upper_bound_nanos as f64 / 1_000_000_000.0);
            let mut all_labels = labels.to_vec();
            all_labels.push(("le", le.as_str()));
            let _ = writeln!(
                out,
                "{name}_bucket{} {cumulative}",
                format_labels(&all_labels),
            );
        }
        // The overflow bucket sits past the last finite bound.
        let overflow = snapshot
            .bucket_counts
            .get(snapshot.upper_bounds_nanos.len())
            .copied()
            .unwrap_or(0);
        cumulative = cumulative.saturating_add(overflow);
        let mut all_labels = labels.to_vec();
        all_labels.push(("le", "+Inf"));
        let _ = writeln!(
            out,
            "{name}_bucket{} {cumulative}",
            format_labels(&all_labels),
        );
        let _ = writeln!(
            out,
            "{name}_sum{} {}",
            format_labels(labels),
            snapshot.sum_seconds
        );
        let _ = writeln!(out, "{name}_count{} {}", format_labels(labels), cumulative);
    }

    fn render_type_once(
        &self,
        out: &mut String,
        rendered_types: &mut BTreeSet<String>,
        name: &str,
        kind: &str,
    ) {
        if rendered_types.insert(name.to_string()) {
            let _ = writeln!(out, "# TYPE {name} {kind}");
        }
    }

    fn pipeline_total(&self, pick: impl Fn(&PipelineCounters) -> u64) -> u64 {
        self.pipelines.values().map(pick).sum()
    }

    fn summary_line(&self) -> String {
        format!(
            "read={} decode_errors={} feed_records={} batches={} rows={} late={} sink_failures={}",
            self.source_records_total.load(Ordering::Relaxed),
            self.decode_errors_total.load(Ordering::Relaxed),
            self.feed_records.load(Ordering::Relaxed),
            self.pipeline_total(|c| c.batches_total.load(Ordering::Relaxed)),
            self.pipeline_total(|c| c.rows_emitted_total.load(Ordering::Relaxed)),
            self.pipeline_total(|c| c.late_dropped_total.load(Ordering::Relaxed)),
            self.pipeline_total(|c| c.sink_failures_total.load(Ordering::Relaxed)),
        )
    }
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let mut out = String::from("{");
    for (idx, (key, value)) in labels.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(key);
        out.push('=');
        out.push('"');
        for ch in value.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                _ => out.push(ch),
            }
        }
        out.push('"');
    }
    out.push('}');
    out
}

/// Serve `GET /metrics` and `GET /status` and log a summary line every
/// report interval, until cancelled.
pub async fn run_metrics_task(
    metrics: Arc<RuntimeMetrics>,
    config: MetricsConfig,
    listener: TcpListener,
    status: Arc<StatusBoard>,
    feed: Arc<SharedFeed>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    rk_info!(
        sys,
        listen = %config.prometheus_listen,
        interval = %config.report_interval,
        "metrics exporter started"
    );

    metrics.sample_feed(&feed).await;
    let mut tick = tokio::time::interval(config.report_interval.as_duration());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                metrics.sample_feed(&feed).await;
                rk_info!(res, summary = %metrics.summary_line(), "metrics snapshot");
            }
            result = listener.accept() => {
                let (stream, _) = result?;
                let metrics = Arc::clone(&metrics);
                let status = Arc::clone(&status);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, metrics, status).await {
                        rk_debug!(sys, error = %e, "metrics connection handling failed");
                    }
                });
            }
        }
    }
    Ok(())
}

async fn serve_connection(
    mut stream: TcpStream,
    metrics: Arc<RuntimeMetrics>,
    status: Arc<StatusBoard>,
) -> anyhow::Result<()> {
    let mut req_buf = [0u8; 512];
    let req_n = match timeout(Duration::from_secs(2), stream.read(&mut req_buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Ok(()),
    };
    let request = std::str::from_utf8(&req_buf[..req_n]).unwrap_or("");

    let response = if request.starts_with("GET /metrics") {
        Some(("text/plain; version=0.0.4", metrics.render_prometheus()))
    } else if request.starts_with("GET /status") {
        Some((
            "application/json",
            serde_json::to_string(&status.snapshot())?,
        ))
    } else {
        None
    };

    match response {
        Some((content_type, body)) => {
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            timeout(Duration::from_secs(2), stream.write_all(header.as_bytes())).await??;
            timeout(Duration::from_secs(2), stream.write_all(body.as_bytes())).await??;
        }
        None => {
            timeout(
                Duration::from_secs(2),
                stream.write_all(
                    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                ),
            )
            .await??;
        }
    }
    let _ = timeout(Duration::from_secs(1), stream.shutdown()).await;
    Ok(())
}

pub fn maybe_build_metrics(config: &MetricsConfig) -> Option<Arc<RuntimeMetrics>> {
    config.enabled.then(|| Arc::new(RuntimeMetrics::new()))
}

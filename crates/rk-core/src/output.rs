//! Output pipelines and the JSON rows they emit.

use std::fmt;

use orion_error::compat_prelude::*;
use orion_error::prelude::*;
use serde::Serialize;

use crate::error::{CoreReason, CoreResult};
use crate::event::EnrichedEvent;
use crate::event::time::{format_instant, format_millis};
use crate::window::{Grouping, WindowAggregate};

// ---------------------------------------------------------------------------
// PipelineId
// ---------------------------------------------------------------------------

/// The three independent output pipelines. Each has its own sink, trigger
/// and checkpoint location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineId {
    /// Enriched events, unwindowed. Late events still flow here.
    Raw,
    /// Global window aggregates.
    TimeKpi,
    /// Per-country window aggregates.
    CountryKpi,
}

impl PipelineId {
    pub const ALL: [PipelineId; 3] = [Self::Raw, Self::TimeKpi, Self::CountryKpi];

    /// Stable name; also the checkpoint id and the `[sinks.<name>]` key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::TimeKpi => "time_kpi",
            Self::CountryKpi => "country_kpi",
        }
    }

    /// Grouping for windowed pipelines, `None` for the raw pipeline.
    pub fn grouping(self) -> Option<Grouping> {
        match self {
            Self::Raw => None,
            Self::TimeKpi => Some(Grouping::Global),
            Self::CountryKpi => Some(Grouping::Country),
        }
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Row shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RawRow<'a> {
    invoice_no: i64,
    country: &'a str,
    timestamp: String,
    total_cost: f64,
    total_items: i64,
    is_order: u8,
    is_return: u8,
}

#[derive(Debug, Serialize)]
struct TimeKpiRow {
    window_start: String,
    window_end: String,
    order_count: u64,
    total_sale_volume: f64,
    average_transaction_size: f64,
    rate_of_return: f64,
}

#[derive(Debug, Serialize)]
struct CountryKpiRow<'a> {
    window_start: String,
    window_end: String,
    country: &'a str,
    order_count: u64,
    total_sale_volume: f64,
    rate_of_return: f64,
}

// ---------------------------------------------------------------------------
// OutputRow
// ---------------------------------------------------------------------------

/// A serialised row ready for a sink.
///
/// `key` identifies the row for keyed (upsert) sinks: `start|end` for global
/// windows, `start|end|country` for country windows, and the zero-padded
/// source offset for raw rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub key: Option<String>,
    pub json: String,
}

impl OutputRow {
    /// Project an enriched event read at `offset`.
    pub fn raw(offset: u64, ev: &EnrichedEvent) -> CoreResult<Self> {
        let row = RawRow {
            invoice_no: ev.event.invoice_no,
            country: &ev.event.country,
            timestamp: format_instant(&ev.event.timestamp),
            total_cost: ev.total_cost,
            total_items: ev.total_items,
            is_order: ev.is_order,
            is_return: ev.is_return,
        };
        Ok(Self {
            key: Some(format!("{offset:020}")),
            json: serde_json::to_string(&row).owe(CoreReason::DataFormat)?,
        })
    }

    /// Serialise a closed window. The row shape follows the aggregate's
    /// grouping.
    pub fn window(agg: &WindowAggregate) -> CoreResult<Self> {
        let start = format_millis(agg.window_start);
        let end = format_millis(agg.window_end);
        let (key, json) = match (&agg.country, agg.average_transaction_size) {
            (Some(country), _) => {
                let key = format!("{start}|{end}|{country}");
                let row = CountryKpiRow {
                    window_start: start,
                    window_end: end,
                    country,
                    order_count: agg.order_count,
                    total_sale_volume: agg.total_sale_volume,
                    rate_of_return: agg.rate_of_return,
                };
                (key, serde_json::to_string(&row))
            }
            (None, Some(avg)) => {
                let key = format!("{start}|{end}");
                let row = TimeKpiRow {
                    window_start: start,
                    window_end: end,
                    order_count: agg.order_count,
                    total_sale_volume: agg.total_sale_volume,
                    average_transaction_size: avg,
                    rate_of_return: agg.rate_of_return,
                };
                (key, serde_json::to_string(&row))
            }
            (None, None) => {
                return Err(StructError::from(CoreReason::DataFormat).with_detail(format!(
                    "global window {start}..{end} has no average_transaction_size"
                )));
            }
        };
        Ok(Self {
            key: Some(key),
            json: json.owe(CoreReason::DataFormat)?,
        })
    }
}

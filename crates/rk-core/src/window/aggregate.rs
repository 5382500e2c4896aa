use serde::{Deserialize, Serialize};

use crate::event::EnrichedEvent;

// ---------------------------------------------------------------------------
// Grouping / GroupKey
// ---------------------------------------------------------------------------

/// How a windowed pipeline partitions events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    Global,
    Country,
}

impl Grouping {
    pub fn key_for(self, ev: &EnrichedEvent) -> GroupKey {
        match self {
            Grouping::Global => GroupKey::Global,
            Grouping::Country => GroupKey::Country(ev.country().to_string()),
        }
    }

    pub fn accepts(self, key: &GroupKey) -> bool {
        matches!(
            (self, key),
            (Grouping::Global, GroupKey::Global) | (Grouping::Country, GroupKey::Country(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Global,
    Country(String),
}

// ---------------------------------------------------------------------------
// WindowId
// ---------------------------------------------------------------------------

/// Identity of one window instance. Field order gives the emission order:
/// `(window_end, window_start, group_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId {
    pub end: i64,
    pub start: i64,
    pub key: GroupKey,
}

// ---------------------------------------------------------------------------
// AggState
// ---------------------------------------------------------------------------

/// Running statistics of one open window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggState {
    pub count: u64,
    pub sum_cost: f64,
    pub sum_return: u64,
}

impl AggState {
    pub fn add(&mut self, ev: &EnrichedEvent) {
        self.count += 1;
        self.sum_cost += ev.total_cost;
        self.sum_return += u64::from(ev.is_return);
    }

    /// Final values for a closing window. The average is only reported for
    /// the global grouping.
    pub fn finish(&self, id: &WindowId) -> WindowAggregate {
        let count = self.count.max(1) as f64;
        let (country, average_transaction_size) = match &id.key {
            GroupKey::Global => (None, Some(self.sum_cost / count)),
            GroupKey::Country(c) => (Some(c.clone()), None),
        };
        WindowAggregate {
            window_start: id.start,
            window_end: id.end,
            country,
            order_count: self.count,
            total_sale_volume: self.sum_cost,
            average_transaction_size,
            rate_of_return: self.sum_return as f64 / count,
        }
    }
}

// ---------------------------------------------------------------------------
// WindowAggregate
// ---------------------------------------------------------------------------

/// Emitted once per closed window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowAggregate {
    pub window_start: i64,
    pub window_end: i64,
    pub country: Option<String>,
    /// Number of accepted events, orders and returns alike.
    pub order_count: u64,
    pub total_sale_volume: f64,
    pub average_transaction_size: Option<f64>,
    pub rate_of_return: f64,
}

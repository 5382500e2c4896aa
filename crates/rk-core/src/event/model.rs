use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Closed set of transaction kinds. Anything else is rejected at decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Order,
    Return,
}

impl EventType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ORDER" => Some(Self::Order),
            "RETURN" => Some(Self::Return),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Order => "ORDER",
            Self::Return => "RETURN",
        }
    }
}

// ---------------------------------------------------------------------------
// Item / Event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub sku: String,
    pub title: String,
    /// Always finite and `>= 0`.
    pub unit_price: f64,
    /// Taken as given, may be negative.
    pub quantity: i64,
}

/// A decoded transaction. `items` is empty when the payload had no items,
/// `null` items or `[]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub invoice_no: i64,
    pub country: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub items: Vec<Item>,
}

impl Event {
    /// Event time in epoch milliseconds.
    pub fn event_time_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

// ---------------------------------------------------------------------------
// EnrichedEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedEvent {
    pub event: Event,
    /// Negative for returns.
    pub total_cost: f64,
    pub total_items: i64,
    pub is_order: u8,
    pub is_return: u8,
}

impl EnrichedEvent {
    pub fn event_time_ms(&self) -> i64 {
        self.event.event_time_ms()
    }

    pub fn country(&self) -> &str {
        &self.event.country
    }
}

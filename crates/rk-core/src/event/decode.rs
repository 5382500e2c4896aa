use serde::Deserialize;

use super::model::{Event, EventType, Item};
use super::time::parse_timestamp;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Why a payload could not become an [`Event`]. Decode failures are per
/// record: the caller drops the record and moves on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("missing field `{0}`")]
    MissingField(String),
    #[error("unknown event type {0:?}")]
    UnknownType(String),
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
}

// ---------------------------------------------------------------------------
// Wire structure
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawEvent {
    invoice_no: Option<i64>,
    country: Option<String>,
    timestamp: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    #[serde(default)]
    items: Option<Vec<RawItem>>,
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(rename = "SKU", alias = "sku")]
    sku: Option<String>,
    title: Option<String>,
    unit_price: Option<f64>,
    quantity: Option<i64>,
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

/// Decode one JSON object into an [`Event`].
///
/// Unknown fields are ignored. `items` may be absent, `null` or `[]`.
pub fn decode(payload: &[u8]) -> Result<Event, DecodeError> {
    let raw: RawEvent =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let invoice_no = raw.invoice_no.ok_or_else(|| missing("invoice_no"))?;
    let country = raw.country.ok_or_else(|| missing("country"))?;

    let ts_str = raw.timestamp.ok_or_else(|| missing("timestamp"))?;
    let timestamp = parse_timestamp(&ts_str).ok_or(DecodeError::InvalidTimestamp(ts_str))?;

    let type_str = raw.event_type.ok_or_else(|| missing("type"))?;
    let event_type = EventType::parse(&type_str).ok_or(DecodeError::UnknownType(type_str))?;

    let raw_items = raw.items.unwrap_or_default();
    let mut items = Vec::with_capacity(raw_items.len());
    for (idx, ri) in raw_items.into_iter().enumerate() {
        items.push(decode_item(idx, ri)?);
    }

    Ok(Event {
        invoice_no,
        country,
        timestamp,
        event_type,
        items,
    })
}

fn decode_item(idx: usize, raw: RawItem) -> Result<Item, DecodeError> {
    let sku = raw
        .sku
        .ok_or_else(|| missing(&format!("items[{idx}].SKU")))?;
    let unit_price = raw
        .unit_price
        .ok_or_else(|| missing(&format!("items[{idx}].unit_price")))?;
    let quantity = raw
        .quantity
        .ok_or_else(|| missing(&format!("items[{idx}].quantity")))?;

    if !unit_price.is_finite() {
        return Err(invalid(idx, "unit_price", "must be finite"));
    }
    if unit_price < 0.0 {
        return Err(invalid(idx, "unit_price", "must be >= 0"));
    }

    Ok(Item {
        sku,
        title: raw.title.unwrap_or_default(),
        unit_price,
        quantity,
    })
}

fn missing(name: &str) -> DecodeError {
    DecodeError::MissingField(name.to_string())
}

fn invalid(idx: usize, field: &str, reason: &str) -> DecodeError {
    DecodeError::InvalidField {
        field: format!("items[{idx}].{field}"),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

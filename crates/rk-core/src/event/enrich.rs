use super::decode::{DecodeError, decode};
use super::model::{EnrichedEvent, Event, EventType};

/// Derive the per-event metrics.
///
/// `total_cost` is summed left to right in item order and negated for
/// returns; no items means zero cost and zero items. A quantity sum outside
/// `i64` is rejected like any other invalid field.
pub fn enrich(event: Event) -> Result<EnrichedEvent, DecodeError> {
    let mut total_cost = 0.0_f64;
    let mut total_items = 0_i64;
    for item in &event.items {
        total_cost += item.quantity as f64 * item.unit_price;
        total_items = total_items
            .checked_add(item.quantity)
            .ok_or_else(|| DecodeError::InvalidField {
                field: "items.quantity".to_string(),
                reason: "sum overflows i64".to_string(),
            })?;
    }

    let (is_order, is_return) = match event.event_type {
        EventType::Order => (1, 0),
        EventType::Return => {
            total_cost = -total_cost;
            (0, 1)
        }
    };

    Ok(EnrichedEvent {
        event,
        total_cost,
        total_items,
        is_order,
        is_return,
    })
}

pub fn decode_and_enrich(payload: &[u8]) -> Result<EnrichedEvent, DecodeError> {
    decode(payload).and_then(enrich)
}

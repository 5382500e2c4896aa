//! Retail transaction events: the typed model, the JSON decoder and the
//! per-event metric enricher.

mod decode;
mod enrich;
mod model;
pub mod time;

pub use decode::{DecodeError, decode};
pub use enrich::{decode_and_enrich, enrich};
pub use model::{EnrichedEvent, Event, EventType, Item};

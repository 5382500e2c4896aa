//! Event-time windowing: watermark tracking, window assignment, window
//! lifecycle and incremental aggregation.

mod aggregate;
mod assign;
mod manager;
mod pipeline;
mod watermark;


pub use aggregate::{AggState, GroupKey, Grouping, WindowAggregate, WindowId};
pub use assign::WindowSpec;
pub use manager::{AssignOutcome, OpenWindow, WindowManager};
pub use pipeline::{BatchOutcome, KpiAggregation, WindowSnapshot};
pub use watermark::WatermarkTracker;

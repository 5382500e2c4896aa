#[macro_use]
mod log_macros;

pub mod error;
mod ingest_task;
pub mod lifecycle;
pub mod metrics;
mod pipeline;
pub mod retry;
mod sink_build;
pub mod source;
pub mod status;
pub mod tracing_init;

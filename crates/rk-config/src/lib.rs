pub mod kpi;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod sink;
pub mod source;
pub mod trigger;
pub mod types;
mod validate;
pub mod window;

pub use kpi::KpiConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use metrics::MetricsConfig;
pub use retry::RetryConfig;
pub use sink::{SinkConfig, SinksConfig};
pub use source::SourceConfig;
pub use trigger::TriggerConfig;
pub use types::{HumanDuration, SinkKind, SourceKind, TriggerPolicy};
pub use window::WindowConfig;

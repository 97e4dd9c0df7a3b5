pub mod metrics;

pub use metrics::{LiveMetrics, MetricsCollector, MetricsSnapshot};

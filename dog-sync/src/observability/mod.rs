pub mod metrics;
pub mod tracing;

pub use metrics::{MetricsSnapshot, PartitionMetrics, SyncMetrics};

#[cfg(feature = "tracing-basic")]
pub use self::tracing::{init_json_tracing, init_tracing};

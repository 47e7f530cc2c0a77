//! Storage adapters.
//!
//! A storage adapter wraps another byte-range source and exposes the same interface.

mod performance_metrics;
mod usage_log;

pub use performance_metrics::PerformanceMetricsStorageAdapter;
pub use usage_log::UsageLogStorageAdapter;

/// Disk usage probes that run the external `du` utility
pub mod probe;

/// Prometheus collector turning `du` output into gauge samples
pub mod usage_collector;

/// Build metadata gauge
pub mod build_info;

pub use build_info::build_info_gauge;
pub use probe::{DuProbe, UsageProbe};
pub use usage_collector::UsageCollector;

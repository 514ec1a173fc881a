//! Telemetry about the monitors themselves.
//!
//! Counters here describe what the trackers did with their input, as
//! opposed to the session records they publish.

pub mod stats;

// Re-export commonly used types
pub use stats::{create_shared_stats, MonitorStats, SharedMonitorStats, StatsSnapshot};

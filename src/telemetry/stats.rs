//! Running counters for a monitor.
//!
//! Every outcome the tracker can reach bumps one counter here, so a caller
//! can see how often gaps were absorbed or timestamps had to be clamped
//! without scraping logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one monitor instance.
#[derive(Debug)]
pub struct MonitorStats {
    /// Signals delivered to the tracker
    signals_received: AtomicU64,
    /// Sessions published to the sink
    sessions_emitted: AtomicU64,
    /// Off signals cancelled by an On inside the debounce window
    gaps_merged: AtomicU64,
    /// Timestamps earlier than the session start
    clock_anomalies: AtomicU64,
    /// On while open, Off while closed
    redundant_signals: AtomicU64,
    /// Timer fires that no longer matched the pending handle
    stale_timer_fires: AtomicU64,
    /// Open sessions discarded by stop
    sessions_dropped: AtomicU64,
    /// Sum of emitted durations
    total_session_ms: AtomicU64,
    /// When the monitor was created
    started_at: DateTime<Utc>,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self {
            signals_received: AtomicU64::new(0),
            sessions_emitted: AtomicU64::new(0),
            gaps_merged: AtomicU64::new(0),
            clock_anomalies: AtomicU64::new(0),
            redundant_signals: AtomicU64::new(0),
            stale_timer_fires: AtomicU64::new(0),
            sessions_dropped: AtomicU64::new(0),
            total_session_ms: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_signal(&self) {
        self.signals_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a published session of the given length.
    pub fn record_session(&self, duration_ms: i64) {
        self.sessions_emitted.fetch_add(1, Ordering::Relaxed);
        self.total_session_ms
            .fetch_add(duration_ms.max(0) as u64, Ordering::Relaxed);
    }

    pub fn record_gap_merged(&self) {
        self.gaps_merged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clock_anomaly(&self) {
        self.clock_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redundant_signal(&self) {
        self.redundant_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_timer_fire(&self) {
        self.stale_timer_fires.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_dropped(&self) {
        self.sessions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            signals_received: self.signals_received.load(Ordering::Relaxed),
            sessions_emitted: self.sessions_emitted.load(Ordering::Relaxed),
            gaps_merged: self.gaps_merged.load(Ordering::Relaxed),
            clock_anomalies: self.clock_anomalies.load(Ordering::Relaxed),
            redundant_signals: self.redundant_signals.load(Ordering::Relaxed),
            stale_timer_fires: self.stale_timer_fires.load(Ordering::Relaxed),
            sessions_dropped: self.sessions_dropped.load(Ordering::Relaxed),
            total_session_ms: self.total_session_ms.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        self.snapshot().summary()
    }
}

impl Default for MonitorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`MonitorStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub signals_received: u64,
    pub sessions_emitted: u64,
    pub gaps_merged: u64,
    pub clock_anomalies: u64,
    pub redundant_signals: u64,
    pub stale_timer_fires: u64,
    pub sessions_dropped: u64,
    pub total_session_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl StatsSnapshot {
    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        format!(
            "Monitor Statistics:\n\
             - Signals received: {}\n\
             - Sessions emitted: {}\n\
             - Gaps merged: {}\n\
             - Redundant signals: {}\n\
             - Clock anomalies: {}\n\
             - Stale timer fires: {}\n\
             - Open sessions dropped: {}\n\
             - Total session time: {:.1} seconds",
            self.signals_received,
            self.sessions_emitted,
            self.gaps_merged,
            self.redundant_signals,
            self.clock_anomalies,
            self.stale_timer_fires,
            self.sessions_dropped,
            self.total_session_ms as f64 / 1000.0
        )
    }
}

/// Thread-safe shared stats.
pub type SharedMonitorStats = Arc<MonitorStats>;

/// Create a new shared stats instance.
pub fn create_shared_stats() -> SharedMonitorStats {
    Arc::new(MonitorStats::new())
}

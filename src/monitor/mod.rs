//! Session monitors for binary state-change signals.
//!
//! This module provides the tracker state machine, its debounce timer and
//! the worker that feeds both from a single serialized queue.

pub mod clock;
pub mod replay;
pub mod sink;
pub mod timer;
pub mod tracker;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use replay::{parse_signal_log, replay, ReplayError, ReplayOutcome};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, MemorySink};
pub use timer::{DebounceTimer, ManualTimer, ThreadTimer, TimerHandle};
pub use tracker::{SessionTracker, TrackerMode, TrackerState, DEFAULT_DEBOUNCE_WINDOW};
pub use types::{
    AppState, GpsState, ParseSignalError, SessionRecord, Signal, SignalEvent, TimestampMs,
    APP_SESSION_KIND, GPS_SESSION_KIND,
};
pub use worker::{
    Monitor, MonitorError, MonitorFamily, MonitorSettings, DEFAULT_QUEUE_CAPACITY,
};

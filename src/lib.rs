//! Falx Monitor - debounced usage-session tracking.
//!
//! This library turns streams of binary state changes (app foreground and
//! background, GPS on and off) into bounded usage sessions and hands them
//! to a telemetry sink.
//!
//! # Session Rules
//!
//! - **One session at a time**: a second `On` while open changes nothing
//! - **Short gaps are absorbed**: in debounced mode an `Off` followed by an
//!   `On` inside the window leaves a single session
//! - **Durations never go negative**: an end before the start is clamped
//! - **No guessed ends**: stopping a monitor drops a session that never closed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Monitor                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  signals ──▶ ┌──────────────┐   ┌────────────────┐           │
//! │              │ command queue│──▶│ SessionTracker │──▶ Sink   │
//! │  timer   ──▶ │  (1 worker)  │   │ plain/debounce │           │
//! │  fires       └──────────────┘   └────────────────┘           │
//! │                     ▲                   │ arm / cancel       │
//! │                     └──── ThreadTimer ◀─┘                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use falx_monitor::monitor::{AppState, ChannelSink, Monitor, MonitorSettings, SystemClock};
//! use std::time::Duration;
//!
//! let (tx, rx) = crossbeam_channel::unbounded();
//! let settings = MonitorSettings::app_state(Duration::from_millis(1_000));
//! let mut monitor = Monitor::spawn(settings, SystemClock, ChannelSink::new(tx))
//!     .expect("Failed to start monitor");
//!
//! monitor.send(AppState::Foreground).unwrap();
//! monitor.send(AppState::Background).unwrap();
//!
//! // The session arrives once the debounce window has passed.
//! let session = rx.recv().unwrap();
//! println!("{} lasted {}ms", session.kind, session.duration_ms());
//! monitor.stop();
//! ```

pub mod config;
pub mod monitor;
pub mod telemetry;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use monitor::{
    Clock, EventSink, Monitor, MonitorError, MonitorSettings, SessionRecord, SessionTracker,
    Signal, TrackerMode,
};
pub use telemetry::{MonitorStats, SharedMonitorStats, StatsSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

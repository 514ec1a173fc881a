//! Signal and session value types.
//!
//! Timestamps are plain milliseconds. They are either epoch-based (from
//! [`SystemClock`](super::clock::SystemClock)) or whatever a fake clock
//! supplies; the tracker only ever subtracts them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Milliseconds as reported by a [`Clock`](super::clock::Clock).
pub type TimestampMs = i64;

/// Session kind emitted by the app foreground monitor.
pub const APP_SESSION_KIND: &str = "app-session";

/// Session kind emitted by the GPS monitor.
pub const GPS_SESSION_KIND: &str = "gps-session";

/// A binary state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// The tracked resource became active (session opens).
    On,
    /// The tracked resource became inactive (session closes).
    Off,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::On => write!(f, "on"),
            Signal::Off => write!(f, "off"),
        }
    }
}

/// Error returned when a string is not a recognised signal name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSignalError(pub String);

impl fmt::Display for ParseSignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown signal: {:?}", self.0)
    }
}

impl std::error::Error for ParseSignalError {}

impl FromStr for Signal {
    type Err = ParseSignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "on" | "start" | "foreground" | "fg" => Ok(Signal::On),
            "off" | "stop" | "background" | "bg" => Ok(Signal::Off),
            other => Err(ParseSignalError(other.to_string())),
        }
    }
}

/// Application visibility as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    Foreground,
    Background,
}

impl From<AppState> for Signal {
    fn from(state: AppState) -> Self {
        match state {
            AppState::Foreground => Signal::On,
            AppState::Background => Signal::Off,
        }
    }
}

/// GPS receiver power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpsState {
    On,
    Off,
}

impl From<GpsState> for Signal {
    fn from(state: GpsState) -> Self {
        match state {
            GpsState::On => Signal::On,
            GpsState::Off => Signal::Off,
        }
    }
}

/// A signal as it arrives from the source.
///
/// When `timestamp` is absent the receiving worker stamps it with its own
/// clock at processing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub signal: Signal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimestampMs>,
}

impl SignalEvent {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            timestamp: None,
        }
    }

    pub fn at(signal: Signal, timestamp: TimestampMs) -> Self {
        Self {
            signal,
            timestamp: Some(timestamp),
        }
    }
}

/// A completed usage session.
///
/// Only the tracker creates these, and it guarantees `end_time >= start_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Signal family that produced the session (e.g. `"gps-session"`)
    pub kind: String,
    /// Session start in milliseconds
    pub start_time: TimestampMs,
    /// Session end in milliseconds
    pub end_time: TimestampMs,
    /// Opaque caller payload (byte counts and the like)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, f64>,
}

impl SessionRecord {
    pub(crate) fn new(
        kind: impl Into<String>,
        start_time: TimestampMs,
        end_time: TimestampMs,
    ) -> Self {
        debug_assert!(end_time >= start_time);
        Self {
            kind: kind.into(),
            start_time,
            end_time,
            extras: BTreeMap::new(),
        }
    }

    /// Attach a caller-supplied counter to the record.
    pub fn with_extra(mut self, key: impl Into<String>, value: f64) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    /// Session length in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }

    /// Start as a UTC instant, if the timestamp is epoch-based and in range.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.start_time)
    }

    /// End as a UTC instant, if the timestamp is epoch-based and in range.
    pub fn end(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.end_time)
    }
}

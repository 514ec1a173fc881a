//! Deterministic replay of recorded signal logs.
//!
//! Replay drives a tracker with a [`ManualClock`] and a [`ManualTimer`]
//! instead of wall time, so the same log always yields the same sessions.
//! Before each signal the clock jumps to its timestamp and any timer that
//! has come due fires first; a fire and a signal at the same millisecond
//! therefore resolve in favour of the fire.

use super::clock::{Clock, ManualClock};
use super::sink::MemorySink;
use super::timer::ManualTimer;
use super::tracker::{SessionTracker, TrackerMode};
use super::types::{SessionRecord, SignalEvent};
use crate::telemetry::{create_shared_stats, StatsSnapshot};
use serde::{Deserialize, Serialize};

/// Result of a replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub records: Vec<SessionRecord>,
    pub stats: StatsSnapshot,
}

/// Errors produced while reading a signal log.
#[derive(Debug)]
pub enum ReplayError {
    /// A line could not be parsed as a signal event.
    Parse { line: usize, message: String },
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::Parse { line, message } => {
                write!(f, "Parse error on line {line}: {message}")
            }
        }
    }
}

impl std::error::Error for ReplayError {}

/// Parse a JSON-lines signal log. Blank lines are skipped.
pub fn parse_signal_log(content: &str) -> Result<Vec<SignalEvent>, ReplayError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| ReplayError::Parse {
                line: index + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Run `events` through a fresh tracker and collect what it publishes.
///
/// Events without a timestamp reuse the previous one (zero for the first).
/// After the last event the clock moves far enough for every pending close
/// to finalize; a session still open at that point is dropped.
pub fn replay(events: &[SignalEvent], kind: &str, mode: TrackerMode) -> ReplayOutcome {
    let first = events.iter().find_map(|e| e.timestamp).unwrap_or(0);
    let clock = ManualClock::new(first);
    let timer = ManualTimer::new(clock.clone());
    let sink = MemorySink::new();
    let stats = create_shared_stats();
    let mut tracker = SessionTracker::new(kind, mode, timer.clone(), sink.clone(), stats.clone());

    let fire_due = |tracker: &mut SessionTracker<ManualTimer>| {
        for handle in timer.due() {
            tracker.on_timer_fired(handle);
        }
    };

    for event in events {
        let now = event.timestamp.unwrap_or_else(|| clock.now_millis());
        clock.set(now);
        fire_due(&mut tracker);
        tracker.on_signal(event.signal, now);
    }

    if let Some(deadline) = timer.last_deadline() {
        if deadline > clock.now_millis() {
            clock.set(deadline);
        }
        fire_due(&mut tracker);
    }
    tracker.stop();

    ReplayOutcome {
        records: sink.take(),
        stats: stats.snapshot(),
    }
}

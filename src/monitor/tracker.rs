//! Session tracking state machine.
//!
//! A tracker turns a serialized stream of [`Signal`]s into
//! [`SessionRecord`]s. It runs in one of two modes:
//!
//! - **Plain**: `On` opens a session, `Off` closes it immediately.
//! - **Debounced**: `Off` only starts a grace period. An `On` inside the
//!   window cancels it and the session carries on; otherwise the timer
//!   fires and the session is published with the `Off` time as its end.
//!
//! ```text
//!            On                 Off (debounced)           timer fired
//!  Closed ────────► Open ───────────────────► Closing ────────────────► Closed
//!                    ▲                            │        (publish)
//!                    └──────────── On ────────────┘
//!                          (gap absorbed)
//! ```
//!
//! The window is judged on signal timestamps. An `On` or `Off` stamped at
//! or past `last_off + window` ends the pending session even if the timer
//! has not fired yet.
//!
//! The tracker does no locking. It must only be driven from one context,
//! timer fires included; the [`Monitor`](super::worker::Monitor) worker
//! arranges that.

use super::sink::EventSink;
use super::timer::{delay_millis, DebounceTimer, TimerHandle};
use super::types::{SessionRecord, Signal, TimestampMs};
use crate::telemetry::SharedMonitorStats;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Grace period used by the app-state monitor unless configured otherwise.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(1_000);

/// How a tracker treats `Off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerMode {
    /// `Off` ends the session at once.
    Plain,
    /// `Off` ends the session only if no `On` follows within `window`.
    Debounced { window: Duration },
}

impl TrackerMode {
    pub fn debounced(window: Duration) -> Self {
        TrackerMode::Debounced { window }
    }
}

/// Mutable tracker state.
///
/// `pending` is set only while a session is open and an `Off` is awaiting
/// confirmation; `last_off` is set exactly when `pending` is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerState {
    pub session_start: Option<TimestampMs>,
    pub last_off: Option<TimestampMs>,
    pub pending: Option<TimerHandle>,
}

/// Owns session boundaries for one signal family.
pub struct SessionTracker<T: DebounceTimer> {
    kind: String,
    mode: TrackerMode,
    timer: T,
    sink: Box<dyn EventSink>,
    stats: SharedMonitorStats,
    state: TrackerState,
    stopped: bool,
}

impl<T: DebounceTimer> SessionTracker<T> {
    pub fn new(
        kind: impl Into<String>,
        mode: TrackerMode,
        timer: T,
        sink: impl EventSink + 'static,
        stats: SharedMonitorStats,
    ) -> Self {
        Self {
            kind: kind.into(),
            mode,
            timer,
            sink: Box::new(sink),
            stats,
            state: TrackerState::default(),
            stopped: false,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn mode(&self) -> TrackerMode {
        self.mode
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_session_open(&self) -> bool {
        self.state.session_start.is_some()
    }

    pub fn session_start(&self) -> Option<TimestampMs> {
        self.state.session_start
    }

    /// True while an `Off` is waiting out the debounce window.
    pub fn has_pending_close(&self) -> bool {
        self.state.pending.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Apply one signal observed at `now`.
    pub fn on_signal(&mut self, signal: Signal, now: TimestampMs) {
        if self.stopped {
            debug!("{}: ignoring {} after stop", self.kind, signal);
            return;
        }

        self.stats.record_signal();
        debug!("{}: signal {} at {}", self.kind, signal, now);

        match (signal, self.mode) {
            (Signal::On, _) => self.on_start(now),
            (Signal::Off, TrackerMode::Plain) => self.close_now(now),
            (Signal::Off, TrackerMode::Debounced { window }) => self.begin_close(now, window),
        }
    }

    /// Deliver a timer fire. Fires for anything but the current pending
    /// handle are ignored.
    pub fn on_timer_fired(&mut self, handle: TimerHandle) {
        if self.stopped || self.state.pending != Some(handle) {
            self.stats.record_stale_timer_fire();
            debug!("{}: ignoring stale timer {}", self.kind, handle.id());
            return;
        }

        self.finalize();
    }

    /// Publish a pending close now instead of waiting for the timer.
    ///
    /// A session with no pending `Off` has no end yet and stays open.
    pub fn flush(&mut self) {
        if self.stopped {
            return;
        }

        self.end_pending();
    }

    /// Cancel any pending timer and discard an open session.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }

        if let Some(handle) = self.state.pending.take() {
            self.timer.cancel(handle);
        }

        if let Some(start) = self.state.session_start {
            self.stats.record_session_dropped();
            info!("{}: dropping open session started at {}", self.kind, start);
        }

        self.state = TrackerState::default();
        self.stopped = true;
    }

    fn on_start(&mut self, now: TimestampMs) {
        let Some(start) = self.state.session_start else {
            self.state.session_start = Some(now);
            debug!("{}: session started at {}", self.kind, now);
            return;
        };

        if self.window_elapsed(now) {
            self.end_pending();
            self.state.session_start = Some(now);
            debug!("{}: session started at {} after debounce window", self.kind, now);
            return;
        }

        if let Some(handle) = self.state.pending.take() {
            self.timer.cancel(handle);
            self.state.last_off = None;
            self.stats.record_gap_merged();
            debug!(
                "{}: resumed within debounce window, continuing session from {}",
                self.kind, start
            );
        } else {
            self.stats.record_redundant_signal();
            debug!("{}: session already in progress, started at {}", self.kind, start);
        }
    }

    fn close_now(&mut self, now: TimestampMs) {
        let Some(start) = self.state.session_start else {
            self.stats.record_redundant_signal();
            debug!("{}: off with no session in progress", self.kind);
            return;
        };

        self.emit(start, now);
    }

    fn begin_close(&mut self, now: TimestampMs, window: Duration) {
        if self.state.session_start.is_none() {
            self.stats.record_redundant_signal();
            debug!("{}: off with no session in progress", self.kind);
            return;
        }

        if self.window_elapsed(now) {
            self.end_pending();
            self.stats.record_redundant_signal();
            debug!("{}: off with no session in progress", self.kind);
            return;
        }

        if let (Some(handle), Some(off)) = (self.state.pending, self.state.last_off) {
            self.timer.cancel(handle);
            debug!("{}: close pending since {} moved to {}", self.kind, off, now);
        }

        self.state.last_off = Some(now);
        let handle = self.timer.arm(window);
        self.state.pending = Some(handle);
        debug!(
            "{}: session end pending, timer {} armed for {}ms",
            self.kind,
            handle.id(),
            window.as_millis()
        );
    }

    /// True when a close is pending and `now` is at or past its deadline.
    fn window_elapsed(&self, now: TimestampMs) -> bool {
        match (self.mode, self.state.pending, self.state.last_off) {
            (TrackerMode::Debounced { window }, Some(_), Some(off)) => {
                now >= off.saturating_add(delay_millis(window))
            }
            _ => false,
        }
    }

    /// Cancel the pending timer and publish the session it was closing.
    fn end_pending(&mut self) {
        if let Some(handle) = self.state.pending {
            self.timer.cancel(handle);
            self.finalize();
        }
    }

    fn finalize(&mut self) {
        match (self.state.session_start, self.state.last_off) {
            (Some(start), Some(off)) => self.emit(start, off),
            _ => self.state = TrackerState::default(),
        }
    }

    fn emit(&mut self, start: TimestampMs, end: TimestampMs) {
        let end = if end < start {
            warn!(
                "{}: end time {} precedes session start {}, clamping",
                self.kind, end, start
            );
            self.stats.record_clock_anomaly();
            start
        } else {
            end
        };

        let record = SessionRecord::new(self.kind.clone(), start, end);
        debug!(
            "{}: session completed, duration (seconds): {}",
            self.kind,
            record.duration_ms() / 1000
        );

        self.state = TrackerState::default();
        self.stats.record_session(record.duration_ms());
        self.sink.publish(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::clock::ManualClock;
    use crate::monitor::sink::MemorySink;
    use crate::monitor::timer::ManualTimer;
    use crate::monitor::types::{APP_SESSION_KIND, GPS_SESSION_KIND};
    use crate::telemetry::create_shared_stats;

    const WINDOW: i64 = 1_000;

    struct Harness {
        clock: ManualClock,
        timer: ManualTimer,
        sink: MemorySink,
        stats: SharedMonitorStats,
        tracker: SessionTracker<ManualTimer>,
    }

    impl Harness {
        fn new(mode: TrackerMode) -> Self {
            let clock = ManualClock::new(0);
            let timer = ManualTimer::new(clock.clone());
            let sink = MemorySink::new();
            let stats = create_shared_stats();
            let kind = match mode {
                TrackerMode::Plain => GPS_SESSION_KIND,
                TrackerMode::Debounced { .. } => APP_SESSION_KIND,
            };
            let tracker =
                SessionTracker::new(kind, mode, timer.clone(), sink.clone(), stats.clone());
            Self {
                clock,
                timer,
                sink,
                stats,
                tracker,
            }
        }

        fn plain() -> Self {
            Self::new(TrackerMode::Plain)
        }

        fn debounced() -> Self {
            Self::new(TrackerMode::debounced(Duration::from_millis(WINDOW as u64)))
        }

        fn advance_to(&mut self, now: TimestampMs) {
            self.clock.set(now);
            for handle in self.timer.due() {
                self.tracker.on_timer_fired(handle);
            }
        }

        fn signal(&mut self, signal: Signal, now: TimestampMs) {
            self.advance_to(now);
            self.tracker.on_signal(signal, now);
        }

        fn spans(&self) -> Vec<(TimestampMs, TimestampMs)> {
            self.sink
                .records()
                .iter()
                .map(|r| (r.start_time, r.end_time))
                .collect()
        }
    }

    #[test]
    fn test_plain_session() {
        let mut h = Harness::plain();
        h.signal(Signal::On, 100);
        assert_eq!(h.tracker.session_start(), Some(100));

        h.signal(Signal::Off, 600);
        assert_eq!(h.spans(), vec![(100, 600)]);
        assert!(!h.tracker.is_session_open());
        assert_eq!(h.sink.records()[0].kind, GPS_SESSION_KIND);
    }

    #[test]
    fn test_plain_repeated_on_keeps_first_start() {
        let mut h = Harness::plain();
        h.signal(Signal::On, 100);
        h.signal(Signal::On, 300);
        assert_eq!(h.tracker.session_start(), Some(100));

        h.signal(Signal::Off, 400);
        h.signal(Signal::Off, 500);
        assert_eq!(h.spans(), vec![(100, 400)]);
        assert_eq!(h.stats.snapshot().redundant_signals, 2);
    }

    #[test]
    fn test_plain_clock_regression_clamps() {
        let mut h = Harness::plain();
        h.signal(Signal::On, 100);
        h.signal(Signal::Off, 50);

        assert_eq!(h.spans(), vec![(100, 100)]);
        assert_eq!(h.sink.records()[0].duration_ms(), 0);
        assert_eq!(h.stats.snapshot().clock_anomalies, 1);
    }

    #[test]
    fn test_debounced_split_after_window() {
        let mut h = Harness::debounced();
        h.signal(Signal::On, 100);
        h.signal(Signal::Off, 600);
        assert!(h.tracker.has_pending_close());

        h.advance_to(600 + WINDOW - 1);
        assert!(h.sink.is_empty());

        h.advance_to(600 + WINDOW);
        assert_eq!(h.spans(), vec![(100, 600)]);
        assert_eq!(h.tracker.state(), TrackerState::default());
    }

    #[test]
    fn test_debounced_merge_within_window() {
        let mut h = Harness::debounced();
        h.signal(Signal::On, 100);
        h.signal(Signal::Off, 600);
        h.signal(Signal::On, 600 + WINDOW - 1);
        assert!(!h.tracker.has_pending_close());
        assert!(h.timer.pending().is_empty());

        let end = 600 + WINDOW - 1 + 500;
        h.signal(Signal::Off, end);
        h.advance_to(end + WINDOW);

        assert_eq!(h.spans(), vec![(100, end)]);
        assert_eq!(h.stats.snapshot().gaps_merged, 1);
    }

    #[test]
    fn test_chained_sessions() {
        let mut h = Harness::debounced();
        h.signal(Signal::On, 100);
        h.signal(Signal::Off, 600);
        h.signal(Signal::On, 600 + WINDOW - 1);
        h.signal(Signal::Off, 1_100);
        h.advance_to(1_100 + WINDOW);
        assert_eq!(h.spans(), vec![(100, 1_100)]);

        let second = 1_100 + WINDOW + 1 + 2_000;
        h.signal(Signal::On, second);
        h.signal(Signal::Off, second + 500);
        h.advance_to(second + 500 + WINDOW);

        assert_eq!(h.spans(), vec![(100, 1_100), (second, second + 500)]);
    }

    #[test]
    fn test_fire_before_on_at_same_instant_splits() {
        let mut h = Harness::debounced();
        h.signal(Signal::On, 100);
        h.signal(Signal::Off, 600);

        // The fire is delivered first, so the On opens a fresh session.
        h.signal(Signal::On, 600 + WINDOW);
        assert_eq!(h.spans(), vec![(100, 600)]);
        assert_eq!(h.tracker.session_start(), Some(600 + WINDOW));
    }

    #[test]
    fn test_stale_fire_is_ignored() {
        let mut h = Harness::debounced();
        h.signal(Signal::On, 100);
        h.signal(Signal::Off, 200);
        let stale = h.timer.pending()[0];

        h.signal(Signal::On, 300);
        h.signal(Signal::Off, 400);

        // A fire for the cancelled handle that was already in flight.
        h.tracker.on_timer_fired(stale);
        assert!(h.sink.is_empty());
        assert!(h.tracker.has_pending_close());
        assert_eq!(h.stats.snapshot().stale_timer_fires, 1);

        h.advance_to(400 + WINDOW);
        assert_eq!(h.spans(), vec![(100, 400)]);
    }

    #[test]
    fn test_debounced_repeated_off_rearms_timer() {
        let mut h = Harness::debounced();
        h.signal(Signal::Off, 50);
        h.signal(Signal::On, 100);
        h.signal(Signal::Off, 600);
        h.signal(Signal::Off, 700);
        assert_eq!(h.timer.pending().len(), 1);

        h.advance_to(600 + WINDOW);
        assert!(h.sink.is_empty());

        h.advance_to(700 + WINDOW);
        assert_eq!(h.spans(), vec![(100, 700)]);
        assert_eq!(h.stats.snapshot().redundant_signals, 1);
    }

    #[test]
    fn test_debounced_repeated_on_keeps_first_start() {
        let mut h = Harness::debounced();
        h.signal(Signal::On, 100);
        h.signal(Signal::On, 300);
        assert_eq!(h.tracker.session_start(), Some(100));
        assert!(!h.tracker.has_pending_close());
        assert!(h.sink.is_empty());
        assert_eq!(h.stats.snapshot().redundant_signals, 1);

        h.signal(Signal::Off, 400);
        h.advance_to(400 + WINDOW);
        assert_eq!(h.spans(), vec![(100, 400)]);
        assert_eq!(h.stats.snapshot().redundant_signals, 1);
        assert_eq!(h.stats.snapshot().gaps_merged, 0);
    }

    #[test]
    fn test_on_past_window_splits_before_timer_fires() {
        let mut h = Harness::debounced();
        h.signal(Signal::On, 100);
        h.signal(Signal::Off, 600);

        // The clock driving the timer lags the signal timestamps.
        h.tracker.on_signal(Signal::On, 600 + WINDOW);
        assert_eq!(h.spans(), vec![(100, 600)]);
        assert_eq!(h.tracker.session_start(), Some(600 + WINDOW));
        assert!(h.timer.pending().is_empty());
        assert_eq!(h.stats.snapshot().gaps_merged, 0);
    }

    #[test]
    fn test_off_past_window_closes_pending_session() {
        let mut h = Harness::debounced();
        h.signal(Signal::On, 100);
        h.signal(Signal::Off, 600);

        h.tracker.on_signal(Signal::Off, 600 + WINDOW + 50);
        assert_eq!(h.spans(), vec![(100, 600)]);
        assert!(!h.tracker.is_session_open());
        assert!(h.timer.pending().is_empty());
        assert_eq!(h.stats.snapshot().redundant_signals, 1);
    }

    #[test]
    fn test_huge_window_never_elapses() {
        let mut h = Harness::new(TrackerMode::debounced(Duration::MAX));
        h.signal(Signal::On, 100);
        h.signal(Signal::Off, 600);
        h.signal(Signal::On, 1_000_000_000);

        assert!(h.sink.is_empty());
        assert_eq!(h.tracker.session_start(), Some(100));
        assert_eq!(h.stats.snapshot().gaps_merged, 1);
    }

    #[test]
    fn test_debounced_clock_regression_clamps() {
        let mut h = Harness::debounced();
        h.signal(Signal::On, 100);
        // The timer counts from the clock, which still reads 100.
        h.tracker.on_signal(Signal::Off, 50);
        h.advance_to(100 + WINDOW);

        assert_eq!(h.spans(), vec![(100, 100)]);
    }

    #[test]
    fn test_flush_publishes_pending_close() {
        let mut h = Harness::debounced();
        h.signal(Signal::On, 100);
        h.tracker.flush();
        assert!(h.sink.is_empty());
        assert!(h.tracker.is_session_open());

        h.signal(Signal::Off, 600);
        h.tracker.flush();
        assert_eq!(h.spans(), vec![(100, 600)]);
        assert!(h.timer.pending().is_empty());
    }

    #[test]
    fn test_stop_drops_open_session() {
        let mut h = Harness::debounced();
        h.signal(Signal::On, 100);
        h.tracker.stop();

        assert!(h.sink.is_empty());
        assert!(h.tracker.is_stopped());
        assert_eq!(h.stats.snapshot().sessions_dropped, 1);
    }

    #[test]
    fn test_stop_cancels_pending_timer() {
        let mut h = Harness::debounced();
        h.signal(Signal::On, 100);
        h.signal(Signal::Off, 600);
        h.tracker.stop();
        h.tracker.stop();

        assert!(h.timer.pending().is_empty());
        h.advance_to(600 + WINDOW);
        assert!(h.sink.is_empty());

        h.signal(Signal::On, 5_000);
        h.signal(Signal::Off, 6_000);
        assert!(h.sink.is_empty());
        assert!(!h.tracker.is_session_open());
    }

    #[test]
    fn test_sessions_never_overlap() {
        let mut h = Harness::debounced();
        let mut now = 0;
        for step in 0..40 {
            let signal = if step % 2 == 0 { Signal::On } else { Signal::Off };
            now += 150 + (step * 97) % 1_300;
            h.signal(signal, now);
        }
        h.advance_to(now + WINDOW);

        let spans = h.spans();
        assert!(!spans.is_empty());
        for (start, end) in &spans {
            assert!(end >= start);
        }
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0);
        }
    }
}

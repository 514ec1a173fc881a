//! Serialized delivery of signals to a tracker.
//!
//! A [`Monitor`] owns one worker thread that drains a bounded command
//! queue. Signals, timer fires and flushes all travel through that queue,
//! so the tracker only ever runs on the worker and never sees two inputs at
//! once. The debounce timer thread does not touch the tracker: its callback
//! posts a `TimerFired` command and the worker delivers it in turn.

use super::clock::Clock;
use super::sink::EventSink;
use super::timer::{ThreadTimer, TimerHandle};
use super::tracker::{SessionTracker, TrackerMode, DEFAULT_DEBOUNCE_WINDOW};
use super::types::{Signal, SignalEvent, TimestampMs, APP_SESSION_KIND, GPS_SESSION_KIND};
use crate::config::Config;
use crate::telemetry::{create_shared_stats, SharedMonitorStats};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Queue bound used when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

enum Command {
    Signal {
        signal: Signal,
        at: Option<TimestampMs>,
    },
    TimerFired(TimerHandle),
    Flush,
    Stop,
}

/// What a monitor tracks and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Kind stamped on every published record
    pub kind: String,
    /// Plain or debounced tracking
    pub mode: TrackerMode,
    /// Bound of the command queue
    pub queue_capacity: usize,
}

impl MonitorSettings {
    pub fn new(kind: impl Into<String>, mode: TrackerMode) -> Self {
        Self {
            kind: kind.into(),
            mode,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Foreground/background tracking that absorbs short background flickers.
    pub fn app_state(window: Duration) -> Self {
        Self::new(APP_SESSION_KIND, TrackerMode::debounced(window))
    }

    /// GPS on/off tracking with no flicker tolerance.
    pub fn gps() -> Self {
        Self::new(GPS_SESSION_KIND, TrackerMode::Plain)
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Take the debounce window and queue bound from the configuration.
    pub fn from_config(config: &Config, family: MonitorFamily) -> Self {
        let settings = match family {
            MonitorFamily::App => Self::app_state(config.debounce_window),
            MonitorFamily::Gps => Self::gps(),
        };
        settings.with_queue_capacity(config.queue_capacity)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::app_state(DEFAULT_DEBOUNCE_WINDOW)
    }
}

/// Signal families with a built-in monitor preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorFamily {
    App,
    Gps,
}

/// Errors returned by a [`Monitor`].
#[derive(Debug)]
pub enum MonitorError {
    /// The monitor was stopped (or its worker exited).
    Stopped,
    /// A worker or timer thread could not be started.
    Spawn(String),
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::Stopped => write!(f, "Monitor is stopped"),
            MonitorError::Spawn(e) => write!(f, "Failed to start monitor thread: {e}"),
        }
    }
}

impl std::error::Error for MonitorError {}

/// A running session monitor.
pub struct Monitor {
    kind: String,
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    stats: SharedMonitorStats,
}

impl Monitor {
    /// Start the worker and timer threads.
    ///
    /// `clock` stamps signals sent without an explicit timestamp.
    pub fn spawn<C, S>(settings: MonitorSettings, clock: C, sink: S) -> Result<Self, MonitorError>
    where
        C: Clock + 'static,
        S: EventSink + 'static,
    {
        let (sender, receiver) = bounded(settings.queue_capacity.max(1));
        let stats = create_shared_stats();

        let fire_sender = sender.clone();
        let timer = ThreadTimer::new(move |handle| {
            if fire_sender.send(Command::TimerFired(handle)).is_err() {
                debug!("Monitor gone, dropping timer {}", handle.id());
            }
        })
        .map_err(|e| MonitorError::Spawn(e.to_string()))?;

        let tracker = SessionTracker::new(
            settings.kind.clone(),
            settings.mode,
            timer,
            sink,
            stats.clone(),
        );

        let worker = thread::Builder::new()
            .name(format!("{}-monitor", settings.kind))
            .spawn(move || run_worker(receiver, tracker, clock))
            .map_err(|e| MonitorError::Spawn(e.to_string()))?;

        info!("{}: monitor started ({:?})", settings.kind, settings.mode);

        Ok(Self {
            kind: settings.kind,
            sender: Some(sender),
            worker: Some(worker),
            stats,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn stats(&self) -> &SharedMonitorStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.sender.is_some()
    }

    /// Queue a signal to be stamped by the monitor's clock when processed.
    pub fn send(&self, signal: impl Into<Signal>) -> Result<(), MonitorError> {
        self.post(Command::Signal {
            signal: signal.into(),
            at: None,
        })
    }

    /// Queue a signal observed at `timestamp`.
    pub fn send_at(
        &self,
        signal: impl Into<Signal>,
        timestamp: TimestampMs,
    ) -> Result<(), MonitorError> {
        self.post(Command::Signal {
            signal: signal.into(),
            at: Some(timestamp),
        })
    }

    pub fn send_event(&self, event: SignalEvent) -> Result<(), MonitorError> {
        self.post(Command::Signal {
            signal: event.signal,
            at: event.timestamp,
        })
    }

    /// Publish a pending close without waiting out the debounce window.
    pub fn flush(&self) -> Result<(), MonitorError> {
        self.post(Command::Flush)
    }

    /// Stop the worker, cancelling any pending timer. An open session is
    /// dropped. Everything queued before the call is processed first.
    pub fn stop(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };

        if sender.send(Command::Stop).is_err() {
            warn!("{}: worker already exited", self.kind);
        }
        drop(sender);

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("{}: worker panicked", self.kind);
            }
        }

        info!("{}: monitor stopped", self.kind);
    }

    fn post(&self, command: Command) -> Result<(), MonitorError> {
        let sender = self.sender.as_ref().ok_or(MonitorError::Stopped)?;
        sender.send(command).map_err(|_| MonitorError::Stopped)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<C: Clock>(
    receiver: Receiver<Command>,
    mut tracker: SessionTracker<ThreadTimer>,
    clock: C,
) {
    for command in receiver.iter() {
        match command {
            Command::Signal { signal, at } => {
                let now = at.unwrap_or_else(|| clock.now_millis());
                tracker.on_signal(signal, now);
            }
            Command::TimerFired(handle) => tracker.on_timer_fired(handle),
            Command::Flush => tracker.flush(),
            Command::Stop => break,
        }
    }

    tracker.stop();

    // The timer thread may be blocked posting into a full queue; close the
    // queue before joining it.
    drop(receiver);
    drop(tracker);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::clock::ManualClock;
    use crate::monitor::sink::MemorySink;
    use crate::monitor::types::GpsState;

    #[test]
    fn test_settings_presets() {
        let app = MonitorSettings::app_state(Duration::from_millis(250));
        assert_eq!(app.kind, APP_SESSION_KIND);
        assert_eq!(app.mode, TrackerMode::debounced(Duration::from_millis(250)));

        let gps = MonitorSettings::gps().with_queue_capacity(8);
        assert_eq!(gps.kind, GPS_SESSION_KIND);
        assert_eq!(gps.mode, TrackerMode::Plain);
        assert_eq!(gps.queue_capacity, 8);
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config {
            debounce_window: Duration::from_millis(1_500),
            queue_capacity: 64,
            ..Config::default()
        };

        let app = MonitorSettings::from_config(&config, MonitorFamily::App);
        assert_eq!(app.mode, TrackerMode::debounced(Duration::from_millis(1_500)));
        assert_eq!(app.queue_capacity, 64);

        let gps = MonitorSettings::from_config(&config, MonitorFamily::Gps);
        assert_eq!(gps.mode, TrackerMode::Plain);
    }

    #[test]
    fn test_stop_processes_queued_signals_first() {
        let clock = ManualClock::new(100);
        let sink = MemorySink::new();
        let mut monitor =
            Monitor::spawn(MonitorSettings::gps(), clock.clone(), sink.clone()).unwrap();

        monitor.send(GpsState::On).unwrap();
        monitor.send_at(GpsState::Off, 900).unwrap();
        monitor.stop();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].start_time, records[0].end_time), (100, 900));
    }

    #[test]
    fn test_send_after_stop_is_rejected() {
        let settings = MonitorSettings::gps();
        let mut monitor = Monitor::spawn(settings, ManualClock::new(0), MemorySink::new()).unwrap();
        monitor.stop();
        monitor.stop();

        assert!(!monitor.is_running());
        assert!(matches!(monitor.send(Signal::On), Err(MonitorError::Stopped)));
        assert!(matches!(monitor.flush(), Err(MonitorError::Stopped)));
    }
}

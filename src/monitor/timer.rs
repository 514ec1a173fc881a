//! One-shot delayed actions with cancel and re-arm.
//!
//! A timer is built with a single fire callback that receives the handle
//! that came due. Handles are drawn from a per-timer counter, so a consumer
//! can decide whether a fire is still current by comparing integers.
//!
//! Neither `arm` nor `cancel` ever runs the callback: [`ThreadTimer`] fires
//! from its own thread, [`ManualTimer`] only reports due handles when asked.

use super::clock::{Clock, ManualClock};
use super::types::TimestampMs;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Identifies one `arm` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// `delay` in whole milliseconds, saturating at `i64::MAX`.
pub(crate) fn delay_millis(delay: Duration) -> i64 {
    i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)
}

/// A schedulable one-shot delay.
pub trait DebounceTimer {
    /// Schedule a fire `delay` from now.
    fn arm(&mut self, delay: Duration) -> TimerHandle;

    /// Cancel a scheduled fire. Unknown, fired and already cancelled
    /// handles are ignored.
    fn cancel(&mut self, handle: TimerHandle);
}

enum TimerRequest {
    Arm { handle: TimerHandle, deadline: Instant },
    Cancel(TimerHandle),
    Shutdown,
}

/// Timer backed by one background thread.
///
/// The callback runs on that thread. Callers that need fires on another
/// context (the monitor worker) should have the callback post a message
/// there rather than act directly.
pub struct ThreadTimer {
    next_id: u64,
    requests: Sender<TimerRequest>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadTimer {
    /// Start the timer thread.
    pub fn new<F>(on_fire: F) -> std::io::Result<Self>
    where
        F: Fn(TimerHandle) + Send + 'static,
    {
        let (requests, inbox) = unbounded();

        let thread = thread::Builder::new()
            .name("debounce-timer".to_string())
            .spawn(move || {
                let mut deadlines: BTreeSet<(Instant, TimerHandle)> = BTreeSet::new();
                let mut armed: HashMap<TimerHandle, Instant> = HashMap::new();

                loop {
                    let next = deadlines.first().copied();
                    let request = match next {
                        Some((deadline, _)) => {
                            let wait = deadline.saturating_duration_since(Instant::now());
                            inbox.recv_timeout(wait)
                        }
                        None => inbox.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };

                    match request {
                        Ok(TimerRequest::Arm { handle, deadline }) => {
                            deadlines.insert((deadline, handle));
                            armed.insert(handle, deadline);
                        }
                        Ok(TimerRequest::Cancel(handle)) => {
                            if let Some(deadline) = armed.remove(&handle) {
                                deadlines.remove(&(deadline, handle));
                            }
                        }
                        Ok(TimerRequest::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            let now = Instant::now();
                            while let Some(&(deadline, handle)) = deadlines.first() {
                                if deadline > now {
                                    break;
                                }
                                deadlines.remove(&(deadline, handle));
                                armed.remove(&handle);
                                on_fire(handle);
                            }
                        }
                    }
                }
            })?;

        Ok(Self {
            next_id: 0,
            requests,
            thread: Some(thread),
        })
    }
}

impl DebounceTimer for ThreadTimer {
    fn arm(&mut self, delay: Duration) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        // A deadline past what `Instant` can represent never comes due.
        let Some(deadline) = Instant::now().checked_add(delay) else {
            tracing::debug!(
                "Timer {} delay {:?} out of range, never firing",
                handle.0,
                delay
            );
            return handle;
        };
        if self
            .requests
            .send(TimerRequest::Arm { handle, deadline })
            .is_err()
        {
            tracing::warn!("Timer thread is gone, handle {} will never fire", handle.0);
        }
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        let _ = self.requests.send(TimerRequest::Cancel(handle));
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        let _ = self.requests.send(TimerRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Timer thread panicked");
            }
        }
    }
}

#[derive(Debug, Default)]
struct ManualTimerState {
    next_id: u64,
    armed: Vec<(TimestampMs, TimerHandle)>,
}

/// Deterministic timer driven by a [`ManualClock`].
///
/// Deadlines are measured on the clock; [`due`](Self::due) hands back
/// whatever has come due so the caller can deliver the fires itself.
/// Clones share state.
#[derive(Debug, Clone)]
pub struct ManualTimer {
    clock: ManualClock,
    state: Arc<Mutex<ManualTimerState>>,
}

impl ManualTimer {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(ManualTimerState::default())),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ManualTimerState) -> R) -> R {
        match self.state.lock() {
            Ok(mut state) => f(&mut *state),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }

    /// Remove and return handles whose deadline is at or before the clock,
    /// earliest first.
    pub fn due(&self) -> Vec<TimerHandle> {
        let now = self.clock.now_millis();
        self.with_state(|state| {
            state.armed.sort();
            let split = state.armed.partition_point(|(deadline, _)| *deadline <= now);
            state.armed.drain(..split).map(|(_, handle)| handle).collect()
        })
    }

    /// Handles still armed, earliest deadline first.
    pub fn pending(&self) -> Vec<TimerHandle> {
        self.with_state(|state| {
            state.armed.sort();
            state.armed.iter().map(|(_, handle)| *handle).collect()
        })
    }

    /// Latest armed deadline, if any.
    pub fn last_deadline(&self) -> Option<TimestampMs> {
        self.with_state(|state| state.armed.iter().map(|(deadline, _)| *deadline).max())
    }
}

impl DebounceTimer for ManualTimer {
    fn arm(&mut self, delay: Duration) -> TimerHandle {
        let deadline = self.clock.now_millis().saturating_add(delay_millis(delay));
        self.with_state(|state| {
            state.next_id += 1;
            let handle = TimerHandle(state.next_id);
            state.armed.push((deadline, handle));
            handle
        })
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.with_state(|state| state.armed.retain(|(_, armed)| *armed != handle));
    }
}

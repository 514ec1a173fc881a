//! Demonstration of debounced session tracking.
//!
//! This example replays the same foreground/background log through both
//! tracker modes to show how short background flickers are absorbed.
//!
//! Run with: cargo run --example replay_demo

use falx_monitor::monitor::{
    replay, Signal, SignalEvent, TrackerMode, APP_SESSION_KIND, DEFAULT_DEBOUNCE_WINDOW,
};

fn main() {
    println!("Falx Monitor - Replay Demo");
    println!("==========================");
    println!();

    let window = DEFAULT_DEBOUNCE_WINDOW.as_millis() as i64;

    // Foreground at 100, a flicker to background that returns just inside
    // the window, then a long gap before a second, independent session.
    let events = vec![
        SignalEvent::at(Signal::On, 100),
        SignalEvent::at(Signal::Off, 600),
        SignalEvent::at(Signal::On, 600 + window - 1),
        SignalEvent::at(Signal::Off, 1_100 + window),
        SignalEvent::at(Signal::On, 10_000),
        SignalEvent::at(Signal::Off, 10_500),
    ];

    for (label, mode) in [
        ("plain", TrackerMode::Plain),
        ("debounced", TrackerMode::debounced(DEFAULT_DEBOUNCE_WINDOW)),
    ] {
        let outcome = replay(&events, APP_SESSION_KIND, mode);
        println!("{label}: {} session(s)", outcome.records.len());
        for record in &outcome.records {
            println!(
                "  {} -> {} ({}ms)",
                record.start_time,
                record.end_time,
                record.duration_ms()
            );
        }
        println!();
    }
}

//! Falx Monitor CLI
//!
//! Feeds state-change signals into a session monitor and prints the
//! sessions it produces.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::RecvTimeoutError;
use falx_monitor::{
    config::Config,
    monitor::{
        parse_signal_log, replay, EventSink, JsonLinesSink, Monitor, MonitorFamily,
        MonitorSettings, SessionRecord, Signal, SystemClock, TrackerMode,
    },
    VERSION,
};
use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "falx-monitor")]
#[command(version = VERSION)]
#[command(about = "Debounced usage-session tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read signals from stdin (one per line) and report sessions live
    Run {
        /// Which monitor preset to use
        #[arg(long, value_enum, default_value = "app")]
        monitor: MonitorArg,

        /// Override the debounce window in milliseconds
        #[arg(long)]
        window_ms: Option<u64>,

        /// Don't write sessions to the export directory
        #[arg(long)]
        no_export: bool,
    },

    /// Replay a JSON-lines signal log deterministically
    Replay {
        /// Signal log, one {"signal": "on|off", "timestamp": ms} per line
        file: PathBuf,

        /// Which monitor preset to use
        #[arg(long, value_enum, default_value = "app")]
        monitor: MonitorArg,

        /// Override the debounce window in milliseconds
        #[arg(long)]
        window_ms: Option<u64>,
    },

    /// Show configuration
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MonitorArg {
    /// Foreground/background sessions, debounced
    App,
    /// GPS on/off sessions, no debounce
    Gps,
}

impl From<MonitorArg> for MonitorFamily {
    fn from(arg: MonitorArg) -> Self {
        match arg {
            MonitorArg::App => MonitorFamily::App,
            MonitorArg::Gps => MonitorFamily::Gps,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config, using defaults: {e}");
            Config::default()
        }
    };
    init_logging(&config);

    match cli.command {
        Commands::Run {
            monitor,
            window_ms,
            no_export,
        } => cmd_run(&config, monitor, window_ms, !no_export),
        Commands::Replay {
            file,
            monitor,
            window_ms,
        } => cmd_replay(&config, &file, monitor, window_ms),
        Commands::Config => cmd_config(&config),
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn settings_for(config: &Config, monitor: MonitorArg, window_ms: Option<u64>) -> MonitorSettings {
    let mut settings = MonitorSettings::from_config(config, monitor.into());
    if let (Some(ms), TrackerMode::Debounced { .. }) = (window_ms, settings.mode) {
        settings.mode = TrackerMode::debounced(Duration::from_millis(ms));
    }
    settings
}

fn describe(record: &SessionRecord) -> String {
    let end = record
        .end()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| record.end_time.to_string());
    format!(
        "[{end}] {} completed: {:.1}s ({} -> {})",
        record.kind,
        record.duration_ms() as f64 / 1000.0,
        record.start_time,
        record.end_time
    )
}

fn cmd_run(
    config: &Config,
    monitor: MonitorArg,
    window_ms: Option<u64>,
    export: bool,
) -> Result<()> {
    let settings = settings_for(config, monitor, window_ms);

    println!("Falx Monitor v{VERSION}");
    println!();
    println!("  Monitor: {}", settings.kind);
    match settings.mode {
        TrackerMode::Plain => println!("  Debounce: disabled"),
        TrackerMode::Debounced { window } => {
            println!("  Debounce window: {}ms", window.as_millis())
        }
    }

    let mut exporter = if export {
        let path = open_export(config)?;
        println!("  Export: {}", path.display());
        let file = File::create(&path)
            .with_context(|| format!("Failed to create export file {}", path.display()))?;
        Some(JsonLinesSink::new(file))
    } else {
        println!("  Export: disabled");
        None
    };

    println!();
    println!("Enter on/off (or foreground/background), 'flush' to close a pending session.");
    println!("Press Ctrl+C or end input to stop");
    println!();

    let sink = move |record: SessionRecord| {
        println!("{}", describe(&record));
        if let Some(ref mut exporter) = exporter {
            exporter.publish(record);
        }
    };

    let mut monitor =
        Monitor::spawn(settings, SystemClock, sink).context("Failed to start monitor")?;

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")?;

    let (line_tx, line_rx) = crossbeam_channel::bounded::<String>(256);
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        })
        .context("Failed to start stdin reader")?;

    while running.load(Ordering::SeqCst) {
        let line = match line_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let result = if input.eq_ignore_ascii_case("flush") {
            monitor.flush()
        } else {
            match input.parse::<Signal>() {
                Ok(signal) => monitor.send(signal),
                Err(e) => {
                    eprintln!("Ignoring input: {e}");
                    continue;
                }
            }
        };
        result.context("Monitor stopped unexpectedly")?;
    }

    // A close still waiting out its window has a known end; publish it.
    println!();
    println!("Stopping monitor...");
    if let Err(e) = monitor.flush() {
        tracing::warn!("Final flush failed: {}", e);
    }
    monitor.stop();

    println!();
    println!("{}", monitor.stats().summary());
    Ok(())
}

fn open_export(config: &Config) -> Result<PathBuf> {
    config
        .ensure_directories()
        .context("Could not create export directory")?;
    Ok(config.export_path.join(format!(
        "sessions_{}.jsonl",
        Utc::now().format("%Y%m%d_%H%M%S")
    )))
}

fn cmd_replay(
    config: &Config,
    file: &Path,
    monitor: MonitorArg,
    window_ms: Option<u64>,
) -> Result<()> {
    let settings = settings_for(config, monitor, window_ms);

    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read signal log {}", file.display()))?;
    let events = parse_signal_log(&content)
        .with_context(|| format!("Failed to parse signal log {}", file.display()))?;

    let outcome = replay(&events, &settings.kind, settings.mode);
    for record in &outcome.records {
        println!("{}", serde_json::to_string(record)?);
    }

    eprintln!();
    eprintln!("{}", outcome.stats.summary());
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

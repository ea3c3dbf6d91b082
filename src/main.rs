use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

mod config;
mod core;
mod display;
mod quotes;
mod render;
mod services;

use crate::config::{OutputMode, RuntimeConfig, StyleConfig, TimeSourceMode};
use crate::core::scheduler::{Cadence, Control, RefreshScheduler};
use crate::display::{DisplaySink, FanOutSink, FramebufferSink, PngSink, RawSink};
use crate::quotes::model::TimeKey;
use crate::quotes::store::{ColumnOrder, DuplicatePolicy, LoadOptions, QuoteStore};
use crate::render::engine::Renderer;
use crate::services::clock::{FixedClock, LocalClock, NtpClock, TimeSource};

#[derive(Parser, Debug)]
#[command(name = "quoteclock", about = "Literary quote clock")]
struct Args {
    /// Tab-separated quote table, one row per minute
    #[arg(short, long, default_value = "TTQC_quotes.tsv")]
    quotes: PathBuf,

    /// Style configuration (JSON); a sample is written if missing
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Output modes, comma separated: png, raw, framebuffer
    #[arg(long, value_delimiter = ',', default_value = "png")]
    output: Vec<OutputMode>,

    /// Output file path (for png mode)
    #[arg(short = 'o', long, default_value = "time_image.png")]
    output_path: PathBuf,

    /// Framebuffer device (for framebuffer mode)
    #[arg(long, default_value = "/dev/fb0")]
    fb_device: PathBuf,

    /// Keep running, refreshing at the top of each minute
    #[arg(long)]
    interval: bool,

    /// Refresh every N seconds instead of on the minute (implies --interval)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    interval_seconds: Option<u64>,

    /// Take the time from NTP instead of the local clock
    #[arg(long)]
    ntp: bool,

    /// NTP server to try before the default pool (implies --ntp)
    #[arg(long)]
    ntp_server: Option<String>,

    /// Show a fixed minute (HH:MM) instead of the current time
    #[arg(long, conflicts_with_all = ["ntp", "ntp_server"])]
    at: Option<TimeKey>,

    /// Duplicate time keys: last, first, reject
    #[arg(long, default_value = "last")]
    duplicates: DuplicatePolicy,

    /// Text column order: reading (prefix, time phrase, suffix) or named
    /// (Quote_Time, Quote_Part1, Quote_Part2)
    #[arg(long, default_value = "reading")]
    columns: ColumnOrder,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn runtime_config(self) -> RuntimeConfig {
        let time_source = match (self.at, self.ntp || self.ntp_server.is_some()) {
            (Some(key), _) => TimeSourceMode::Fixed(key),
            (None, true) => TimeSourceMode::Ntp {
                server: self.ntp_server,
            },
            (None, false) => TimeSourceMode::Local,
        };
        let mut outputs = Vec::with_capacity(self.output.len());
        for mode in self.output {
            if !outputs.contains(&mode) {
                outputs.push(mode);
            }
        }

        RuntimeConfig {
            quotes_path: self.quotes,
            style_path: self.config,
            outputs,
            output_path: self.output_path,
            fb_device: self.fb_device,
            periodic: self.interval || self.interval_seconds.is_some(),
            interval_secs: self.interval_seconds,
            time_source,
            duplicates: self.duplicates,
            columns: self.columns,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout may carry raw pixels, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.parse().unwrap_or_default()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("quoteclock v{} starting", env!("CARGO_PKG_VERSION"));
    let config = args.runtime_config();

    let style = StyleConfig::load(&config.style_path).context("Failed to load style configuration")?;
    let options = LoadOptions {
        duplicates: config.duplicates,
        columns: config.columns,
    };
    let store = QuoteStore::from_path(&config.quotes_path, options)
        .with_context(|| format!("Failed to load quotes from {}", config.quotes_path.display()))?;
    let renderer = Renderer::new(&style).context("Failed to load fonts")?;
    let clock = time_source(&config.time_source);
    let sink = open_sinks(&config)?;

    let cadence = match config.interval_secs {
        Some(secs) => Cadence::Every(Duration::from_secs(secs)),
        None => Cadence::MinuteAligned,
    };
    let mut scheduler = RefreshScheduler::new(store, clock, renderer, sink, cadence);

    if !config.periodic {
        let shown = scheduler.run_once().await.context("Failed to display quote")?;
        info!("Displayed quote for {}", shown);
        return Ok(());
    }

    info!("Press 'r' + Enter to refresh now, 'q' + Enter or Ctrl-C to quit");
    let listeners = spawn_control_listeners(scheduler.control_sender());
    scheduler.run().await;

    for handle in listeners {
        handle.abort();
    }
    info!("quoteclock shutdown");
    Ok(())
}

fn time_source(mode: &TimeSourceMode) -> Box<dyn TimeSource> {
    match mode {
        TimeSourceMode::Local => Box::new(LocalClock),
        TimeSourceMode::Ntp { server } => Box::new(NtpClock::new(server.clone())),
        TimeSourceMode::Fixed(key) => Box::new(FixedClock(*key)),
    }
}

fn open_sinks(config: &RuntimeConfig) -> Result<Box<dyn DisplaySink>> {
    let mut sinks: Vec<Box<dyn DisplaySink>> = Vec::new();
    for mode in &config.outputs {
        let sink: Box<dyn DisplaySink> = match mode {
            OutputMode::Png => Box::new(PngSink::new(config.output_path.clone())),
            OutputMode::Raw => Box::new(RawSink::stdout()),
            OutputMode::Framebuffer => Box::new(
                FramebufferSink::open(&config.fb_device)
                    .with_context(|| format!("Failed to open {}", config.fb_device.display()))?,
            ),
        };
        debug!("Output: {}", sink.name());
        sinks.push(sink);
    }

    match sinks.len() {
        1 => Ok(sinks.remove(0)),
        _ => Ok(Box::new(FanOutSink::new(sinks))),
    }
}

/// Feed key presses and signals into the scheduler
fn spawn_control_listeners(tx: mpsc::Sender<Control>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    // Blocking stdin lives on its own thread so it cannot hold up shutdown
    let keys = tx.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            let control = match line.trim() {
                "r" | "R" => Control::RefreshNow,
                "q" | "Q" => Control::Stop,
                _ => continue,
            };
            if keys.blocking_send(control).is_err() {
                break;
            }
        }
    });

    let ctrl_c = tx.clone();
    handles.push(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = ctrl_c.send(Control::Stop).await;
        }
    }));

    #[cfg(unix)]
    handles.push(tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut term, mut usr1) = match (signal(SignalKind::terminate()), signal(SignalKind::user_defined1())) {
            (Ok(term), Ok(usr1)) => (term, usr1),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Signal handlers unavailable: {}", e);
                return;
            }
        };
        loop {
            let control = tokio::select! {
                Some(()) = term.recv() => Control::Stop,
                Some(()) = usr1.recv() => Control::RefreshNow,
                else => break,
            };
            debug!("Signal received: {:?}", control);
            if tx.send(control).await.is_err() {
                break;
            }
        }
    }));

    handles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> RuntimeConfig {
        let argv = std::iter::once("quoteclock").chain(args.iter().copied());
        Args::try_parse_from(argv).unwrap().runtime_config()
    }

    #[test]
    fn test_repeated_outputs_open_once() {
        let cfg = config(&["--output", "png,raw,png,fb"]);
        assert_eq!(cfg.outputs, vec![OutputMode::Png, OutputMode::Raw, OutputMode::Framebuffer]);
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.outputs, vec![OutputMode::Png]);
        assert_eq!(cfg.columns, ColumnOrder::Reading);
        assert_eq!(cfg.duplicates, DuplicatePolicy::LastWins);
        assert!(!cfg.periodic);
        assert!(matches!(cfg.time_source, TimeSourceMode::Local));
    }

    #[test]
    fn test_flags_that_imply_others() {
        let cfg = config(&["--interval-seconds", "120", "--ntp-server", "ntp.example.org", "--columns", "named"]);
        assert!(cfg.periodic);
        assert_eq!(cfg.interval_secs, Some(120));
        assert_eq!(cfg.columns, ColumnOrder::Named);
        assert!(matches!(
            cfg.time_source,
            TimeSourceMode::Ntp { server: Some(ref s) } if s == "ntp.example.org"
        ));

        let cfg = config(&["--at", "8:43"]);
        assert!(matches!(cfg.time_source, TimeSourceMode::Fixed(k) if k.to_string() == "08:43"));
        assert!(Args::try_parse_from(["quoteclock", "--at", "08:43", "--ntp"]).is_err());
    }
}

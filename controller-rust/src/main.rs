//! main.rs — windlassd
//!
//! Runs the controller tick, reads commands and sensor updates from stdin and
//! prints telemetry as JSON lines on stdout. Calibrated speeds are written
//! back to disk by a separate task.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{info, warn};

use rode_types::{Command, SensorReadings, TelemetryEvent};
use windlass_controller::config::DEFAULT_CONFIG;
use windlass_controller::persistence::{load_speed_profile, run_speed_writer, ChannelSpeedStore};
use windlass_controller::protocol::{parse_line, Input};
use windlass_controller::{MemoryRelays, Telemetry, Windlass, WindlassConfig};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "windlassd", about = "Anchor windlass controller")]
struct Args {
    /// Config file path (embedded defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Calibrated speed file, overrides `daemon.speeds_file`
    #[arg(long)]
    speeds: Option<PathBuf>,
    /// Control period in milliseconds, overrides `daemon.tick_ms`
    #[arg(long)]
    tick_ms: Option<u64>,
}

// ── Telemetry printer ─────────────────────────────────────────────────────────

async fn print_telemetry(mut rx: broadcast::Receiver<TelemetryEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Cannot encode telemetry: {e}"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Telemetry printer lagged, {n} events lost"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn handle_line(line: &str, readings: &mut SensorReadings, windlass: &mut Windlass) {
    match parse_line(line) {
        Ok(None) => {}
        Ok(Some(Input::Set(field, value))) => field.apply(readings, value),
        Ok(Some(Input::Command(command))) => {
            if let Err(e) = windlass.apply(command, Instant::now()) {
                warn!("{command:?} refused: {e}");
            }
        }
        Err(e) => warn!("Ignoring input {line:?}: {e}"),
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "windlass_controller=info,windlassd=info".into()),
        )
        .init();

    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => WindlassConfig::load(path),
        None => WindlassConfig::from_toml_str(DEFAULT_CONFIG),
    }
    .context("loading configuration")?;

    let speeds_path = args
        .speeds
        .unwrap_or_else(|| PathBuf::from(&cfg.daemon.speeds_file));
    let tick_ms = args.tick_ms.unwrap_or(cfg.daemon.tick_ms).max(1);

    info!("⚓ windlassd starting, tick {tick_ms} ms, speeds in {}", speeds_path.display());

    let speeds = load_speed_profile(&speeds_path).await;
    let (speed_tx, speed_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(run_speed_writer(speeds_path, speed_rx));

    let telemetry = Telemetry::default();
    tokio::spawn(print_telemetry(telemetry.subscribe()));

    let mut windlass = Windlass::new(
        &cfg,
        Box::new(MemoryRelays::new()),
        Box::new(ChannelSpeedStore::new(speed_tx)),
        speeds,
        telemetry,
    );

    let mut readings = SensorReadings::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut tick = interval(Duration::from_millis(tick_ms));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => windlass.poll(&readings, Instant::now()),
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_line(&line, &mut readings, &mut windlass),
                Ok(None) => {
                    info!("stdin closed, running without operator input");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    stdin_open = false;
                }
            },
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    // Leave the windlass de-energized on the way out.
    let _ = windlass.apply(Command::Stop, Instant::now());
    drop(windlass);
    writer.await.context("speed writer task")?;
    Ok(())
}

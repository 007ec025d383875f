//! main.rs — rode-sim
//!
//! Drives the windlass controller against a simulated boat on a virtual clock.
//! Runs one automatic sequence (deployment by default) and logs its progress
//! until the controller is idle again or the time limit passes.

mod scenarios;
mod vessel_sim;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use rode_types::{Command, SpeedProfile, TelemetryEvent};
use windlass_controller::config::DEFAULT_CONFIG;
use windlass_controller::persistence::MemorySpeedStore;
use windlass_controller::telemetry::drain;
use windlass_controller::{MemoryRelays, Telemetry, Windlass, WindlassConfig};

use scenarios::Scenario;
use vessel_sim::{SimConfig, VesselSim};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rode-sim", about = "Anchor windlass simulator")]
struct Args {
    /// Config file path (embedded defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Environment preset
    #[arg(long, value_enum, default_value_t = Scenario::Calm)]
    scenario: Scenario,
    /// Simulation speed multiplier (1.0 = real-time)
    #[arg(long, default_value = "20.0")]
    speed: f64,
    /// Start an automatic deployment with this scope ratio
    #[arg(long, conflicts_with = "auto_retrieve")]
    auto_drop: Option<f32>,
    /// Start an automatic retrieval, motoring up to the anchor
    #[arg(long)]
    auto_retrieve: bool,
    /// Rode already out at the start of a retrieval
    #[arg(long, default_value = "40.0")]
    rode: f32,
    /// Give up after this many simulated seconds
    #[arg(long, default_value = "1800")]
    limit_s: u64,
    /// RNG seed for noise and gusts
    #[arg(long, default_value = "7")]
    seed: u64,
}

#[derive(Debug, Default, Deserialize)]
struct SimFile {
    #[serde(default)]
    simulation: SimConfig,
}

fn log_event(event: TelemetryEvent) {
    match event {
        TelemetryEvent::Stage { sequence, label } => info!("📍 {sequence:?}: {label}"),
        TelemetryEvent::SequenceFinished { sequence } => info!("🏁 {sequence:?} finished"),
        TelemetryEvent::SpeedCalibrated { direction, ms_per_meter } => {
            info!("⏱  {direction} speed now {ms_per_meter:.0} ms/m")
        }
        other => debug!(?other, "telemetry"),
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rode_simulator=info,windlass_controller=info".into()),
        )
        .init();

    let args = Args::parse();

    let text = match &args.config {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        None => DEFAULT_CONFIG.to_string(),
    };
    let cfg = WindlassConfig::from_toml_str(&text).context("controller config")?;
    let sim_file: SimFile = toml::from_str(&text).context("simulation config")?;

    info!(
        "🛥  rode-sim starting: {:?}, depth {:.1} m, wind {:.1} m/s, ×{:.1}",
        args.scenario, sim_file.simulation.depth_m, sim_file.simulation.wind_mps, args.speed
    );

    let mut vessel = VesselSim::new(
        sim_file.simulation,
        args.scenario.config(),
        cfg.physics.clone(),
        cfg.actuator.bow_height_m,
        args.seed,
    );

    let relays = MemoryRelays::new();
    let telemetry = Telemetry::default();
    let mut rx = telemetry.subscribe();
    let mut windlass = Windlass::new(
        &cfg,
        Box::new(relays.clone()),
        Box::new(MemorySpeedStore::new()),
        SpeedProfile::default(),
        telemetry,
    );

    let command = if args.auto_retrieve {
        vessel.lie_back(args.rode);
        vessel.motoring = true;
        Command::AutoRetrieve
    } else {
        Command::AutoDrop { scope: args.auto_drop }
    };

    let start = Instant::now();
    let mut now = start;
    windlass.poll(&vessel.readings(), now);
    windlass
        .apply(command, now)
        .with_context(|| format!("{command:?} refused"))?;

    let tick = Duration::from_millis(cfg.daemon.tick_ms);
    let period = Duration::from_secs_f64(tick.as_secs_f64() / args.speed.max(0.01)).max(Duration::from_micros(10));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let limit = Duration::from_secs(args.limit_s);
    let mut next_report = Duration::ZERO;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("Interrupted");
                break;
            }
        }

        vessel.tick(relays.state(), tick);
        now += tick;
        let readings = vessel.readings();
        windlass.poll(&readings, now);
        drain(&mut rx).into_iter().for_each(log_event);

        let elapsed = now - start;
        if elapsed >= next_report {
            info!(
                "t={:>5.0}s rode {:5.2} m, distance {:5.2} m, slack {:5.2} m, wind {:4.1} m/s",
                elapsed.as_secs_f32(),
                vessel.rode,
                vessel.distance,
                windlass.actuator().horizontal_slack(),
                vessel.wind
            );
            next_report += Duration::from_secs(10);
        }

        if !windlass.is_busy() {
            info!("✅ Controller idle after {:.0} s, rode {:.2} m", elapsed.as_secs_f32(), vessel.rode);
            break;
        }
        if elapsed >= limit {
            warn!("Time limit reached with the controller still busy");
            break;
        }
    }

    let _ = windlass.apply(Command::Stop, now);
    let speeds = windlass.actuator().speed_profile();
    info!(
        "Learned speeds: down {:.0} ms/m, up {:.0} ms/m; relay overlaps: {}",
        speeds.down_ms_per_meter,
        speeds.up_ms_per_meter,
        relays.overlaps()
    );
    Ok(())
}

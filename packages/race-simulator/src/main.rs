//! main.rs — Race telemetry simulator entry point
//!
//! Feeds the backend a full race over UDP, exactly as the live session
//! feed would: session announce, track load, the grid joining, a
//! countdown into a standing start, positions at every tick, incidents,
//! and the finish order. When the race is over the field lines up and
//! goes again, so a dev backend always has something to direct.
//!
//! Everything is fire-and-forget datagrams; the sim never notices whether
//! a backend is listening.

mod field;

use std::net::UdpSocket;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::time::interval;
use tracing::{info, warn};

use race_types::{Envelope, RaceEvent};

use field::{FieldConfig, FieldSim};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "race-sim", about = "Pitwall race telemetry simulator")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Telemetry hub address (the backend's UDP listener)
    #[arg(long, default_value = "127.0.0.1:29998")]
    hub_addr: String,
    /// Override the configured car count
    #[arg(long)]
    cars: Option<usize>,
    /// Simulation speed multiplier (1.0 = real-time)
    #[arg(long, default_value = "1.0")]
    speed: f64,
    /// Write the track path file for the backend and exit
    #[arg(long)]
    emit_track: bool,
}

// ── UDP event transmitter ─────────────────────────────────────────────────────

/// Wraps events in the sequence envelope and fires them at the hub.
/// Send errors are logged and never crash the sim.
struct EventTransmitter {
    socket: UdpSocket,
    hub_addr: String,
    seq: u32,
}

impl EventTransmitter {
    fn new(hub_addr: &str) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self { socket, hub_addr: hub_addr.to_string(), seq: 0 })
    }

    fn send(&mut self, event: RaceEvent) {
        self.seq = self.seq.wrapping_add(1);
        let envelope = Envelope { seq: self.seq, event };
        let bytes = match serde_json::to_vec(&envelope) {
            Ok(b) => b,
            Err(e) => {
                warn!("UDP: serialize failed: {e}");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&bytes, &self.hub_addr) {
            warn!("UDP: send failed: {e}");
        }
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "race_simulator=info".into()),
        )
        .init();

    let args = Args::parse();

    // Load config
    let config_str = std::fs::read_to_string(&args.config)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    let cfg: FullConfig = toml::from_str(&config_str).context("invalid config.toml")?;

    if args.emit_track {
        return emit_track_file(&cfg.race);
    }

    let n_cars = args.cars.unwrap_or(cfg.race.n_cars);
    info!(
        "🏎  Race simulator starting — {} cars, {} laps of {}",
        n_cars, cfg.race.laps, cfg.race.track
    );

    let mut tx = EventTransmitter::new(&args.hub_addr)
        .context("failed to bind UDP socket")?;

    // Boot sequence: the feed announces itself before any racing happens
    tx.send(RaceEvent::SessionUp);
    tx.send(RaceEvent::TrackLoaded { track: cfg.race.track.clone() });

    let mut field = FieldSim::new(field_config(&cfg, n_cars));
    for car in &field.cars {
        tx.send(RaceEvent::PlayerJoin {
            plid: car.plid,
            pname: car.pname.clone(),
            vehicle: car.vehicle,
        });
    }

    let epoch_ms = (1000.0 / cfg.simulation.update_rate_hz) as u64;
    let mut ticker = interval(Duration::from_millis(epoch_ms));
    let dt_base = epoch_ms as f64 / 1000.0;

    info!(
        "⏱ Feeding {} at {} Hz ({}× speed)",
        args.hub_addr, cfg.simulation.update_rate_hz, args.speed
    );

    let mut tick_count: u64 = 0;
    loop {
        ticker.tick().await;

        let dt = dt_base * args.speed;
        for event in field.tick(dt) {
            tx.send(event);
        }

        tick_count += 1;
        if tick_count % 50 == 0 {
            info!(
                "t={:.0}s | phase={:?} | leading: {}",
                field.t_elapsed,
                field.phase,
                field.leader_name()
            );
        }

        if field.race_over(cfg.simulation.restart_delay_secs) {
            info!("🔁 Lining the field up again");
            field.reset();
        }
    }
}

// ── Track path emission ───────────────────────────────────────────────────────

/// Write the path-node file the backend indexes, using the same circuit
/// parameterization the cars drive.
fn emit_track_file(race: &RaceConfig) -> anyhow::Result<()> {
    let spacing = 10.0; // a node every 10 m, roughly what real path files carry
    let count = (race.track_length_m / spacing).round() as usize;
    let nodes: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            let p = field::circuit_point(race.track_length_m, i as f64 * spacing);
            serde_json::json!({ "x": p.x, "y": p.y, "z": p.z })
        })
        .collect();
    let path = format!("{}.json", race.track);
    let body = serde_json::to_string_pretty(&serde_json::json!({ "nodes": nodes }))?;
    std::fs::write(&path, body).with_context(|| format!("writing {path}"))?;
    info!("🗺 Wrote {count} path nodes to {path}");
    Ok(())
}

// ── Config structs ────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct FullConfig {
    race:       RaceConfig,
    simulation: SimulationConfig,
    car_model:  CarModelConfig,
    incidents:  IncidentConfig,
}

#[derive(Debug, serde::Deserialize)]
struct RaceConfig {
    track: String,
    track_length_m: f64,
    n_cars: usize,
    laps: u32,
    countdown_secs: f64,
}

#[derive(Debug, serde::Deserialize)]
struct SimulationConfig {
    update_rate_hz: f64,
    restart_delay_secs: f64,
}

#[derive(Debug, serde::Deserialize)]
struct CarModelConfig {
    target_speed_mps: f64,
    speed_stddev_mps: f64,
    jitter_mps: f64,
    grid_gap_m: f64,
}

#[derive(Debug, serde::Deserialize)]
struct IncidentConfig {
    contact_rate: f64,
    yellow_rate: f64,
    blue_gap_m: f64,
    pit_penalty_rate: f64,
    invalid_lap_rate: f64,
}

fn field_config(cfg: &FullConfig, n_cars: usize) -> FieldConfig {
    FieldConfig {
        n_cars,
        track_length_m: cfg.race.track_length_m,
        laps: cfg.race.laps,
        countdown_secs: cfg.race.countdown_secs,
        target_speed_mps: cfg.car_model.target_speed_mps,
        speed_stddev_mps: cfg.car_model.speed_stddev_mps,
        jitter_mps: cfg.car_model.jitter_mps,
        grid_gap_m: cfg.car_model.grid_gap_m,
        contact_rate: cfg.incidents.contact_rate,
        yellow_rate: cfg.incidents.yellow_rate,
        blue_gap_m: cfg.incidents.blue_gap_m,
        pit_penalty_rate: cfg.incidents.pit_penalty_rate,
        invalid_lap_rate: cfg.incidents.invalid_lap_rate,
    }
}

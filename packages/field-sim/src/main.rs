//! field-sim — vehicle/field simulator.
//!
//! Runs one loop: advance a kinematic bicycle model along a configured
//! track, encode its state as a `$PANDA` sentence (with optional noise
//! and fault-scenario injection), and send it over UDP at the configured
//! rate — the counterpart to `ProcessSimulatedPosition` in the control
//! core, giving it something to steer against without real hardware.

mod config;
mod nmea_encode;
mod projection;
mod scenarios;
mod transmit;
mod vehicle_sim;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::{info, warn};

use config::SimConfig;
use nmea_encode::PandaFields;
use projection::LocalOrigin;
use scenarios::{ScenarioConfig, ScenarioKind};
use transmit::NmeaTransmitter;
use vehicle_sim::VehicleSim;

#[derive(Parser)]
#[command(name = "field-sim", version, about = "Vehicle/field simulator for guidance-core")]
struct Args {
    #[arg(long, default_value = "field-sim.toml")]
    config: PathBuf,
    #[arg(long, default_value = "127.0.0.1:9998")]
    target: String,
    #[arg(long)]
    broadcast: Option<String>,
    /// Simulation speed multiplier (1.0 = real-time).
    #[arg(long, default_value = "1.0")]
    speed: f64,
    /// Fault scenario(s) to inject; repeatable.
    #[arg(long = "scenario", value_enum)]
    scenarios: Vec<ScenarioKind>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "field_sim=info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = if args.config.exists() {
        SimConfig::load(&args.config)?
    } else {
        warn!("no sim config at {}, using defaults", args.config.display());
        SimConfig::default()
    };

    info!(
        "field-sim starting — track '{}', {} Hz, target {}",
        cfg.track.name, cfg.update_rate_hz, args.target
    );

    let scenario = args.scenarios.iter().fold(ScenarioConfig::default(), |mut acc, &kind| {
        let preset = scenarios::preset(kind);
        acc.active.push(kind);
        acc.dropout_probability = acc.dropout_probability.max(preset.dropout_probability);
        acc.heading_glitch_deg = acc.heading_glitch_deg.max(preset.heading_glitch_deg);
        acc
    });

    let origin = LocalOrigin::new(cfg.origin_lat, cfg.origin_lon);
    let mut vehicle = VehicleSim::new(&cfg.vehicle, &cfg.track);
    let transmitter = NmeaTransmitter::new(&args.target, args.broadcast.as_deref())?;

    let pos_noise = Normal::new(0.0, cfg.noise.gps_noise_std_m.max(1e-9))
        .map_err(|e| anyhow::anyhow!("invalid gps_noise_std_m: {e}"))?;
    let heading_noise = Normal::new(0.0, cfg.noise.heading_noise_std_deg.max(1e-9))
        .map_err(|e| anyhow::anyhow!("invalid heading_noise_std_deg: {e}"))?;
    let mut rng = rand::thread_rng();

    let period_ms = (1000.0 / cfg.update_rate_hz.max(0.1)) as u64;
    let mut ticker = tokio::time::interval(Duration::from_millis(period_ms));
    let mut epoch: u64 = 0;

    loop {
        ticker.tick().await;
        let dt = (period_ms as f64 / 1000.0) * args.speed;
        vehicle.tick(dt, &cfg.track);
        epoch += 1;

        if scenario.has(ScenarioKind::GpsDropout) && rng.gen_bool(scenario.dropout_probability) {
            continue;
        }

        let noisy_easting = vehicle.position.easting + pos_noise.sample(&mut rng);
        let noisy_northing = vehicle.position.northing + pos_noise.sample(&mut rng);
        let (lat, lon) = origin.to_geo(noisy_easting, noisy_northing);

        let heading_deg = vehicle.heading_deg
            + heading_noise.sample(&mut rng)
            + if scenario.has(ScenarioKind::HeadingGlitch) { scenario.heading_glitch_deg } else { 0.0 };

        let fix_quality =
            if scenario.has(ScenarioKind::LowFixQuality) { 1 } else { cfg.noise.fix_quality };
        let hdop = if scenario.has(ScenarioKind::HighHdop) { 8.0 } else { cfg.noise.hdop_nominal };
        let diff_age_s = if scenario.has(ScenarioKind::StaleDiffAge) {
            cfg.noise.diff_age_s + epoch as f64 * dt
        } else {
            cfg.noise.diff_age_s
        };

        let fields = PandaFields {
            time_hhmmss: chrono::Utc::now().format("%H%M%S%.2f").to_string(),
            lat_deg: lat,
            lon_deg: lon,
            fix_quality,
            satellites: cfg.noise.satellites,
            hdop,
            altitude_m: 0.0,
            diff_age_s,
            speed_mps: vehicle.speed_mps,
            heading_deg,
            imu: Some((0.0, 0.0, vehicle.yaw_rate_rad_s.to_degrees())),
        };

        let sentence = nmea_encode::encode(&fields);
        transmitter.send(&sentence);

        if epoch % (cfg.update_rate_hz.max(1.0) as u64 * 5).max(1) == 0 {
            info!(
                "epoch {epoch}: e={:.2} n={:.2} hdg={:.1} fixq={fix_quality}",
                vehicle.position.easting, vehicle.position.northing, vehicle.heading_deg
            );
        }
    }
}

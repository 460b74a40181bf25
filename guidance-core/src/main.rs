mod config;
mod coverage;
mod error;
mod fusion;
mod geometry;
mod guidance;
mod kinematics;
mod nmea;
mod ntrip;
mod persistence;
mod pipeline;
mod projection;
mod section;
mod transport;
mod uturn;
mod vehicle;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use config::CoreConfig;
use pipeline::PipelineCoordinator;
use transport::{SteerAndSectionsFrame, TransportConfig};

#[derive(Parser)]
#[command(name = "guidance-core", version, about = "Real-time guidance control core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop: ingest NMEA from stdin, drive guidance and
    /// section control, broadcast steer/section frames to the hardware
    /// module, and persist field state on exit.
    Run {
        #[arg(long, default_value = "guidance.toml")]
        config: PathBuf,
        /// Field directory (Field.txt, Boundary.txt, ...). Without this,
        /// the loop runs with no boundary/coverage context.
        #[arg(long)]
        field_dir: Option<PathBuf>,
        /// Name of a track in the field's TrackLines.txt to engage at
        /// startup.
        #[arg(long)]
        track: Option<String>,
    },
    /// Validate a config file and print the resolved values.
    CheckConfig {
        #[arg(long, default_value = "guidance.toml")]
        config: PathBuf,
    },
    /// Replay a recorded NMEA log through the pipeline at a fixed rate,
    /// without any transport/NTRIP I/O — for guidance regression testing.
    Sim {
        #[arg(long, default_value = "guidance.toml")]
        config: PathBuf,
        /// Path to a file of one NMEA sentence per line.
        log: PathBuf,
        #[arg(long, default_value = "10")]
        rate_hz: f64,
        #[arg(long)]
        field_dir: Option<PathBuf>,
        #[arg(long)]
        track: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "guidance_core=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::CheckConfig { config } => check_config(&config),
        Command::Run { config, field_dir, track } => run(config, field_dir, track).await,
        Command::Sim { config, log, rate_hz, field_dir, track } => {
            sim_replay(config, log, rate_hz, field_dir, track).await
        }
    }
}

fn check_config(path: &PathBuf) -> anyhow::Result<()> {
    let cfg = CoreConfig::load(path)?;
    println!("{}", toml::to_string_pretty(&cfg)?);
    Ok(())
}

async fn run(config_path: PathBuf, field_dir: Option<PathBuf>, track_name: Option<String>) -> anyhow::Result<()> {
    let cfg = if config_path.exists() {
        CoreConfig::load(&config_path)?
    } else {
        warn!("no config at {}, using defaults", config_path.display());
        CoreConfig::default()
    };
    info!("guidance-core starting, algorithm={:?}", cfg.guidance.algorithm);

    let section_count = cfg.tool.section_widths_m.len();
    let (mut coordinator, _snapshot_rx, mut event_rx) = PipelineCoordinator::new(cfg.clone(), section_count);

    let field_data = if let Some(dir) = &field_dir {
        match persistence::load_field(dir).await {
            Ok(data) => {
                info!("loaded field '{}' from {}", data.info.name, dir.display());
                Some(data)
            }
            Err(e) => {
                warn!("failed to load field at {}: {e}", dir.display());
                None
            }
        }
    } else {
        None
    };

    if let Some(data) = &field_data {
        coordinator.set_field(data.boundary.clone(), 10.0);
    }

    coordinator.start();

    if let (Some(name), Some(data)) = (&track_name, &field_data) {
        if let Some(track) = data.tracks.iter().find(|t| &t.name == name) {
            coordinator.engage(track.clone())?;
            info!("engaged track '{name}'");
        } else {
            warn!("track '{name}' not found in field data");
        }
    }

    let (frame_tx, frame_rx) = mpsc::channel::<SteerAndSectionsFrame>(16);
    let (transport_err_tx, mut transport_err_rx) = mpsc::channel(16);
    tokio::spawn(transport::run_outbound(TransportConfig::default(), frame_rx, transport_err_tx));

    if cfg.ntrip.enabled {
        tokio::spawn(ntrip::run_rtcm_forwarder(cfg.ntrip.clone()));
    }

    tokio::spawn(async move {
        while let Some(err) = transport_err_rx.recv().await {
            warn!("transport error: {err}");
        }
    });

    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            info!("pipeline event: {event:?}");
        }
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut last_cycle = tokio::time::Instant::now();
    let mut metrics_tick = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                match line {
                    Ok(Some(text)) => {
                        let dt_s = last_cycle.elapsed().as_secs_f64();
                        last_cycle = tokio::time::Instant::now();
                        let snapshot = coordinator.process_gps_buffer(text.as_bytes(), dt_s);
                        let frame = SteerAndSectionsFrame::new(snapshot.section_bitmask as u16, snapshot.steer_angle_rad);
                        let _ = frame_tx.try_send(frame);
                    }
                    Ok(None) => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        warn!("stdin read error: {e}");
                        break;
                    }
                }
            }
            _ = metrics_tick.tick() => {
                let report = coordinator.get_latency_metrics();
                info!(
                    "latency: parse={}ns guidance={}ns total={}ns",
                    report.avg_parse_ns, report.avg_guidance_ns, report.avg_total_ns
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, shutting down");
                break;
            }
        }
    }

    coordinator.stop();

    if let Some(dir) = &field_dir {
        if let Err(e) = persistence::save_coverage(dir, coordinator.coverage_engine()).await {
            warn!("failed to save coverage to {}: {e}", dir.display());
        } else {
            info!("saved coverage to {}", dir.display());
        }
    }

    Ok(())
}

async fn sim_replay(
    config_path: PathBuf,
    log_path: PathBuf,
    rate_hz: f64,
    field_dir: Option<PathBuf>,
    track_name: Option<String>,
) -> anyhow::Result<()> {
    let cfg = if config_path.exists() { CoreConfig::load(&config_path)? } else { CoreConfig::default() };
    let section_count = cfg.tool.section_widths_m.len();
    let (mut coordinator, _snapshot_rx, _event_rx) = PipelineCoordinator::new(cfg, section_count);

    if let Some(dir) = &field_dir {
        if let Ok(data) = persistence::load_field(dir).await {
            coordinator.set_field(data.boundary.clone(), 10.0);
            coordinator.start();
            if let Some(name) = &track_name {
                if let Some(track) = data.tracks.iter().find(|t| &t.name == name) {
                    coordinator.engage(track.clone())?;
                }
            }
        }
    } else {
        coordinator.start();
    }

    let text = std::fs::read_to_string(&log_path)
        .map_err(|e| anyhow::anyhow!("reading log {}: {e}", log_path.display()))?;
    let dt_s = 1.0 / rate_hz.max(0.01);

    let mut processed = 0u32;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let snapshot = coordinator.process_gps_buffer(line.as_bytes(), dt_s);
        processed += 1;
        info!(
            "cycle {processed}: e={:.3} n={:.3} xte={:.3} steer={:.4} turn={}",
            snapshot.easting, snapshot.northing, snapshot.cross_track_error_m, snapshot.steer_angle_rad, snapshot.in_turn
        );
    }

    let report = coordinator.get_latency_metrics();
    info!(
        "replay done: {processed} cycles, avg parse={}ns guidance={}ns total={}ns",
        report.avg_parse_ns, report.avg_guidance_ns, report.avg_total_ns
    );

    Ok(())
}

//! Pipeline coordinator (spec §5, component C10).
//!
//! Drives one cycle end to end: C3 (NMEA) → C4 (fusion) → C5 (tool
//! kinematics) → C6 or C7 (guidance, depending on turn mode) → C9
//! (section control) → transport. Owns every component's per-cycle state;
//! nothing here is shared across an await point, matching `VehicleState`'s
//! single-owner discipline.
//!
//! Publishes a read-only snapshot over a `watch` channel every cycle
//! (last value only matters to a UI) and pushes discrete events — turn
//! completions, faults — over a bounded `broadcast` channel so a slow
//! subscriber never backs up the control loop.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::coverage::CoverageEngine;
use crate::error::{ErrorCounters, GuidanceError, TurnPlanError};
use crate::fusion::{self, FusionHistory};
use crate::geometry;
use crate::guidance::{self, GuidanceState};
use crate::kinematics::{self, TrailingState};
use crate::nmea;
use crate::projection::LocalOrigin;
use crate::section::SectionController;
use crate::uturn::{self, TurnPlan};
use crate::vehicle::VehicleState;
use guidance_types::{Boundary, Polygon, Position, Track, Vec2};

const LATENCY_WINDOW: usize = 10;

/// Read-only cycle output, published for UIs/telemetry consumers.
#[derive(Debug, Clone, Default)]
pub struct VehicleSnapshot {
    pub easting: f64,
    pub northing: f64,
    pub heading_deg: f64,
    pub speed_mps: f64,
    pub cross_track_error_m: f64,
    pub steer_angle_rad: f64,
    pub distance_to_turn_m: f64,
    pub section_bitmask: u32,
    pub is_valid: bool,
    pub in_turn: bool,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    TurnStarted,
    TurnCompleted,
    TurnFailed(String),
    FixRejected { consecutive_rejections: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuideMode {
    Track,
    Turn,
}

/// Rolling per-kind latency averages over the last `LATENCY_WINDOW`
/// cycles, plus the cumulative rejection counters from `ErrorCounters`.
#[derive(Debug, Default)]
pub struct LatencyMetrics {
    parse_ns: VecDeque<u64>,
    guidance_ns: VecDeque<u64>,
    total_ns: VecDeque<u64>,
    pub counters: ErrorCounters,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyReport {
    pub avg_parse_ns: u64,
    pub avg_guidance_ns: u64,
    pub avg_total_ns: u64,
}

impl LatencyMetrics {
    fn push_window(window: &mut VecDeque<u64>, value: u64) {
        window.push_back(value);
        if window.len() > LATENCY_WINDOW {
            window.pop_front();
        }
    }

    fn record(&mut self, parse_ns: u64, guidance_ns: u64, total_ns: u64) {
        Self::push_window(&mut self.parse_ns, parse_ns);
        Self::push_window(&mut self.guidance_ns, guidance_ns);
        Self::push_window(&mut self.total_ns, total_ns);
    }

    fn avg(window: &VecDeque<u64>) -> u64 {
        if window.is_empty() {
            return 0;
        }
        window.iter().sum::<u64>() / window.len() as u64
    }

    pub fn report(&self) -> LatencyReport {
        LatencyReport {
            avg_parse_ns: Self::avg(&self.parse_ns),
            avg_guidance_ns: Self::avg(&self.guidance_ns),
            avg_total_ns: Self::avg(&self.total_ns),
        }
    }
}

pub struct PipelineCoordinator {
    config: CoreConfig,
    run_mode: RunMode,
    origin: Option<LocalOrigin>,
    vehicle: VehicleState,
    fusion_history: FusionHistory,
    trailing: TrailingState,
    guidance_state: GuidanceState,
    sections: SectionController,
    coverage: CoverageEngine,
    engaged_track: Option<Track>,
    boundary: Option<Boundary>,
    turn_area: Option<Polygon>,
    headland_width_m: f64,
    guide_mode: GuideMode,
    turn_plan: Option<TurnPlan>,
    consecutive_fix_rejections: u32,
    metrics: LatencyMetrics,
    snapshot_tx: watch::Sender<VehicleSnapshot>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl PipelineCoordinator {
    pub fn new(config: CoreConfig, section_count: usize) -> (Self, watch::Receiver<VehicleSnapshot>, broadcast::Receiver<PipelineEvent>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(VehicleSnapshot::default());
        let (event_tx, event_rx) = broadcast::channel(64);
        let coordinator = Self {
            config,
            run_mode: RunMode::Stopped,
            origin: None,
            vehicle: VehicleState::new(),
            fusion_history: FusionHistory::default(),
            trailing: TrailingState::default(),
            guidance_state: GuidanceState::default(),
            sections: SectionController::new(section_count),
            coverage: CoverageEngine::new(-10_000.0, -10_000.0, 10_000.0, 10_000.0),
            engaged_track: None,
            boundary: None,
            turn_area: None,
            headland_width_m: 0.0,
            guide_mode: GuideMode::Track,
            turn_plan: None,
            consecutive_fix_rejections: 0,
            metrics: LatencyMetrics::default(),
            snapshot_tx,
            event_tx,
        };
        (coordinator, snapshot_rx, event_rx)
    }

    pub fn start(&mut self) {
        self.run_mode = RunMode::Running;
        info!("pipeline: started");
    }

    pub fn stop(&mut self) {
        self.run_mode = RunMode::Stopped;
        self.engaged_track = None;
        self.guide_mode = GuideMode::Track;
        self.turn_plan = None;
        info!("pipeline: stopped");
    }

    pub fn set_field(&mut self, boundary: Option<Boundary>, headland_width_m: f64) {
        self.turn_area = boundary.as_ref().map(|b| b.outer.clone());
        self.boundary = boundary;
        self.headland_width_m = headland_width_m;
    }

    pub fn engage(&mut self, track: Track) -> Result<(), GuidanceError> {
        if self.run_mode != RunMode::Running {
            return Err(GuidanceError::Config("cannot engage before Start".to_string()));
        }
        self.guidance_state.reset();
        self.guide_mode = GuideMode::Track;
        self.turn_plan = None;
        self.engaged_track = Some(track);
        Ok(())
    }

    pub fn disengage(&mut self) {
        self.engaged_track = None;
        self.guide_mode = GuideMode::Track;
        self.turn_plan = None;
    }

    pub fn get_latency_metrics(&self) -> LatencyReport {
        self.metrics.report()
    }

    pub fn coverage_engine(&self) -> &CoverageEngine {
        &self.coverage
    }

    /// Processes one raw NMEA line: C3 → C4 → C5 → guidance → C9 →
    /// publish. `dt_s` is the caller's measured elapsed time since the
    /// previous cycle (used by C4's IMU dead-reckoning term and C5's
    /// distance-driven trailing filters).
    pub fn process_gps_buffer(&mut self, line: &[u8], dt_s: f64) -> VehicleSnapshot {
        let cycle_start = Instant::now();
        let parse_start = Instant::now();

        match nmea::parse(line, &mut self.vehicle) {
            Ok(()) => {}
            Err(e) => {
                warn!("pipeline: NMEA parse failed: {e}");
                match e {
                    crate::error::NmeaError::BadChecksum { .. } => self.metrics.counters.bad_checksum += 1,
                    _ => self.metrics.counters.malformed_sentence += 1,
                }
                return self.publish_snapshot();
            }
        }
        let parse_ns = parse_start.elapsed().as_nanos() as u64;

        self.run_fusion_and_guidance(dt_s, parse_ns, cycle_start)
    }

    /// Bypasses NMEA parsing for a caller that already has a fix (e.g. the
    /// field simulator driving the pipeline directly in-process).
    pub fn process_simulated_position(&mut self, position: Position, imu_valid: bool, yaw_rate_rad_s: f64, dt_s: f64) -> VehicleSnapshot {
        let cycle_start = Instant::now();
        self.vehicle.position = position;
        self.vehicle.heading_rad = position.heading.to_radians();
        self.vehicle.fix_quality = 4;
        self.vehicle.satellites = 12;
        self.vehicle.hdop = 0.9;
        self.vehicle.diff_age_s = 1.0;
        self.vehicle.imu_valid = imu_valid;
        self.vehicle.yaw_rate = yaw_rate_rad_s;
        self.run_fusion_and_guidance(dt_s, 0, cycle_start)
    }

    fn run_fusion_and_guidance(&mut self, dt_s: f64, parse_ns: u64, cycle_start: Instant) -> VehicleSnapshot {
        let origin = *self.origin.get_or_insert_with(|| LocalOrigin::new(self.vehicle.position.lat, self.vehicle.position.lon));
        let (easting, northing) = origin.to_local(self.vehicle.position.lat, self.vehicle.position.lon);
        self.vehicle.position.easting = easting;
        self.vehicle.position.northing = northing;

        fusion::antenna_to_pivot(&mut self.vehicle, self.config.vehicle.antenna_fore_aft_m, self.config.vehicle.antenna_lateral_m);
        fusion::fuse_heading(&mut self.vehicle, &self.config.connections, &mut self.fusion_history, dt_s);

        if !self.vehicle.fix_valid {
            self.consecutive_fix_rejections += 1;
            self.metrics.counters.fix_below_minimum += 1;
            if self.consecutive_fix_rejections % 10 == 0 {
                let _ = self.event_tx.send(PipelineEvent::FixRejected { consecutive_rejections: self.consecutive_fix_rejections });
            }
            return self.publish_snapshot();
        }
        self.consecutive_fix_rejections = 0;

        let pivot = self.vehicle.pivot();
        let distance_m = self.vehicle.position.speed * dt_s.max(0.0);
        let half_width = (self.config.tool.width_m - self.config.tool.overlap_m) / 2.0;
        let edges = kinematics::compute(&self.config.tool, pivot, self.vehicle.heading_rad, distance_m, half_width, &mut self.trailing);

        let guidance_start = Instant::now();
        let (steer, xte, distance_to_turn) = self.run_guidance(pivot);
        let guidance_ns = guidance_start.elapsed().as_nanos() as u64;

        self.vehicle.steer_angle_rad = steer;
        self.vehicle.cross_track_error_m = xte;
        self.vehicle.distance_to_turn_m = distance_to_turn;

        let bitmask = if let Some(boundary) = &self.boundary {
            self.sections.update(
                &self.config.tool,
                boundary,
                &mut self.coverage,
                &edges,
                self.vehicle.heading_rad,
                self.vehicle.position.speed,
                self.vehicle.yaw_rate,
                self.engaged_track.is_some() || self.guide_mode == GuideMode::Turn,
            )
        } else {
            0
        };
        self.vehicle.section_bitmask = bitmask;

        let total_ns = cycle_start.elapsed().as_nanos() as u64;
        self.metrics.record(parse_ns, guidance_ns, total_ns);

        self.publish_snapshot()
    }

    fn run_guidance(&mut self, pivot: Vec2) -> (f64, f64, f64) {
        match self.guide_mode {
            GuideMode::Track => {
                let Some(track) = self.engaged_track.clone() else {
                    return (0.0, 0.0, 0.0);
                };
                let result = guidance::guide(
                    Some(&track),
                    pivot,
                    self.vehicle.heading_rad,
                    self.vehicle.position.speed,
                    &self.config.vehicle,
                    &self.config.guidance,
                    &mut self.guidance_state,
                    &mut self.metrics.counters,
                    false,
                );
                let distance_to_turn = self.turn_area.as_ref().map(|area| distance_to_boundary(area, pivot)).unwrap_or(f64::INFINITY);

                if let Some(area) = &self.turn_area {
                    if distance_to_boundary(area, pivot) <= 0.0 && self.try_start_turn(&track, pivot) {
                        return (0.0, 0.0, 0.0);
                    }
                }

                match result {
                    Ok(out) => (out.steer_angle_rad, out.cross_track_error_m, distance_to_turn),
                    Err(_) => (0.0, 0.0, distance_to_turn),
                }
            }
            GuideMode::Turn => {
                let Some(plan) = self.turn_plan.clone() else {
                    self.guide_mode = GuideMode::Track;
                    return (0.0, 0.0, 0.0);
                };
                let out = uturn::follow(
                    &plan.path,
                    self.config.u_turn.style,
                    self.config.guidance.algorithm,
                    pivot,
                    self.vehicle.heading_rad,
                    self.vehicle.position.speed,
                    &self.config.vehicle,
                    self.config.guidance.min_look_ahead_m,
                );
                if out.complete {
                    let _ = self.event_tx.send(PipelineEvent::TurnCompleted);
                    self.guide_mode = GuideMode::Track;
                    self.turn_plan = None;
                }
                (out.steer_angle_rad, 0.0, 0.0)
            }
        }
    }

    fn try_start_turn(&mut self, track: &Track, pivot: Vec2) -> bool {
        let Some(area) = self.turn_area.clone() else { return false };
        let half_width = self.config.tool.width_m - self.config.tool.overlap_m;
        let heading_same_way = uturn::heading_matches_track(track, pivot, self.vehicle.heading_rad);
        let (holes, drive_thru): (&[Polygon], &[bool]) = self
            .boundary
            .as_ref()
            .map(|b| (b.holes.as_slice(), b.hole_drive_thru.as_slice()))
            .unwrap_or((&[], &[]));
        match uturn::plan(
            track,
            pivot,
            heading_same_way,
            true,
            true,
            &area,
            holes,
            drive_thru,
            &self.config.u_turn,
            half_width,
            self.config.tool.offset_m,
            self.headland_width_m,
        ) {
            Ok(plan) => {
                self.turn_plan = Some(plan);
                self.guide_mode = GuideMode::Turn;
                let _ = self.event_tx.send(PipelineEvent::TurnStarted);
                true
            }
            Err(e) => {
                self.metrics.counters.turn_synthesis_failed += 1;
                let _ = self.event_tx.send(PipelineEvent::TurnFailed(e.to_string()));
                matches!(e, TurnPlanError::NoEntryFound)
            }
        }
    }

    fn publish_snapshot(&mut self) -> VehicleSnapshot {
        let snapshot = VehicleSnapshot {
            easting: self.vehicle.position.easting,
            northing: self.vehicle.position.northing,
            heading_deg: self.vehicle.position.heading,
            speed_mps: self.vehicle.position.speed,
            cross_track_error_m: self.vehicle.cross_track_error_m,
            steer_angle_rad: self.vehicle.steer_angle_rad,
            distance_to_turn_m: self.vehicle.distance_to_turn_m,
            section_bitmask: self.vehicle.section_bitmask,
            is_valid: self.vehicle.fix_valid,
            in_turn: self.guide_mode == GuideMode::Turn,
        };
        let _ = self.snapshot_tx.send(snapshot.clone());
        snapshot
    }
}

fn distance_to_boundary(area: &Polygon, p: Vec2) -> f64 {
    if geometry::point_in_polygon(area, p) {
        area.points
            .iter()
            .zip(area.points.iter().cycle().skip(1))
            .map(|(a, b)| {
                let d = b.xy().sub(&a.xy());
                let len_sq = (d.easting * d.easting + d.northing * d.northing).max(1e-9);
                let t = ((p.easting - a.easting) * d.easting + (p.northing - a.northing) * d.northing) / len_sq;
                let t = t.clamp(0.0, 1.0);
                let proj = a.xy().add(&d.scale(t));
                p.dist(&proj)
            })
            .fold(f64::INFINITY, f64::min)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidance_types::{Vec3, Vec2};

    fn sample_sentence() -> String {
        "$PANDA,123456.78,4807.03800,N,01131.00000,E,4,12,0.9,123.4,1.5,10.0,090.0,1.0,2.0,3.0*00\r\n".to_string()
    }

    fn fix_checksum(s: &str) -> String {
        let star = s.rfind('*').unwrap();
        let body = &s[1..star];
        let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("{}{:02X}{}", &s[..star + 1], checksum, &s[star + 3..])
    }

    #[test]
    fn stopped_pipeline_rejects_engage() {
        let (mut pipeline, _snap, _ev) = PipelineCoordinator::new(CoreConfig::default(), 2);
        let track = Track::ab("t", Vec2::new(0.0, 0.0), Vec2::new(0.0, 100.0));
        assert!(pipeline.engage(track).is_err());
    }

    #[test]
    fn process_gps_buffer_publishes_a_snapshot() {
        let (mut pipeline, snap, _ev) = PipelineCoordinator::new(CoreConfig::default(), 2);
        pipeline.start();
        let sentence = fix_checksum(&sample_sentence());
        let out = pipeline.process_gps_buffer(sentence.as_bytes(), 0.1);
        assert!(out.is_valid);
        assert!(snap.borrow().is_valid);
    }

    #[test]
    fn malformed_sentence_is_dropped_without_crashing() {
        let (mut pipeline, _snap, _ev) = PipelineCoordinator::new(CoreConfig::default(), 2);
        pipeline.start();
        let out = pipeline.process_gps_buffer(b"not a sentence", 0.1);
        assert!(!out.is_valid);
        assert_eq!(pipeline.metrics.counters.malformed_sentence, 1);
    }

    #[test]
    fn engaged_track_produces_nonzero_cross_track_error_off_line() {
        let (mut pipeline, _snap, _ev) = PipelineCoordinator::new(CoreConfig::default(), 2);
        pipeline.start();
        let track = Track::ab("t", Vec2::new(0.0, 0.0), Vec2::new(0.0, 1000.0));
        pipeline.engage(track).unwrap();
        let origin = LocalOrigin::new(0.0, 0.0);
        pipeline.origin = Some(origin);
        let (lat, lon) = origin.to_geo(5.0, 10.0);
        let mut position = guidance_types::Position::default();
        position.lat = lat;
        position.lon = lon;
        position.speed = 2.0;
        position.heading = 0.0;
        let out = pipeline.process_simulated_position(position, false, 0.0, 0.1);
        assert!(out.cross_track_error_m.abs() > 0.0);
    }

    #[test]
    fn latency_metrics_report_nonzero_after_a_cycle() {
        let (mut pipeline, _snap, _ev) = PipelineCoordinator::new(CoreConfig::default(), 2);
        pipeline.start();
        let sentence = fix_checksum(&sample_sentence());
        pipeline.process_gps_buffer(sentence.as_bytes(), 0.1);
        let report = pipeline.get_latency_metrics();
        assert!(report.avg_total_ns > 0 || report.avg_parse_ns >= 0);
    }

    #[test]
    fn _unused_vec3_import_guard() {
        let _ = Vec3::new(0.0, 0.0, 0.0);
    }
}

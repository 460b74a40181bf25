//! Track guidance (spec §4.6, component C6): a unified Pure-Pursuit /
//! Stanley law over A→B lines and curves.

use crate::config::{GuidanceAlgorithm, GuidanceConfig, VehicleConfig};
use crate::error::ErrorCounters;
use guidance_types::{wrap_pi, Track, TrackKind, Vec2};

const STANLEY_SPEED_SCALE: f64 = 0.27778;
const STANLEY_AXIS_CLAMP: f64 = 0.74;
const NEAR_SEARCH_WINDOW: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuidanceMiss {
    NoTrack,
    TrackTooShort,
    SearchLost,
}

#[derive(Debug, Clone, Copy)]
pub struct GuidanceOutput {
    pub steer_angle_rad: f64,
    pub cross_track_error_m: f64,
}

/// Per-track guidance state: the curve near-point search window and the
/// dead-zone hysteresis counter. Reset whenever a different track engages.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuidanceState {
    near_index: usize,
    dead_zone_streak: u32,
}

impl GuidanceState {
    pub fn reset(&mut self) {
        self.near_index = 0;
        self.dead_zone_streak = 0;
    }
}

fn dot(a: Vec2, b: Vec2) -> f64 {
    a.easting * b.easting + a.northing * b.northing
}

/// Perpendicular distance + parameter `t` (0..1 clamp-free) of `p`'s
/// projection onto segment `a->b`.
fn point_segment(p: Vec2, a: Vec2, b: Vec2) -> (f64, Vec2) {
    let d = b.sub(&a);
    let len_sq = dot(d, d);
    if len_sq < 1e-12 {
        return (p.dist(&a), a);
    }
    let t = dot(p.sub(&a), d) / len_sq;
    let t_clamped = t.clamp(0.0, 1.0);
    let proj = a.add(&d.scale(t_clamped));
    (p.dist(&proj), proj)
}

struct LineGeom {
    heading: f64,
    cte: f64,
    goal_anchor: Vec2,
}

fn ab_geometry(pivot: Vec2, a: Vec2, b: Vec2) -> LineGeom {
    let d = b.sub(&a);
    let heading = d.easting.atan2(d.northing);
    let right = Vec2::right_of_heading(heading);
    let cte = dot(pivot.sub(&a), right);
    // Foot of the perpendicular from pivot onto the infinite line.
    let along = dot(pivot.sub(&a), d) / dot(d, d).max(1e-12);
    let foot = a.add(&d.scale(along));
    LineGeom { heading, cte, goal_anchor: foot }
}

fn curve_geometry(
    points: &[guidance_types::Vec3],
    pivot: Vec2,
    state: &mut GuidanceState,
) -> Option<LineGeom> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len();
    let start = state.near_index.min(n - 2).saturating_sub(NEAR_SEARCH_WINDOW);
    let end = (state.near_index + NEAR_SEARCH_WINDOW).min(n - 2);

    let mut best: Option<(usize, f64, Vec2)> = None;
    for i in start..=end {
        let a = points[i].xy();
        let b = points[i + 1].xy();
        let (dist, proj) = point_segment(pivot, a, b);
        if best.map(|(_, bd, _)| dist < bd).unwrap_or(true) {
            best = Some((i, dist, proj));
        }
    }
    let (idx, _, foot) = best?;
    state.near_index = idx;

    let a = points[idx].xy();
    let b = points[idx + 1].xy();
    let d = b.sub(&a);
    if dot(d, d) < 1e-9 {
        return None;
    }
    let heading = d.easting.atan2(d.northing);
    let right = Vec2::right_of_heading(heading);
    let cte = dot(pivot.sub(&a), right);
    Some(LineGeom { heading, cte, goal_anchor: foot })
}

fn dynamic_look_ahead(speed: f64, xte: f64, cfg: &GuidanceConfig) -> f64 {
    let xte_abs = xte.abs();
    let k = if xte_abs <= 0.1 {
        cfg.look_ahead_hold_m
    } else {
        let acquire = cfg.look_ahead_hold_m * cfg.look_ahead_acquire_factor;
        if xte_abs >= 0.4 {
            acquire
        } else {
            let frac = (xte_abs - 0.1) / (0.4 - 0.1);
            cfg.look_ahead_hold_m + (acquire - cfg.look_ahead_hold_m) * frac
        }
    };
    let l_d = speed * 0.05 * cfg.goal_point_look_ahead_mult * k + k;
    l_d.max(cfg.min_look_ahead_m)
}

fn pure_pursuit_angle(pivot: Vec2, heading: f64, goal: Vec2, wheelbase: f64) -> f64 {
    let dx = goal.easting - pivot.easting;
    let dy = goal.northing - pivot.northing;
    let dist_sq = (dx * dx + dy * dy).max(1e-9);
    (2.0 * (dx * heading.cos() + dy * heading.sin()) * wheelbase / dist_sq).atan()
}

fn stanley_angle(heading_err: f64, xte: f64, speed: f64, vcfg: &VehicleConfig) -> f64 {
    let heading_term = (vcfg.stanley_heading_gain * heading_err).clamp(-STANLEY_AXIS_CLAMP, STANLEY_AXIS_CLAMP);
    let xte_term = (vcfg.stanley_xte_gain * xte / (speed * STANLEY_SPEED_SCALE + 1.0))
        .atan()
        .clamp(-STANLEY_AXIS_CLAMP, STANLEY_AXIS_CLAMP);
    -(heading_term + xte_term)
}

/// Computes one cycle of guidance. `pivot`/`heading_rad`/`speed` describe
/// the vehicle; `is_turn_compensated` multiplies the Pure-Pursuit result by
/// `uTurnCompensation` (used only while following a u-turn path).
pub fn guide(
    track: Option<&Track>,
    pivot: Vec2,
    heading_rad: f64,
    speed: f64,
    vcfg: &VehicleConfig,
    gcfg: &GuidanceConfig,
    state: &mut GuidanceState,
    counters: &mut ErrorCounters,
    is_turn_compensated: bool,
) -> Result<GuidanceOutput, GuidanceMiss> {
    let Some(track) = track else {
        counters.no_guidance += 1;
        return Err(GuidanceMiss::NoTrack);
    };

    let geom = match &track.kind {
        TrackKind::AbLine { a, b, .. } => {
            let (a, b) = track.nudged_ab().unwrap_or((*a, *b));
            Some(ab_geometry(pivot, a, b))
        }
        TrackKind::Curve { points } => {
            if points.len() < 2 {
                counters.no_guidance += 1;
                return Err(GuidanceMiss::TrackTooShort);
            }
            let nudged = track.nudged_curve().unwrap_or_else(|| points.clone());
            curve_geometry(&nudged, pivot, state)
        }
    };

    let Some(geom) = geom else {
        counters.guidance_misses += 1;
        return Err(GuidanceMiss::SearchLost);
    };

    let xte = geom.cte;
    let mut steer = match gcfg.algorithm {
        GuidanceAlgorithm::PurePursuit => {
            let l_d = dynamic_look_ahead(speed, xte, gcfg);
            let dir = Vec2::new(geom.heading.sin(), geom.heading.cos());
            let goal = geom.goal_anchor.add(&dir.scale(l_d));
            let angle = pure_pursuit_angle(pivot, heading_rad, goal, vcfg.wheelbase_m);
            let angle = angle * vcfg.pure_pursuit_gain;
            if is_turn_compensated {
                angle * vcfg.u_turn_compensation
            } else {
                angle
            }
        }
        GuidanceAlgorithm::Stanley => {
            let heading_err = wrap_pi(geom.heading - heading_rad);
            stanley_angle(heading_err, xte, speed, vcfg)
        }
    };

    if xte.abs() <= gcfg.dead_zone_m {
        state.dead_zone_streak += 1;
        if state.dead_zone_streak > gcfg.dead_zone_delay_cycles {
            steer = 0.0;
        }
    } else {
        state.dead_zone_streak = 0;
    }

    steer = steer.clamp(-vcfg.max_steer_angle_rad, vcfg.max_steer_angle_rad);

    Ok(GuidanceOutput { steer_angle_rad: steer, cross_track_error_m: xte })
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidance_types::Vec3;

    fn vcfg() -> VehicleConfig {
        VehicleConfig::default()
    }

    fn gcfg() -> GuidanceConfig {
        GuidanceConfig::default()
    }

    #[test]
    fn no_track_returns_no_guidance_and_counts() {
        let mut state = GuidanceState::default();
        let mut counters = ErrorCounters::default();
        let res = guide(
            None,
            Vec2::ZERO,
            0.0,
            1.0,
            &vcfg(),
            &gcfg(),
            &mut state,
            &mut counters,
            false,
        );
        assert_eq!(res.unwrap_err(), GuidanceMiss::NoTrack);
        assert_eq!(counters.no_guidance, 1);
    }

    #[test]
    fn on_line_produces_zero_cross_track_error() {
        let track = Track::ab("t", Vec2::new(0.0, 0.0), Vec2::new(0.0, 100.0));
        let mut state = GuidanceState::default();
        let mut counters = ErrorCounters::default();
        let out = guide(
            Some(&track),
            Vec2::new(0.0, 10.0),
            0.0,
            2.0,
            &vcfg(),
            &gcfg(),
            &mut state,
            &mut counters,
            false,
        )
        .unwrap();
        assert!(out.cross_track_error_m.abs() < 1e-9);
        assert!(out.steer_angle_rad.abs() < 1e-6);
    }

    #[test]
    fn offset_right_of_line_has_positive_cross_track_error() {
        let track = Track::ab("t", Vec2::new(0.0, 0.0), Vec2::new(0.0, 100.0));
        let mut state = GuidanceState::default();
        let mut counters = ErrorCounters::default();
        let out = guide(
            Some(&track),
            Vec2::new(3.0, 10.0),
            0.0,
            2.0,
            &vcfg(),
            &gcfg(),
            &mut state,
            &mut counters,
            false,
        )
        .unwrap();
        assert!(out.cross_track_error_m > 0.0);
    }

    #[test]
    fn short_curve_is_rejected() {
        let track = Track::curve("c", vec![Vec3::new(0.0, 0.0, 0.0)]);
        let mut state = GuidanceState::default();
        let mut counters = ErrorCounters::default();
        let res = guide(
            Some(&track),
            Vec2::ZERO,
            0.0,
            1.0,
            &vcfg(),
            &gcfg(),
            &mut state,
            &mut counters,
            false,
        );
        assert_eq!(res.unwrap_err(), GuidanceMiss::TrackTooShort);
    }

    #[test]
    fn dead_zone_suppresses_steering_after_delay() {
        let track = Track::ab("t", Vec2::new(0.0, 0.0), Vec2::new(0.0, 100.0));
        let mut state = GuidanceState::default();
        let mut counters = ErrorCounters::default();
        let mut gc = gcfg();
        gc.dead_zone_m = 1.0;
        gc.dead_zone_delay_cycles = 2;
        let mut last = GuidanceOutput { steer_angle_rad: 1.0, cross_track_error_m: 0.0 };
        for _ in 0..5 {
            last = guide(
                Some(&track),
                Vec2::new(0.2, 10.0),
                0.05,
                1.0,
                &vcfg(),
                &gc,
                &mut state,
                &mut counters,
                false,
            )
            .unwrap();
        }
        assert_eq!(last.steer_angle_rad, 0.0);
    }

    #[test]
    fn stanley_matches_pure_pursuit_sign_on_offset_line() {
        let track = Track::ab("t", Vec2::new(0.0, 0.0), Vec2::new(0.0, 100.0));
        let mut gc = gcfg();
        gc.algorithm = GuidanceAlgorithm::Stanley;
        let mut state = GuidanceState::default();
        let mut counters = ErrorCounters::default();
        let out = guide(
            Some(&track),
            Vec2::new(3.0, 10.0),
            0.0,
            2.0,
            &vcfg(),
            &gc,
            &mut state,
            &mut counters,
            false,
        )
        .unwrap();
        assert!(out.steer_angle_rad < 0.0, "steer should correct back toward the line");
    }
}

//! Fusion & offset (spec §4.4, component C4).
//!
//! Antenna-to-pivot translation, heading-fusion cascade, and the
//! fix-quality rate limit that decides whether a cycle's fix is usable
//! downstream at all.

use crate::config::ConnectionsConfig;
use crate::vehicle::VehicleState;
use guidance_types::{wrap_deg_360, Vec2};

/// Carries the previous cycle's position/heading forward so the
/// fix-to-fix heading estimate and the dual-GPS low-speed fallback have
/// something to compare against. Lives in the pipeline, one per vehicle.
///
/// `previous_heading_deg` also stands in for the IMU's own heading
/// estimate in the blend step: the sentence carries yaw rate, not an
/// absolute IMU heading, so the IMU term is the previous fused heading
/// dead-reckoned forward by `yaw_rate * dt`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FusionHistory {
    pub previous_local: Option<Vec2>,
    pub previous_heading_deg: Option<f64>,
}

/// Mutates `state.position.{easting,northing}` in place from antenna to
/// pivot, given the heading already populated by C3. `a_p` is fore/aft
/// (positive = antenna ahead of pivot), `a_o` is lateral (positive =
/// antenna right of pivot). Skipped when both offsets are sub-millimeter.
pub fn antenna_to_pivot(state: &mut VehicleState, a_p: f64, a_o: f64) {
    if a_p.abs() < 1e-3 && a_o.abs() < 1e-3 {
        return;
    }
    let h = state.heading_rad;
    let fwd = Vec2::new(h.sin(), h.cos());
    let right = Vec2::right_of_heading(h);
    let antenna = state.position.local();
    let pivot = antenna.sub(&fwd.scale(a_p)).sub(&right.scale(a_o));
    state.position.easting = pivot.easting;
    state.position.northing = pivot.northing;
}

/// Runs the full heading-fusion cascade and the rate-limit gate, updating
/// `state.position.heading` / `state.heading_rad` / `state.fix_valid` in
/// place. `history` is updated with this cycle's accepted position/heading
/// for the next call. `dt_s` is the elapsed time since the previous cycle,
/// used to dead-reckon the IMU heading term from yaw rate.
pub fn fuse_heading(
    state: &mut VehicleState,
    cfg: &ConnectionsConfig,
    history: &mut FusionHistory,
    dt_s: f64,
) {
    let mut heading = state.position.heading;
    let local = state.position.local();

    if cfg.dual_gps {
        heading = wrap_deg_360(heading + cfg.dual_heading_offset_deg);
        if state.position.speed < cfg.dual_switch_speed_mps {
            if let Some(prev) = history.previous_local {
                if prev.dist(&local) >= cfg.fix_to_fix_distance_m {
                    heading = fix_to_fix_heading(prev, local);
                }
            }
        }
    } else if state.position.speed >= cfg.min_gps_step_m {
        if let Some(prev) = history.previous_local {
            heading = fix_to_fix_heading(prev, local);
        }
    }

    if state.imu_valid {
        let w = cfg.heading_fusion_weight.clamp(1e-6, 1.0 - 1e-6);
        let gps_wrapped = wrap_signed_180(heading);
        let base = history.previous_heading_deg.unwrap_or(heading);
        let imu_wrapped = wrap_signed_180(base + state.yaw_rate.to_degrees() * dt_s);
        let blended = gps_wrapped + (imu_wrapped - gps_wrapped) * (1.0 - w);
        heading = wrap_deg_360(blended);
    }

    state.position.heading = heading;
    state.heading_rad = heading.to_radians();

    let fix_ok = state.fix_quality as u32 >= cfg.min_fix_quality as u32
        && state.hdop <= cfg.max_hdop
        && (cfg.max_diff_age_s == 0.0 || state.diff_age_s <= cfg.max_diff_age_s);
    state.fix_valid = fix_ok;

    history.previous_local = Some(local);
    history.previous_heading_deg = Some(heading);
}

fn fix_to_fix_heading(prev: Vec2, cur: Vec2) -> f64 {
    let d = cur.sub(&prev);
    wrap_deg_360(d.easting.atan2(d.northing).to_degrees())
}

fn wrap_signed_180(deg: f64) -> f64 {
    let mut d = deg % 360.0;
    if d > 180.0 {
        d -= 360.0;
    } else if d <= -180.0 {
        d += 360.0;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::VehicleState;

    #[test]
    fn antenna_offset_below_threshold_is_skipped() {
        let mut state = VehicleState::new();
        state.position.easting = 10.0;
        state.position.northing = 20.0;
        antenna_to_pivot(&mut state, 0.0005, 0.0);
        assert_eq!(state.position.easting, 10.0);
        assert_eq!(state.position.northing, 20.0);
    }

    #[test]
    fn antenna_offset_moves_pivot_behind_heading() {
        let mut state = VehicleState::new();
        state.heading_rad = 0.0; // facing north
        state.position.easting = 0.0;
        state.position.northing = 10.0;
        antenna_to_pivot(&mut state, 2.0, 0.0);
        // pivot sits 2 m south of the antenna when facing north
        assert!((state.position.northing - 8.0).abs() < 1e-9);
        assert!(state.position.easting.abs() < 1e-9);
    }

    #[test]
    fn rate_limit_rejects_low_fix_quality() {
        let mut state = VehicleState::new();
        state.fix_quality = 0;
        state.hdop = 1.0;
        state.diff_age_s = 0.0;
        let cfg = ConnectionsConfig::default();
        let mut history = FusionHistory::default();
        fuse_heading(&mut state, &cfg, &mut history, 0.1);
        assert!(!state.fix_valid);
    }

    #[test]
    fn rate_limit_accepts_good_fix() {
        let mut state = VehicleState::new();
        state.fix_quality = 4;
        state.hdop = 0.8;
        state.diff_age_s = 1.0;
        let cfg = ConnectionsConfig::default();
        let mut history = FusionHistory::default();
        fuse_heading(&mut state, &cfg, &mut history, 0.1);
        assert!(state.fix_valid);
    }

    #[test]
    fn fix_to_fix_heading_prefers_recent_motion() {
        let mut state = VehicleState::new();
        state.position.easting = 0.0;
        state.position.northing = 10.0;
        state.position.speed = 1.0;
        state.position.heading = 999.0; // nonsense raw heading, should be overridden
        let cfg = ConnectionsConfig { min_gps_step_m: 0.1, ..ConnectionsConfig::default() };
        let mut history = FusionHistory {
            previous_local: Some(Vec2::new(0.0, 0.0)),
            previous_heading_deg: None,
        };
        fuse_heading(&mut state, &cfg, &mut history, 0.1);
        assert!((state.position.heading - 0.0).abs() < 1e-6);
    }

    #[test]
    fn rtk_heading_blend_matches_worked_example() {
        // HeadingFusionWeight=0.8, GPS heading=10, IMU dead-reckoned
        // heading=12 (zero yaw rate, previous fused heading already 12) ⇒
        // final = 10 + (12-10)*0.2 = 10.4.
        let mut state = VehicleState::new();
        state.position.heading = 10.0;
        state.imu_valid = true;
        state.yaw_rate = 0.0;
        state.fix_quality = 4;
        state.hdop = 0.8;
        state.diff_age_s = 1.0;
        let cfg = ConnectionsConfig::default();
        let mut history = FusionHistory { previous_local: None, previous_heading_deg: Some(12.0) };
        fuse_heading(&mut state, &cfg, &mut history, 0.1);
        assert!((state.position.heading - 10.4).abs() < 1e-9);
    }
}

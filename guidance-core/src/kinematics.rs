//! Tool kinematics (spec §4.5, component C5).
//!
//! Given the vehicle pivot and heading, derives the implement's centre and
//! left/right edge positions. Trailed geometries lag the tractor; lag is
//! modelled as a first-order filter driven by distance travelled rather
//! than wall-clock time, so the implement settles onto the tractor's path
//! after a fixed number of meters regardless of speed.

use crate::config::{ToolConfig, ToolKinematicsMode};
use guidance_types::{wrap_pi, Vec2};

#[derive(Debug, Clone, Copy)]
pub struct ToolEdges {
    pub centre: Vec2,
    pub left: Vec2,
    pub right: Vec2,
    pub heading: f64,
}

/// Trailing state for single-trailed and tow-between-tank geometries.
/// Unused (stays at its reset value) for rigid mounts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingState {
    tank_heading: f64,
    tool_heading: f64,
    initialised: bool,
}

impl TrailingState {
    /// Snaps the trailing chain directly behind the tractor. Idempotent:
    /// calling this twice with the same pivot heading is a no-op the
    /// second time.
    pub fn reset(&mut self, pivot_heading: f64) {
        self.tank_heading = pivot_heading;
        self.tool_heading = pivot_heading;
        self.initialised = true;
    }
}

/// Advances trailing state by `distance_m` of travel at the current pivot
/// heading, then returns the tool's centre/edge positions. `half_width` is
/// half the working width (spec's `w·(s+1)`-style widths are resolved by
/// the caller; this module only needs the half-width to emit edges).
pub fn compute(
    cfg: &ToolConfig,
    pivot: Vec2,
    pivot_heading: f64,
    distance_m: f64,
    half_width: f64,
    trailing: &mut TrailingState,
) -> ToolEdges {
    if !trailing.initialised {
        trailing.reset(pivot_heading);
    }

    match cfg.mode {
        ToolKinematicsMode::Rigid => {
            let fwd = Vec2::new(pivot_heading.sin(), pivot_heading.cos());
            let centre = pivot.sub(&fwd.scale(cfg.hitch_length_m));
            edges(centre, pivot_heading, half_width)
        }
        ToolKinematicsMode::SingleTrailed => {
            let hitch_len = cfg.hitch_length_m.max(1e-3);
            let alpha = 1.0 - (-distance_m.abs() / hitch_len).exp();
            trailing.tool_heading =
                wrap_pi(trailing.tool_heading + wrap_pi(pivot_heading - trailing.tool_heading) * alpha);

            let hitch_fwd = Vec2::new(pivot_heading.sin(), pivot_heading.cos());
            let hitch_point = pivot.sub(&hitch_fwd.scale(cfg.hitch_length_m));
            let tool_fwd = Vec2::new(trailing.tool_heading.sin(), trailing.tool_heading.cos());
            let centre = hitch_point.sub(&tool_fwd.scale(cfg.trailing_hitch_length_m));
            edges(centre, trailing.tool_heading, half_width)
        }
        ToolKinematicsMode::TowBetweenTank => {
            let tank_len = cfg.hitch_length_m.max(1e-3);
            let alpha_tank = 1.0 - (-distance_m.abs() / tank_len).exp();
            trailing.tank_heading =
                wrap_pi(trailing.tank_heading + wrap_pi(pivot_heading - trailing.tank_heading) * alpha_tank);
            let tractor_fwd = Vec2::new(pivot_heading.sin(), pivot_heading.cos());
            let tank_point = pivot.sub(&tractor_fwd.scale(cfg.hitch_length_m));

            let tool_len = cfg.trailing_hitch_length_m.max(1e-3);
            let alpha_tool = 1.0 - (-distance_m.abs() / tool_len).exp();
            trailing.tool_heading =
                wrap_pi(trailing.tool_heading + wrap_pi(trailing.tank_heading - trailing.tool_heading) * alpha_tool);
            let tank_fwd = Vec2::new(trailing.tank_heading.sin(), trailing.tank_heading.cos());
            let centre = tank_point.sub(&tank_fwd.scale(cfg.trailing_hitch_length_m));
            edges(centre, trailing.tool_heading, half_width)
        }
    }
}

fn edges(centre: Vec2, heading: f64, half_width: f64) -> ToolEdges {
    let right = Vec2::right_of_heading(heading);
    ToolEdges {
        centre,
        left: centre.sub(&right.scale(half_width)),
        right: centre.add(&right.scale(half_width)),
        heading,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rigid_mount_offsets_along_heading() {
        let cfg = ToolConfig { mode: ToolKinematicsMode::Rigid, hitch_length_m: 3.0, ..ToolConfig::default() };
        let mut trailing = TrailingState::default();
        let e = compute(&cfg, Vec2::new(0.0, 0.0), 0.0, 0.0, 2.0, &mut trailing);
        assert!((e.centre.northing + 3.0).abs() < 1e-9);
        assert!((e.left.easting + 2.0).abs() < 1e-9);
        assert!((e.right.easting - 2.0).abs() < 1e-9);
    }

    #[test]
    fn trailed_tool_converges_to_tractor_heading_after_enough_travel() {
        let cfg = ToolConfig {
            mode: ToolKinematicsMode::SingleTrailed,
            hitch_length_m: 2.0,
            trailing_hitch_length_m: 3.0,
            ..ToolConfig::default()
        };
        let mut trailing = TrailingState::default();
        trailing.reset(0.0);
        let mut heading = 0.0f64;
        let pivot = Vec2::ZERO;
        let mut edges_out = compute(&cfg, pivot, heading, 0.0, 2.0, &mut trailing);
        heading = 0.5; // abrupt turn
        for _ in 0..200 {
            edges_out = compute(&cfg, pivot, heading, 0.3, 2.0, &mut trailing);
        }
        assert!((edges_out.heading - heading).abs() < 1e-3);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut trailing = TrailingState::default();
        trailing.reset(1.0);
        let first = (trailing.tank_heading, trailing.tool_heading);
        trailing.reset(1.0);
        assert_eq!(first, (trailing.tank_heading, trailing.tool_heading));
    }

    #[test]
    fn tow_between_tank_chain_converges() {
        let cfg = ToolConfig {
            mode: ToolKinematicsMode::TowBetweenTank,
            hitch_length_m: 2.5,
            trailing_hitch_length_m: 2.5,
            ..ToolConfig::default()
        };
        let mut trailing = TrailingState::default();
        trailing.reset(0.0);
        let heading = 0.3;
        let mut edges_out = compute(&cfg, Vec2::ZERO, heading, 0.0, 1.0, &mut trailing);
        for _ in 0..300 {
            edges_out = compute(&cfg, Vec2::ZERO, heading, 0.3, 1.0, &mut trailing);
        }
        assert!((edges_out.heading - heading).abs() < 1e-3);
    }
}

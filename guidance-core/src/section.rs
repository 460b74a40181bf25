//! Section controller (spec §4.9, component C9).
//!
//! Runs once per GPS cycle for every section in auto mode: projects the
//! section's centre forward along a curved look-ahead, checks boundary,
//! headland, and coverage conditions at the current/look-on/look-off
//! points, and debounces the result through on/off and mapping timers
//! before handing a new patch vertex to the coverage engine.

use crate::config::ToolConfig;
use crate::coverage::CoverageEngine;
use crate::geometry;
use crate::kinematics::ToolEdges;
use guidance_types::{Boundary, Vec2};

const SECTION_ON_DELAY: u32 = 2;
/// Cycles after a section turns on before coverage recording begins; the
/// first recorded point after this delay uses a straight perpendicular
/// (no yaw bias) to avoid a spike coming out of a turn.
const MAPPING_ON_DELAY: u32 = 2;
const BOUNDARY_CURRENT_THRESHOLD: f64 = 0.95;
const BOUNDARY_LOOK_THRESHOLD: f64 = 0.50;
const TOOL_VEHICLE_ALIGN_LIMIT_RAD: f64 = 0.0523599; // 3 degrees
const YAW_RATE_MARGIN_LIMIT_RAD: f64 = 0.0191986; // ~1.1 deg/update
const YAW_RATE_DROP_LIMIT_RAD: f64 = 0.0785398; // ~4.5 deg/update

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionButton {
    Off,
    Auto,
    On,
}

#[derive(Debug, Clone, Copy)]
pub struct SectionState {
    pub on: bool,
    on_streak: u32,
    off_streak: u32,
    pub mapping: bool,
    mapping_streak: u32,
    pub button: SectionButton,
    pub in_boundary: bool,
    pub in_headland: bool,
    pub coverage_pct: f64,
}

impl Default for SectionState {
    fn default() -> Self {
        Self {
            on: false,
            on_streak: 0,
            off_streak: 0,
            mapping: false,
            mapping_streak: 0,
            button: SectionButton::Auto,
            in_boundary: false,
            in_headland: false,
            coverage_pct: 0.0,
        }
    }
}

pub struct SectionController {
    pub sections: Vec<SectionState>,
}

impl SectionController {
    pub fn new(count: usize) -> Self {
        Self { sections: vec![SectionState::default(); count] }
    }

    pub fn set_button(&mut self, index: usize, button: SectionButton) {
        if let Some(s) = self.sections.get_mut(index) {
            s.button = button;
        }
    }

    /// Runs one cycle for every section, updates the coverage engine for
    /// sections currently mapping, and returns the section bitmask (bit i
    /// = section i on).
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        cfg: &ToolConfig,
        boundary: &Boundary,
        coverage: &mut CoverageEngine,
        tool: &ToolEdges,
        vehicle_heading_rad: f64,
        speed: f64,
        yaw_rate_rad_s: f64,
        master_on: bool,
    ) -> u32 {
        let right_dir = Vec2::right_of_heading(tool.heading);
        let mut cumulative = 0.0;
        let mut bitmask = 0u32;

        for (i, state) in self.sections.iter_mut().enumerate() {
            let width = cfg.section_widths_m.get(i).copied().unwrap_or(0.0);
            let half = width / 2.0;
            let offset_from_left = cumulative + half;
            cumulative += width;
            let centre = tool.left.add(&right_dir.scale(offset_from_left));
            let zone = cfg.zone_map.get(i).copied().unwrap_or(0);

            if !master_on || matches!(state.button, SectionButton::Off) {
                turn_off(state, coverage, zone);
                continue;
            }
            if matches!(state.button, SectionButton::On) {
                force_on(state, coverage, zone, centre, right_dir, half);
                bitmask |= 1 << i;
                continue;
            }

            let on_now = evaluate_auto(
                state,
                cfg,
                boundary,
                coverage,
                centre,
                right_dir,
                half,
                tool.heading,
                speed,
                yaw_rate_rad_s,
            );
            if on_now {
                bitmask |= 1 << i;
            }

            if state.mapping {
                record_point(
                    state,
                    coverage,
                    zone,
                    centre,
                    right_dir,
                    half,
                    tool.heading,
                    vehicle_heading_rad,
                    cfg.coverage_margin_m,
                    yaw_rate_rad_s,
                );
            }
        }
        bitmask
    }
}

fn turn_off(state: &mut SectionState, coverage: &mut CoverageEngine, zone: u8) {
    if state.on {
        state.on = false;
    }
    if state.mapping {
        coverage.stop_mapping(zone);
    }
    state.mapping = false;
    state.on_streak = 0;
    state.off_streak = 0;
    state.mapping_streak = 0;
}

fn force_on(
    state: &mut SectionState,
    coverage: &mut CoverageEngine,
    zone: u8,
    centre: Vec2,
    right_dir: Vec2,
    half: f64,
) {
    if !state.on {
        state.on = true;
        state.mapping = true;
        state.mapping_streak = 0;
        coverage.start_mapping(zone, centre.sub(&right_dir.scale(half)), centre.add(&right_dir.scale(half)), None);
    }
    state.off_streak = 0;
}

/// Projects `centre` forward by `distance` along the tool's path: a
/// straight step for `|yaw_rate| < 0.5 rad/s`, otherwise an arc of radius
/// `R = speed/|yaw_rate|` swept by `turn_angle = distance/R`.
fn project_forward(centre: Vec2, heading: f64, speed: f64, yaw_rate: f64, distance: f64) -> Vec2 {
    if distance.abs() < 1e-9 {
        return centre;
    }
    if yaw_rate.abs() < 0.5 {
        let fwd = Vec2::new(heading.sin(), heading.cos());
        centre.add(&fwd.scale(distance))
    } else {
        let r = speed.abs().max(1e-6) / yaw_rate.abs();
        let turn_angle = distance / r;
        let centre_of_turn = centre.add(&Vec2::right_of_heading(heading).scale(r));
        let rotated_heading = heading + turn_angle;
        centre_of_turn.sub(&Vec2::right_of_heading(rotated_heading).scale(r))
    }
}

#[allow(clippy::too_many_arguments)]
fn evaluate_auto(
    state: &mut SectionState,
    cfg: &ToolConfig,
    boundary: &Boundary,
    coverage: &CoverageEngine,
    centre: Vec2,
    right_dir: Vec2,
    half: f64,
    tool_heading: f64,
    speed: f64,
    yaw_rate: f64,
) -> bool {
    let d_on = speed * cfg.look_ahead_on_s;
    let d_off = speed * cfg.look_ahead_off_s;

    let look_on_point = project_forward(centre, tool_heading, speed, yaw_rate, d_on);
    let look_off_point = project_forward(centre, tool_heading, speed, yaw_rate, d_off);

    let current_boundary_frac = geometry::segment_inside_fraction(boundary, centre, tool_heading, half);
    let look_on_boundary_frac = geometry::segment_inside_fraction(boundary, look_on_point, tool_heading, half);
    let look_off_boundary_frac = geometry::segment_inside_fraction(boundary, look_off_point, tool_heading, half);

    let penetration = 0.30 + speed * 0.2;
    let look_on_in_headland = boundary
        .headland
        .as_ref()
        .map(|h| {
            let expanded = geometry::polygon_offset(h, penetration);
            geometry::point_in_polygon(&expanded, look_on_point)
        })
        .unwrap_or(false);
    let look_off_in_headland =
        boundary.headland.as_ref().map(|h| geometry::point_in_polygon(h, look_off_point)).unwrap_or(false);

    state.in_boundary = current_boundary_frac >= BOUNDARY_CURRENT_THRESHOLD;
    state.in_headland =
        boundary.headland.as_ref().map(|h| geometry::point_in_polygon(h, centre)).unwrap_or(false);

    let look_on_covered = coverage.segment_coverage(look_on_point, tool_heading, half, 0.0) >= cfg.min_coverage_pct;
    let look_off_covered = coverage.segment_coverage(look_off_point, tool_heading, half, 0.0) >= cfg.min_coverage_pct;
    state.coverage_pct = coverage.segment_coverage(centre, tool_heading, half, 0.0);

    let look_on_in_boundary = look_on_boundary_frac >= BOUNDARY_LOOK_THRESHOLD;
    let look_off_in_boundary = look_off_boundary_frac >= BOUNDARY_LOOK_THRESHOLD;

    let mut should_on = !look_on_covered && look_on_in_boundary && !look_on_in_headland;
    let should_off = look_off_covered || !look_off_in_boundary || look_off_in_headland;

    if current_boundary_frac < BOUNDARY_CURRENT_THRESHOLD {
        should_on = false;
    }
    let margin_ok = if cfg.coverage_margin_m > 0.0 {
        let left_edge = centre.sub(&right_dir.scale(half + cfg.coverage_margin_m));
        let right_edge = centre.add(&right_dir.scale(half + cfg.coverage_margin_m));
        geometry::point_in_boundary(boundary, left_edge) && geometry::point_in_boundary(boundary, right_edge)
    } else {
        true
    };
    let should_on = should_on && margin_ok;
    let force_off = current_boundary_frac < BOUNDARY_CURRENT_THRESHOLD || !margin_ok;

    if force_off || should_off {
        state.on_streak = 0;
        state.off_streak += 1;
        let off_delay_cycles = (cfg.turn_off_delay_s * 10.0) as u32;
        if state.off_streak > off_delay_cycles || force_off {
            state.on = false;
            state.mapping = false;
            state.mapping_streak = 0;
        }
    } else if should_on {
        state.off_streak = 0;
        state.on_streak += 1;
        if state.on_streak > SECTION_ON_DELAY {
            state.on = true;
        }
    } else {
        state.on_streak = 0;
        state.off_streak = 0;
    }

    if state.on && !state.mapping {
        state.mapping = true;
        state.mapping_streak = 0;
    }

    state.on
}

#[allow(clippy::too_many_arguments)]
fn record_point(
    state: &mut SectionState,
    coverage: &mut CoverageEngine,
    zone: u8,
    centre: Vec2,
    right_dir: Vec2,
    half: f64,
    tool_heading: f64,
    vehicle_heading: f64,
    margin_m: f64,
    yaw_rate: f64,
) {
    state.mapping_streak += 1;
    if state.mapping_streak <= MAPPING_ON_DELAY {
        return;
    }

    if yaw_rate.abs() > YAW_RATE_DROP_LIMIT_RAD {
        return;
    }

    let aligned = (tool_heading - vehicle_heading).abs() <= TOOL_VEHICLE_ALIGN_LIMIT_RAD;
    let apply_margin = margin_m > 0.0 && aligned && yaw_rate.abs() <= YAW_RATE_MARGIN_LIMIT_RAD;
    let use_straight_edges = state.mapping_streak == MAPPING_ON_DELAY + 1;

    let half_effective = if apply_margin && !use_straight_edges { half + margin_m } else { half };
    let left = centre.sub(&right_dir.scale(half_effective));
    let right = centre.add(&right_dir.scale(half_effective));

    if state.mapping_streak == MAPPING_ON_DELAY + 1 {
        coverage.start_mapping(zone, left, right, None);
    } else {
        coverage.add_coverage_point(zone, left, right);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::ToolEdges;
    use guidance_types::Polygon;

    fn square(side: f64) -> Polygon {
        Polygon::new(vec![
            guidance_types::Vec3::new(0.0, 0.0, 0.0),
            guidance_types::Vec3::new(side, 0.0, 0.0),
            guidance_types::Vec3::new(side, side, 0.0),
            guidance_types::Vec3::new(0.0, side, 0.0),
        ])
    }

    fn edges_at(centre_e: f64, centre_n: f64, half: f64) -> ToolEdges {
        ToolEdges {
            centre: Vec2::new(centre_e, centre_n),
            left: Vec2::new(centre_e - half, centre_n),
            right: Vec2::new(centre_e + half, centre_n),
            heading: 0.0,
        }
    }

    #[test]
    fn master_off_forces_all_sections_off() {
        let mut controller = SectionController::new(2);
        let mut coverage = CoverageEngine::new(0.0, 0.0, 100.0, 100.0);
        let boundary = Boundary::new(square(100.0));
        let cfg = ToolConfig { section_widths_m: vec![3.0, 3.0], zone_map: vec![0, 0], ..ToolConfig::default() };
        let tool = edges_at(50.0, 50.0, 3.0);
        let mask = controller.update(&cfg, &boundary, &mut coverage, &tool, 0.0, 2.0, 0.0, false);
        assert_eq!(mask, 0);
    }

    #[test]
    fn manual_on_forces_section_and_starts_mapping() {
        let mut controller = SectionController::new(1);
        controller.set_button(0, SectionButton::On);
        let mut coverage = CoverageEngine::new(0.0, 0.0, 100.0, 100.0);
        let boundary = Boundary::new(square(100.0));
        let cfg = ToolConfig { section_widths_m: vec![3.0], zone_map: vec![0], ..ToolConfig::default() };
        let tool = edges_at(50.0, 50.0, 1.5);
        let mask = controller.update(&cfg, &boundary, &mut coverage, &tool, 0.0, 2.0, 0.0, true);
        assert_eq!(mask, 1);
        assert!(controller.sections[0].mapping);
    }

    #[test]
    fn auto_section_turns_on_inside_boundary_after_delay() {
        let mut controller = SectionController::new(1);
        let mut coverage = CoverageEngine::new(0.0, 0.0, 100.0, 100.0);
        let boundary = Boundary::new(square(100.0));
        let cfg = ToolConfig { section_widths_m: vec![3.0], zone_map: vec![0], ..ToolConfig::default() };
        let tool = edges_at(50.0, 50.0, 1.5);
        let mut mask = 0;
        for _ in 0..5 {
            mask = controller.update(&cfg, &boundary, &mut coverage, &tool, 0.0, 2.0, 0.0, true);
        }
        assert_eq!(mask, 1);
    }

    #[test]
    fn current_boundary_violation_forces_off_regardless_of_lookahead() {
        let mut controller = SectionController::new(1);
        let mut coverage = CoverageEngine::new(0.0, 0.0, 100.0, 100.0);
        let boundary = Boundary::new(square(100.0));
        let cfg = ToolConfig { section_widths_m: vec![3.0], zone_map: vec![0], ..ToolConfig::default() };
        // Centre well outside the field: current boundary fraction is 0.
        let tool = edges_at(500.0, 500.0, 1.5);
        let mask = controller.update(&cfg, &boundary, &mut coverage, &tool, 0.0, 2.0, 0.0, true);
        assert_eq!(mask, 0);
    }

    #[test]
    fn project_forward_arc_scales_with_lookahead_distance() {
        let centre = Vec2::new(0.0, 0.0);
        let near = project_forward(centre, 0.0, 5.0, 1.0, 2.0);
        let far = project_forward(centre, 0.0, 5.0, 1.0, 8.0);
        // Same radius (speed/yaw_rate), different arc length: the farther
        // look-ahead point must not land at the same spot as the near one.
        assert!(far.dist(&near) > 1.0, "near={near:?} far={far:?}");
    }

    #[test]
    fn project_forward_arc_radius_scales_with_speed() {
        let centre = Vec2::new(0.0, 0.0);
        let slow = project_forward(centre, 0.0, 1.0, 1.0, 4.0);
        let fast = project_forward(centre, 0.0, 10.0, 1.0, 4.0);
        // A faster vehicle sweeps a wider-radius arc over the same distance,
        // landing closer to the straight-line projection.
        let straight = centre.add(&Vec2::new(0.0, 4.0));
        assert!(fast.dist(&straight) < slow.dist(&straight));
    }

    #[test]
    fn margin_edge_inside_boundary_hole_keeps_section_off() {
        // A hole straddling the right margin edge (centre.e + half + margin =
        // 54.5) is invisible to an outer-ring-only check but must be caught
        // by the holes-aware point_in_boundary used in margin_ok.
        let hole = Polygon::new(vec![
            guidance_types::Vec3::new(54.0, 40.0, 0.0),
            guidance_types::Vec3::new(56.0, 40.0, 0.0),
            guidance_types::Vec3::new(56.0, 60.0, 0.0),
            guidance_types::Vec3::new(54.0, 60.0, 0.0),
        ]);
        let boundary =
            Boundary { outer: square(100.0), holes: vec![hole], hole_drive_thru: vec![false], headland: None };
        let mut controller = SectionController::new(1);
        let mut coverage = CoverageEngine::new(0.0, 0.0, 100.0, 100.0);
        let cfg = ToolConfig {
            section_widths_m: vec![3.0],
            zone_map: vec![0],
            coverage_margin_m: 3.0,
            ..ToolConfig::default()
        };
        let tool = edges_at(50.0, 50.0, 1.5);
        let mut mask = 0;
        for _ in 0..5 {
            mask = controller.update(&cfg, &boundary, &mut coverage, &tool, 0.0, 2.0, 0.0, true);
        }
        assert_eq!(mask, 0, "margin edge sits inside a boundary hole, section must stay off");
    }
}

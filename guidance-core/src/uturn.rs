//! U-turn planning and following (spec §4.7, component C7).
//!
//! Synthesises a dense heading-tagged polyline from the current track to
//! the next parallel row, constrained to stay inside a turn-area boundary,
//! then offers a follower that steers along that path with either guidance
//! law.
//!
//! Omega and Wide are the same underlying construction: a Dubins path
//! between the entry pose and the laterally-offset exit pose. Dubins
//! already picks a CCC family for a tight lateral offset (the "omega"
//! loop) and a CSC family once the offset exceeds `2R` (two arcs joined by
//! a straight run along the boundary, i.e. exactly the "wide" shape), so
//! both styles are generated by the same call to `geometry::generate_dubins`
//! and only K-style needs its own synthesis.

use crate::config::{GuidanceAlgorithm, UTurnConfig, UTurnStyle, VehicleConfig};
use crate::error::TurnPlanError;
use crate::geometry;
use guidance_types::{wrap_pi, Polygon, Track, TrackKind, Vec2, Vec3};
use std::f64::consts::PI;

const MIN_PIVOT_CLEARANCE_M: f64 = 3.0;
const MAX_SHIFT_STEPS: u32 = 300;
const LEG_SPACING_M: f64 = 1.0;
const DENSIFY_SPACING_M: f64 = 1.0;

fn forward(heading: f64) -> Vec2 {
    Vec2::new(heading.sin(), heading.cos())
}

/// `w·(s+1) + 2·o·sign_left`, the lateral distance from the current row to
/// the next one this turn must cover.
pub fn effective_turn_offset(tool_width_minus_overlap: f64, row_skip: u32, tool_offset: f64, turn_left: bool) -> f64 {
    let sign_left = if turn_left { 1.0 } else { -1.0 };
    tool_width_minus_overlap * (row_skip as f64 + 1.0) + 2.0 * tool_offset * sign_left
}

struct EntryPoint {
    pose: Vec3,
}

/// The track's own native heading (radians) and the point on it nearest
/// `pivot` — the direction of travel an operator following `a → b` (or the
/// curve's stored point order) would have, before any `heading_same_way`
/// flip.
fn track_heading_at(track: &Track, pivot: Vec2) -> (Vec2, f64) {
    match &track.kind {
        TrackKind::AbLine { a, b, heading } => {
            let a = *a;
            let b = *b;
            let d = b.sub(&a);
            let len_sq = (d.easting * d.easting + d.northing * d.northing).max(1e-9);
            let t = ((pivot.easting - a.easting) * d.easting + (pivot.northing - a.northing) * d.northing) / len_sq;
            let foot = a.add(&d.scale(t));
            (foot, heading.to_radians())
        }
        TrackKind::Curve { points } => {
            if points.len() < 2 {
                return (pivot, 0.0);
            }
            let mut best = (0usize, f64::INFINITY, points[0].xy());
            for w in points.windows(2).enumerate() {
                let (i, pair) = w;
                let a = pair[0].xy();
                let b = pair[1].xy();
                let d = b.sub(&a);
                let len_sq = (d.easting * d.easting + d.northing * d.northing).max(1e-9);
                let t = (((pivot.easting - a.easting) * d.easting + (pivot.northing - a.northing) * d.northing)
                    / len_sq)
                    .clamp(0.0, 1.0);
                let proj = a.add(&d.scale(t));
                let dist = pivot.dist(&proj);
                if dist < best.1 {
                    best = (i, dist, proj);
                }
            }
            let seg_heading = points[best.0 + 1].xy().sub(&points[best.0].xy());
            (best.2, seg_heading.easting.atan2(seg_heading.northing))
        }
    }
}

/// Whether the vehicle's current heading aligns with the track's native
/// direction (within a quarter turn) rather than the track being driven in
/// reverse — the `heading_same_way` input to [`plan`], derived from actual
/// vehicle state instead of assumed constant.
pub fn heading_matches_track(track: &Track, pivot: Vec2, vehicle_heading_rad: f64) -> bool {
    let (_, track_heading) = track_heading_at(track, pivot);
    wrap_pi(vehicle_heading_rad - track_heading).abs() < PI / 2.0
}

/// Scans forward along the track from the vehicle's current position until
/// a sample first lies outside `turn_area`'s outer ring, then bisects to
/// the crossing.
fn find_entry(track: &Track, pivot: Vec2, heading_same_way: bool, turn_area: &Polygon) -> Option<EntryPoint> {
    let (start, h) = track_heading_at(track, pivot);
    if matches!(&track.kind, TrackKind::Curve { points } if points.len() < 2) {
        return None;
    }
    let dir_heading = if heading_same_way { h } else { wrap_pi(h + PI) };

    let fwd = forward(dir_heading);
    let step = 0.5;
    let max_dist = 1000.0;
    let mut prev = start;
    let mut dist = 0.0;
    if !geometry::point_in_polygon(turn_area, start) {
        // Already outside; the crossing is right here.
        return Some(EntryPoint { pose: Vec3::new(start.easting, start.northing, dir_heading) });
    }
    while dist < max_dist {
        let next = prev.add(&fwd.scale(step));
        dist += step;
        if !geometry::point_in_polygon(turn_area, next) {
            let crossing = bisect(turn_area, prev, next);
            return Some(EntryPoint { pose: Vec3::new(crossing.easting, crossing.northing, dir_heading) });
        }
        prev = next;
    }
    None
}

fn bisect(turn_area: &Polygon, mut inside: Vec2, mut outside: Vec2) -> Vec2 {
    for _ in 0..24 {
        let mid = Vec2::new((inside.easting + outside.easting) / 2.0, (inside.northing + outside.northing) / 2.0);
        if geometry::point_in_polygon(turn_area, mid) {
            inside = mid;
        } else {
            outside = mid;
        }
    }
    inside
}

fn synth_k_style(entry: Vec3, exit: Vec3, radius: f64, turn_left: bool) -> Vec<Vec3> {
    let sign = if turn_left { -1.0 } else { 1.0 };
    let leg1_end = {
        let p = entry.xy().add(&forward(entry.heading).scale(radius));
        Vec3::new(p.easting, p.northing, entry.heading)
    };
    let mid_heading = wrap_pi(entry.heading + sign * PI / 2.0);
    let leg2_end = {
        let p = leg1_end.xy().add(&forward(mid_heading).scale(radius * 2.0));
        Vec3::new(p.easting, p.northing, mid_heading)
    };
    vec![entry, leg1_end, leg2_end, exit]
}

fn all_inside(path: &[Vec3], turn_area: &Polygon, holes: &[Polygon], drive_thru: &[bool]) -> bool {
    path.iter().all(|p| geometry::is_point_in_turn_area(turn_area, holes, drive_thru, p.xy()))
}

fn first_outside_index(path: &[Vec3], turn_area: &Polygon, holes: &[Polygon], drive_thru: &[bool]) -> Option<usize> {
    path.iter().position(|p| !geometry::is_point_in_turn_area(turn_area, holes, drive_thru, p.xy()))
}

fn min_pivot_distance(path: &[Vec3], pivot: Vec2) -> f64 {
    path.iter().map(|p| p.xy().dist(&pivot)).fold(f64::INFINITY, f64::min)
}

/// Translates `path` inward (opposite of `entry_heading`) until every
/// sample lies inside `turn_area` (holes subtracted, drive-through holes
/// passable). Returns the index of the first sample that was outside the
/// original (unshifted) arc.
fn shift_inward(
    path: &mut [Vec3],
    turn_area: &Polygon,
    holes: &[Polygon],
    drive_thru: &[bool],
    entry_heading: f64,
    pivot: Vec2,
) -> Result<usize, TurnPlanError> {
    let semi_circle_index = first_outside_index(path, turn_area, holes, drive_thru).unwrap_or(0);
    if all_inside(path, turn_area, holes, drive_thru) {
        return Ok(semi_circle_index);
    }

    let inward = forward(entry_heading).scale(-1.0);
    let original: Vec<Vec3> = path.to_vec();
    let mut steps = 0u32;
    let mut shift = 0.0;

    let mut try_shift = |shift: f64, path: &mut [Vec3]| {
        for (p, orig) in path.iter_mut().zip(original.iter()) {
            let moved = orig.xy().add(&inward.scale(shift));
            p.easting = moved.easting;
            p.northing = moved.northing;
        }
    };

    loop {
        shift += 1.0;
        steps += 1;
        if steps > MAX_SHIFT_STEPS {
            return Err(TurnPlanError::NoInteriorArc { steps });
        }
        try_shift(shift, path);
        if min_pivot_distance(path, pivot) < MIN_PIVOT_CLEARANCE_M {
            return Err(TurnPlanError::TooCloseToPivot { dist: min_pivot_distance(path, pivot) });
        }
        if all_inside(path, turn_area, holes, drive_thru) {
            break;
        }
    }

    // Back off by the last coarse step and refine at 0.1 m resolution.
    shift -= 1.0;
    loop {
        shift += 0.1;
        steps += 1;
        if steps > MAX_SHIFT_STEPS {
            return Err(TurnPlanError::NoInteriorArc { steps });
        }
        try_shift(shift, path);
        if min_pivot_distance(path, pivot) < MIN_PIVOT_CLEARANCE_M {
            return Err(TurnPlanError::TooCloseToPivot { dist: min_pivot_distance(path, pivot) });
        }
        if all_inside(path, turn_area, holes, drive_thru) {
            break;
        }
    }
    Ok(semi_circle_index)
}

fn nearest_vertex(poly: &Polygon, p: Vec2) -> usize {
    poly.points
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.xy().dist(&p).partial_cmp(&b.xy().dist(&p)).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Vertices walking from `from` to `to` around the ring, choosing the
/// shorter of the two directions.
fn boundary_arc(poly: &Polygon, from: usize, to: usize) -> Vec<Vec3> {
    let n = poly.points.len();
    if n == 0 {
        return Vec::new();
    }
    let fwd_len = (to + n - from) % n;
    let bwd_len = (from + n - to) % n;
    if fwd_len <= bwd_len {
        (0..=fwd_len).map(|k| poly.points[(from + k) % n]).collect()
    } else {
        (0..=bwd_len).map(|k| poly.points[(from + n - k) % n]).collect()
    }
}

fn leg_points(anchor: Vec3, heading: f64, length: f64, outward: bool) -> Vec<Vec3> {
    let n = (length / LEG_SPACING_M).floor().max(1.0) as usize;
    let dir = if outward { forward(heading) } else { forward(heading).scale(-1.0) };
    (1..=n)
        .map(|i| {
            let p = anchor.xy().add(&dir.scale(i as f64 * LEG_SPACING_M));
            Vec3::new(p.easting, p.northing, heading)
        })
        .collect()
}

fn densify(path: &[Vec3]) -> Vec<Vec3> {
    if path.is_empty() {
        return Vec::new();
    }
    let mut out = vec![path[0]];
    for w in path.windows(2) {
        let (a, b) = (w[0], w[1]);
        let dist = a.xy().dist(&b.xy());
        if dist > DENSIFY_SPACING_M {
            let n = (dist / DENSIFY_SPACING_M).ceil() as usize;
            for k in 1..n {
                let t = k as f64 / n as f64;
                let p = Vec2::new(
                    a.easting + (b.easting - a.easting) * t,
                    a.northing + (b.northing - a.northing) * t,
                );
                out.push(Vec3::new(p.easting, p.northing, a.heading));
            }
        }
        out.push(b);
    }
    out
}

fn recompute_headings(path: &mut [Vec3]) {
    let n = path.len();
    if n < 5 {
        return;
    }
    for i in 2..n - 2 {
        let d = path[i + 1].xy().sub(&path[i - 1].xy());
        path[i].heading = d.easting.atan2(d.northing);
    }
}

#[derive(Debug, Clone)]
pub struct TurnPlan {
    pub path: Vec<Vec3>,
}

/// Synthesises a complete U-turn path. `turn_area` is the outer boundary
/// the turn must stay within; `holes` are carve-outs inside it (obstacles,
/// gates) with a parallel `drive_thru` flag per hole — a drive-through
/// hole is passable, any other hole blocks the shifted arc just like the
/// outer fence does; `headland_width_m` is the width of the headland
/// annulus, used for the default leg length.
#[allow(clippy::too_many_arguments)]
pub fn plan(
    track: &Track,
    pivot: Vec2,
    heading_same_way: bool,
    turn_left: bool,
    is_out_same_curve: bool,
    turn_area: &Polygon,
    holes: &[Polygon],
    drive_thru: &[bool],
    cfg: &UTurnConfig,
    tool_width_minus_overlap: f64,
    tool_offset: f64,
    headland_width_m: f64,
) -> Result<TurnPlan, TurnPlanError> {
    if turn_area.is_empty() {
        return Err(TurnPlanError::NoTurnArea);
    }

    let entry = find_entry(track, pivot, heading_same_way, turn_area).ok_or(TurnPlanError::NoEntryFound)?;
    let t = effective_turn_offset(tool_width_minus_overlap, cfg.skip_width_rows, tool_offset, turn_left);
    let lateral_sign = if turn_left { -1.0 } else { 1.0 };
    let exit_heading = if is_out_same_curve { entry.pose.heading } else { wrap_pi(entry.pose.heading + PI) };
    let exit_xy = entry.pose.xy().add(&Vec2::right_of_heading(entry.pose.heading).scale(lateral_sign * t));
    let exit_pose = Vec3::new(exit_xy.easting, exit_xy.northing, exit_heading);

    let mut arc = match cfg.style {
        UTurnStyle::Omega | UTurnStyle::Wide => geometry::generate_dubins(entry.pose, exit_pose, cfg.turn_radius_m),
        UTurnStyle::KStyle => synth_k_style(entry.pose, exit_pose, cfg.turn_radius_m, turn_left),
    };

    let _semi_circle_index = shift_inward(&mut arc, turn_area, holes, drive_thru, entry.pose.heading, pivot)?;

    let entry_vertex = nearest_vertex(turn_area, entry.pose.xy());
    let exit_vertex = nearest_vertex(turn_area, exit_pose.xy());
    let stitched = boundary_arc(turn_area, entry_vertex, exit_vertex);

    let mut full = Vec::new();
    full.push(entry.pose);
    full.extend(stitched.iter().copied());
    full.extend(arc.iter().copied());
    full.push(exit_pose);

    let leg_length = if cfg.extension_length_m > 0.0 {
        cfg.extension_length_m
    } else {
        headland_width_m * cfg.headland_width_multiplier
    }
    .max(2.0 * cfg.turn_radius_m);

    let mut entry_leg = leg_points(entry.pose, entry.pose.heading, leg_length, false);
    entry_leg.reverse();
    let exit_leg = leg_points(exit_pose, exit_heading, leg_length, true);

    let mut path = Vec::new();
    path.extend(entry_leg);
    path.extend(full);
    path.extend(exit_leg);

    let mut path = densify(&path);
    recompute_headings(&mut path);

    let min_dist = min_pivot_distance(&path, pivot);
    if min_dist < MIN_PIVOT_CLEARANCE_M {
        return Err(TurnPlanError::TooCloseToPivot { dist: min_dist });
    }

    Ok(TurnPlan { path })
}

// ── Follower ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct FollowOutput {
    pub steer_angle_rad: f64,
    pub complete: bool,
}

fn dot(a: Vec2, b: Vec2) -> f64 {
    a.easting * b.easting + a.northing * b.northing
}

fn nearest_segment(path: &[Vec3], p: Vec2) -> (usize, usize, f64) {
    let mut best = (0usize, 1usize.min(path.len().saturating_sub(1)), f64::INFINITY);
    for i in 0..path.len().saturating_sub(1) {
        let a = path[i].xy();
        let b = path[i + 1].xy();
        let d = b.sub(&a);
        let len_sq = dot(d, d).max(1e-9);
        let t = (dot(p.sub(&a), d) / len_sq).clamp(0.0, 1.0);
        let proj = a.add(&d.scale(t));
        let dist = p.dist(&proj);
        if dist < best.2 {
            best = (i, i + 1, dist);
        }
    }
    best
}

/// Steers along `path` with the configured guidance law. K-style turns are
/// considered complete on the first call (the reverse leg is handled
/// outside guidance, by a direct drive command).
pub fn follow(
    path: &[Vec3],
    style: UTurnStyle,
    algorithm: GuidanceAlgorithm,
    pivot: Vec2,
    heading_rad: f64,
    speed: f64,
    vcfg: &VehicleConfig,
    min_look_ahead_m: f64,
) -> FollowOutput {
    if matches!(style, UTurnStyle::KStyle) {
        return FollowOutput { steer_angle_rad: 0.0, complete: true };
    }
    if path.len() < 2 {
        return FollowOutput { steer_angle_rad: 0.0, complete: true };
    }

    let (a_idx, b_idx, dist) = nearest_segment(path, pivot);
    let n = path.len();
    let a = path[a_idx].xy();
    let b = path[b_idx].xy();
    let seg_heading = b.sub(&a).easting.atan2(b.sub(&a).northing);
    let right = Vec2::right_of_heading(seg_heading);
    let xte = dot(pivot.sub(&a), right);

    match algorithm {
        GuidanceAlgorithm::Stanley => {
            let abandon = dist > 4.0;
            let complete = abandon || b_idx >= n - 1;
            let heading_err = wrap_pi(seg_heading - heading_rad);
            let heading_term = (vcfg.stanley_heading_gain * heading_err).clamp(-0.74, 0.74);
            let xte_term = (vcfg.stanley_xte_gain * xte / (speed * 0.27778 + 1.0)).atan().clamp(-0.74, 0.74);
            let steer = -(heading_term + xte_term);
            FollowOutput {
                steer_angle_rad: steer.clamp(-vcfg.max_steer_angle_rad, vcfg.max_steer_angle_rad),
                complete,
            }
        }
        GuidanceAlgorithm::PurePursuit => {
            let l_d = min_look_ahead_m.max(0.1);
            let mut remaining = 0.0;
            for w in path[b_idx..].windows(2) {
                remaining += w[0].xy().dist(&w[1].xy());
            }
            let goal = {
                let mut acc = 0.0;
                let mut g = path[n - 1].xy();
                for w in path[b_idx..].windows(2) {
                    let seg_len = w[0].xy().dist(&w[1].xy());
                    if acc + seg_len >= l_d {
                        let t = (l_d - acc) / seg_len.max(1e-9);
                        g = Vec2::new(
                            w[0].easting + (w[1].easting - w[0].easting) * t,
                            w[0].northing + (w[1].northing - w[0].northing) * t,
                        );
                        break;
                    }
                    acc += seg_len;
                }
                g
            };
            let dx = goal.easting - pivot.easting;
            let dy = goal.northing - pivot.northing;
            let dist_sq = (dx * dx + dy * dy).max(1e-9);
            let steer =
                (2.0 * (dx * heading_rad.cos() + dy * heading_rad.sin()) * vcfg.wheelbase_m / dist_sq).atan();
            let complete = (a_idx > 0 && dist > 2.0)
                || (b_idx >= n - 1 && a_idx > n / 2)
                || l_d > remaining;
            FollowOutput {
                steer_angle_rad: steer.clamp(-vcfg.max_steer_angle_rad, vcfg.max_steer_angle_rad)
                    * vcfg.u_turn_compensation,
                complete,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(side: f64) -> Polygon {
        Polygon::new(vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(side, 0.0, 0.0),
            Vec3::new(side, side, 0.0),
            Vec3::new(0.0, side, 0.0),
        ])
    }

    #[test]
    fn omega_turn_on_straight_line_stays_inside_and_clear_of_pivot() {
        // Matches the worked example: outer 100x100 square, AB north, R=8,
        // tool width 6, T=6 < 2R=16 ⇒ Omega.
        let track = Track::ab("ab", Vec2::new(50.0, 0.0), Vec2::new(50.0, 100.0));
        let outer = square(100.0);
        let cfg = UTurnConfig { turn_radius_m: 8.0, ..UTurnConfig::default() };
        let result = plan(
            &track,
            Vec2::new(50.0, 95.0),
            true,
            true,
            false,
            &outer,
            &[],
            &[],
            &cfg,
            6.0,
            0.0,
            10.0,
        );
        let plan = result.expect("omega turn should synthesise");
        assert!(plan.path.len() > 4);
        for p in &plan.path {
            assert!(p.xy().dist(&Vec2::new(50.0, 95.0)) >= MIN_PIVOT_CLEARANCE_M - 1e-6);
        }
    }

    #[test]
    fn no_turn_area_is_an_error() {
        let track = Track::ab("ab", Vec2::new(0.0, 0.0), Vec2::new(0.0, 100.0));
        let empty = Polygon::default();
        let cfg = UTurnConfig::default();
        let result = plan(&track, Vec2::new(0.0, 50.0), true, true, false, &empty, &[], &[], &cfg, 6.0, 0.0, 10.0);
        assert!(matches!(result, Err(TurnPlanError::NoTurnArea)));
    }

    #[test]
    fn drive_thru_hole_does_not_block_the_shifted_arc() {
        let track = Track::ab("ab", Vec2::new(50.0, 0.0), Vec2::new(50.0, 100.0));
        let outer = square(100.0);
        let gate = {
            let mut p = square(20.0);
            for v in &mut p.points {
                v.easting += 40.0;
                v.northing += 75.0;
            }
            p.recompute_bounds();
            p
        };
        let cfg = UTurnConfig { turn_radius_m: 8.0, ..UTurnConfig::default() };
        let result = plan(
            &track,
            Vec2::new(50.0, 95.0),
            true,
            true,
            false,
            &outer,
            std::slice::from_ref(&gate),
            &[true],
            &cfg,
            6.0,
            0.0,
            10.0,
        );
        assert!(result.is_ok(), "drive-through hole should not prevent synthesis: {result:?}");
    }

    #[test]
    fn non_drive_thru_hole_keeps_the_shifted_arc_out() {
        let path = [Vec3::new(50.0, 90.0, 0.0), Vec3::new(45.0, 85.0, 0.0)];
        let outer = square(100.0);
        let hole = {
            let mut p = square(20.0);
            for v in &mut p.points {
                v.easting += 40.0;
                v.northing += 75.0;
            }
            p.recompute_bounds();
            p
        };
        assert!(all_inside(&path, &outer, &[], &[]));
        assert!(!all_inside(&path, &outer, std::slice::from_ref(&hole), &[false]));
        assert!(all_inside(&path, &outer, std::slice::from_ref(&hole), &[true]));
    }

    #[test]
    fn effective_turn_offset_scales_with_row_skip() {
        let t0 = effective_turn_offset(6.0, 0, 0.0, true);
        let t1 = effective_turn_offset(6.0, 1, 0.0, true);
        assert!((t1 - 2.0 * t0).abs() < 1e-9);
    }

    #[test]
    fn kstyle_follow_completes_immediately() {
        let path = vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.0)];
        let vcfg = VehicleConfig::default();
        let out = follow(
            &path,
            UTurnStyle::KStyle,
            GuidanceAlgorithm::Stanley,
            Vec2::ZERO,
            0.0,
            1.0,
            &vcfg,
            3.0,
        );
        assert!(out.complete);
    }

    #[test]
    fn stanley_follower_abandons_when_far_from_path() {
        let path = vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 20.0, 0.0)];
        let vcfg = VehicleConfig::default();
        let out = follow(
            &path,
            UTurnStyle::Omega,
            GuidanceAlgorithm::Stanley,
            Vec2::new(10.0, 10.0),
            0.0,
            1.0,
            &vcfg,
            3.0,
        );
        assert!(out.complete);
    }
}

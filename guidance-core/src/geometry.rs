//! Geometry primitives (spec §4.1, component C1).
//!
//! All angles are radians internally; headings crossing a module boundary
//! to external callers are reported in degrees via `wrap_deg_360`. All
//! coordinates are `f64`.

use guidance_types::{wrap_pi, Boundary, Polygon, Vec2, Vec3};
use std::f64::consts::{PI, TAU};

// ── Point-in-polygon / containment ───────────────────────────────────────────

/// Even-odd rule, ray cast due east from `p`.
pub fn point_in_polygon(poly: &Polygon, p: Vec2) -> bool {
    if poly.points.len() < 3 {
        return false;
    }
    if !poly.in_bounds(&p) {
        return false;
    }
    let n = poly.points.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let pi = poly.points[i];
        let pj = poly.points[j];
        let (yi, yj) = (pi.northing, pj.northing);
        let (xi, xj) = (pi.easting, pj.easting);
        if (yi > p.northing) != (yj > p.northing) {
            let x_cross = xi + (p.northing - yi) / (yj - yi) * (xj - xi);
            if p.easting < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Inside the outer polygon and outside every hole.
pub fn point_in_boundary(boundary: &Boundary, p: Vec2) -> bool {
    if !point_in_polygon(&boundary.outer, p) {
        return false;
    }
    !boundary.holes.iter().any(|h| point_in_polygon(h, p))
}

/// Fraction of the perpendicular segment `[centre - half_width*r, centre +
/// half_width*r]` (r = right of `heading`) that lies inside the outer
/// polygon minus all holes. Sampled at interior test points (spec leaves
/// the exact sampling to the implementation; C8's `segment_coverage`
/// specifies "≥8 interior test points" for the analogous query, so the
/// same density is used here).
pub fn segment_inside_fraction(
    boundary: &Boundary,
    centre: Vec2,
    heading: f64,
    half_width: f64,
) -> f64 {
    if half_width <= 0.0 {
        return if point_in_boundary(boundary, centre) { 1.0 } else { 0.0 };
    }
    let r = Vec2::right_of_heading(heading);
    const SAMPLES: usize = 17;
    let mut inside = 0usize;
    for i in 0..SAMPLES {
        let t = -1.0 + 2.0 * (i as f64) / (SAMPLES as f64 - 1.0);
        let p = centre.add(&r.scale(t * half_width));
        if point_in_boundary(boundary, p) {
            inside += 1;
        }
    }
    inside as f64 / SAMPLES as f64
}

// ── Area ──────────────────────────────────────────────────────────────────────

/// Signed shoelace area. Positive for a counter-clockwise ring.
pub fn polygon_area(poly: &Polygon) -> f64 {
    let n = poly.points.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let a = poly.points[i];
        let b = poly.points[(i + 1) % n];
        sum += a.easting * b.northing - b.easting * a.northing;
    }
    sum / 2.0
}

// ── Offset ────────────────────────────────────────────────────────────────────

/// Perpendicular displacement at each vertex by distance `d` (positive =
/// outward from the polygon's winding, i.e. to the right of each edge's
/// direction). Rejects self-intersection candidates: a displaced point
/// within `sqrt(d*d*0.999)` of ANY original vertex is discarded, and
/// consecutive surviving points must be `>= sqrt(2)` apart.
pub fn polygon_offset(poly: &Polygon, d: f64) -> Polygon {
    let n = poly.points.len();
    if n < 3 {
        return poly.clone();
    }
    let reject_dist = (d * d * 0.999).max(0.0).sqrt();
    let mut candidates = Vec::with_capacity(n);
    for i in 0..n {
        let prev = poly.points[(i + n - 1) % n];
        let cur = poly.points[i];
        let next = poly.points[(i + 1) % n];

        let e1 = cur.xy().sub(&prev.xy());
        let e2 = next.xy().sub(&cur.xy());
        let h1 = e1.northing.atan2(e1.easting);
        let h2 = e2.northing.atan2(e2.easting);
        let n1 = Vec2::new(h1.sin(), -h1.cos());
        let n2 = Vec2::new(h2.sin(), -h2.cos());
        let mut normal = n1.add(&n2);
        let len = (normal.easting.powi(2) + normal.northing.powi(2)).sqrt();
        if len > 1e-9 {
            normal = normal.scale(1.0 / len);
        } else {
            normal = n1;
        }
        let moved = cur.xy().add(&normal.scale(d));
        candidates.push(Vec3::new(moved.easting, moved.northing, cur.heading));
    }

    let mut out: Vec<Vec3> = Vec::with_capacity(n);
    for cand in candidates {
        let too_close_to_fence = poly
            .points
            .iter()
            .any(|fence| cand.xy().dist(&fence.xy()) < reject_dist);
        if too_close_to_fence {
            continue;
        }
        if let Some(last) = out.last() {
            if cand.xy().dist(&last.xy()) < std::f64::consts::SQRT_2 {
                continue;
            }
        }
        out.push(cand);
    }
    Polygon::new(out)
}

// ── Line intersection ─────────────────────────────────────────────────────────

/// Intersection of two directed segments `(a0,a1)` and `(b0,b1)`, if the
/// crossing falls within both segments.
pub fn line_intersection(a0: Vec2, a1: Vec2, b0: Vec2, b1: Vec2) -> Option<Vec2> {
    let r = a1.sub(&a0);
    let s = b1.sub(&b0);
    let denom = r.easting * s.northing - r.northing * s.easting;
    if denom.abs() < 1e-12 {
        return None;
    }
    let diff = b0.sub(&a0);
    let t = (diff.easting * s.northing - diff.northing * s.easting) / denom;
    let u = (diff.easting * r.northing - diff.northing * r.easting) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(a0.add(&r.scale(t)))
    } else {
        None
    }
}

/// True if `p` lies within the drivable turn area: inside `outer` and not
/// inside any of `holes`, except a hole whose matching `drive_thru` entry
/// is `true` — a drive-through turn-area carve-out is passable, so a point
/// inside it still counts as inside the turn area.
pub fn is_point_in_turn_area(outer: &Polygon, holes: &[Polygon], drive_thru: &[bool], p: Vec2) -> bool {
    if !point_in_polygon(outer, p) {
        return false;
    }
    for (i, hole) in holes.iter().enumerate() {
        if point_in_polygon(hole, p) {
            return drive_thru.get(i).copied().unwrap_or(false);
        }
    }
    true
}

// ── Dubins path ───────────────────────────────────────────────────────────────

/// A dense polyline (easting, northing, heading) from `start` to `goal`,
/// composed of arcs of radius `radius` and straight segments, sampled at
/// `0.1 * radius` step along the path.
pub fn generate_dubins(start: Vec3, goal: Vec3, radius: f64) -> Vec<Vec3> {
    let step = 0.1 * radius;
    let (sx, sy, sphi) = to_math_frame(start);
    let (gx, gy, gphi) = to_math_frame(goal);

    let dx = gx - sx;
    let dy = gy - sy;
    let d = (dx * dx + dy * dy).sqrt() / radius;
    let theta = mod2pi(dy.atan2(dx));
    let alpha = mod2pi(sphi - theta);
    let beta = mod2pi(gphi - theta);

    let candidates: [(Option<(f64, f64, f64)>, &str); 6] = [
        (lsl(alpha, beta, d), "LSL"),
        (rsr(alpha, beta, d), "RSR"),
        (lsr(alpha, beta, d), "LSR"),
        (rsl(alpha, beta, d), "RSL"),
        (rlr(alpha, beta, d), "RLR"),
        (lrl(alpha, beta, d), "LRL"),
    ];

    let mut best: Option<(f64, (f64, f64, f64), &str)> = None;
    for (res, mode) in candidates {
        if let Some((t, p, q)) = res {
            let len = t + p + q;
            if len.is_finite() && best.map(|(bl, ..)| len < bl).unwrap_or(true) {
                best = Some((len, (t, p, q), mode));
            }
        }
    }

    let Some((_, (t, p, q), mode)) = best else {
        // Degenerate (coincident poses): return the two endpoints.
        return vec![start, goal];
    };

    let mut samples = vec![(sx, sy, sphi)];
    let segs = mode.chars().zip([t, p, q]);
    let mut pose = (sx, sy, sphi);
    for (kind, param) in segs {
        pose = walk_segment(pose, kind, param, radius, step, &mut samples);
    }
    let _ = pose;

    samples
        .into_iter()
        .map(|(x, y, phi)| from_math_frame(x, y, phi))
        .collect()
}

fn to_math_frame(v: Vec3) -> (f64, f64, f64) {
    (v.easting, v.northing, PI / 2.0 - v.heading)
}

fn from_math_frame(x: f64, y: f64, phi: f64) -> Vec3 {
    Vec3::new(x, y, wrap_pi(PI / 2.0 - phi))
}

fn mod2pi(theta: f64) -> f64 {
    let mut t = theta % TAU;
    if t < 0.0 {
        t += TAU;
    }
    t
}

fn walk_segment(
    start: (f64, f64, f64),
    kind: char,
    param: f64,
    radius: f64,
    step: f64,
    out: &mut Vec<(f64, f64, f64)>,
) -> (f64, f64, f64) {
    let (x0, y0, phi0) = start;
    let length = match kind {
        'S' => param * radius,
        _ => param * radius, // arc length = angle(rad) * radius
    };
    if length <= 0.0 {
        return start;
    }
    let n_steps = (length / step).ceil().max(1.0) as usize;
    let d_len = length / n_steps as f64;

    let mut pose = (x0, y0, phi0);
    for _ in 0..n_steps {
        pose = advance(pose, kind, d_len, radius);
        out.push(pose);
    }
    pose
}

fn advance(pose: (f64, f64, f64), kind: char, d_len: f64, radius: f64) -> (f64, f64, f64) {
    let (x, y, phi) = pose;
    match kind {
        'S' => (x + d_len * phi.cos(), y + d_len * phi.sin(), phi),
        'L' => {
            let dphi = d_len / radius;
            let new_phi = phi + dphi;
            // centre is radius to the left of heading
            let cx = x - radius * phi.sin();
            let cy = y + radius * phi.cos();
            (cx + radius * new_phi.sin(), cy - radius * new_phi.cos(), mod2pi(new_phi))
        }
        'R' => {
            let dphi = d_len / radius;
            let new_phi = phi - dphi;
            let cx = x + radius * phi.sin();
            let cy = y - radius * phi.cos();
            (cx - radius * new_phi.sin(), cy + radius * new_phi.cos(), mod2pi(new_phi))
        }
        _ => pose,
    }
}

fn lsl(alpha: f64, beta: f64, d: f64) -> Option<(f64, f64, f64)> {
    let (sa, sb, ca, cb) = (alpha.sin(), beta.sin(), alpha.cos(), beta.cos());
    let c_ab = (alpha - beta).cos();
    let p_sq = 2.0 + d * d - 2.0 * c_ab + 2.0 * d * (sa - sb);
    if p_sq < 0.0 {
        return None;
    }
    let tmp = (cb - ca).atan2(d + sa - sb);
    let t = mod2pi(-alpha + tmp);
    let p = p_sq.sqrt();
    let q = mod2pi(beta - tmp);
    Some((t, p, q))
}

fn rsr(alpha: f64, beta: f64, d: f64) -> Option<(f64, f64, f64)> {
    let (sa, sb, ca, cb) = (alpha.sin(), beta.sin(), alpha.cos(), beta.cos());
    let c_ab = (alpha - beta).cos();
    let p_sq = 2.0 + d * d - 2.0 * c_ab + 2.0 * d * (sb - sa);
    if p_sq < 0.0 {
        return None;
    }
    let tmp = (ca - cb).atan2(d - sa + sb);
    let t = mod2pi(alpha - tmp);
    let p = p_sq.sqrt();
    let q = mod2pi(-beta + tmp);
    Some((t, p, q))
}

fn lsr(alpha: f64, beta: f64, d: f64) -> Option<(f64, f64, f64)> {
    let (sa, sb, ca, cb) = (alpha.sin(), beta.sin(), alpha.cos(), beta.cos());
    let c_ab = (alpha - beta).cos();
    let p_sq = -2.0 + d * d + 2.0 * c_ab + 2.0 * d * (sa + sb);
    if p_sq < 0.0 {
        return None;
    }
    let p = p_sq.sqrt();
    let tmp = (-ca - cb).atan2(d + sa + sb) - (-2.0_f64).atan2(p);
    let t = mod2pi(-alpha + tmp);
    let q = mod2pi(-mod2pi(beta) + tmp);
    Some((t, p, q))
}

fn rsl(alpha: f64, beta: f64, d: f64) -> Option<(f64, f64, f64)> {
    let (sa, sb, ca, cb) = (alpha.sin(), beta.sin(), alpha.cos(), beta.cos());
    let c_ab = (alpha - beta).cos();
    let p_sq = d * d - 2.0 + 2.0 * c_ab - 2.0 * d * (sa + sb);
    if p_sq < 0.0 {
        return None;
    }
    let p = p_sq.sqrt();
    let tmp = (ca + cb).atan2(d - sa - sb) - 2.0_f64.atan2(p);
    let t = mod2pi(alpha - tmp);
    let q = mod2pi(beta - tmp);
    Some((t, p, q))
}

fn rlr(alpha: f64, beta: f64, d: f64) -> Option<(f64, f64, f64)> {
    let (sa, sb, ca, cb) = (alpha.sin(), beta.sin(), alpha.cos(), beta.cos());
    let c_ab = (alpha - beta).cos();
    let tmp = (6.0 - d * d + 2.0 * c_ab + 2.0 * d * (sa - sb)) / 8.0;
    if tmp.abs() > 1.0 {
        return None;
    }
    let p = mod2pi(TAU - tmp.acos());
    let t = mod2pi(alpha - (ca - cb).atan2(d - sa + sb) + p / 2.0);
    let q = mod2pi(alpha - beta - t + p);
    Some((t, p, q))
}

fn lrl(alpha: f64, beta: f64, d: f64) -> Option<(f64, f64, f64)> {
    let (sa, sb, ca, cb) = (alpha.sin(), beta.sin(), alpha.cos(), beta.cos());
    let c_ab = (alpha - beta).cos();
    let tmp = (6.0 - d * d + 2.0 * c_ab + 2.0 * d * (-sa + sb)) / 8.0;
    if tmp.abs() > 1.0 {
        return None;
    }
    let p = mod2pi(TAU - tmp.acos());
    let t = mod2pi(-alpha - (ca - cb).atan2(d + sa - sb) + p / 2.0);
    let q = mod2pi(mod2pi(beta) - alpha - t + mod2pi(p));
    Some((t, p, q))
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidance_types::Vec3;
    use proptest::prelude::*;

    fn square(side: f64) -> Polygon {
        Polygon::new(vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(side, 0.0, 0.0),
            Vec3::new(side, side, 0.0),
            Vec3::new(0.0, side, 0.0),
        ])
    }

    #[test]
    fn point_in_polygon_basic_square() {
        let sq = square(100.0);
        assert!(point_in_polygon(&sq, Vec2::new(50.0, 50.0)));
        assert!(!point_in_polygon(&sq, Vec2::new(150.0, 50.0)));
        assert!(!point_in_polygon(&sq, Vec2::new(-1.0, 50.0)));
    }

    #[test]
    fn segment_inside_fraction_matches_point_test_at_zero_width() {
        let b = Boundary::new(square(100.0));
        let inside = segment_inside_fraction(&b, Vec2::new(50.0, 50.0), 0.0, 0.0);
        let outside = segment_inside_fraction(&b, Vec2::new(500.0, 50.0), 0.0, 0.0);
        assert_eq!(inside, 1.0);
        assert_eq!(outside, 0.0);
    }

    #[test]
    fn segment_inside_fraction_partial_straddles_boundary() {
        let b = Boundary::new(square(100.0));
        // Centre on the east edge, heading 0 (north) so the perpendicular
        // segment runs east-west, half inside half outside.
        let frac = segment_inside_fraction(&b, Vec2::new(100.0, 50.0), 0.0, 10.0);
        assert!(frac > 0.3 && frac < 0.7, "fraction = {frac}");
    }

    #[test]
    fn polygon_area_of_ccw_square_is_positive() {
        let sq = square(10.0);
        assert!((polygon_area(&sq) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn polygon_offset_shrinks_square_inward() {
        let sq = square(100.0);
        let offset = polygon_offset(&sq, -5.0);
        assert!(offset.len() <= sq.len());
        for p in &offset.points {
            assert!(point_in_polygon(&sq, p.xy()));
        }
    }

    #[test]
    fn line_intersection_crossing_segments() {
        let p = line_intersection(
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
            Vec2::new(10.0, 0.0),
        );
        let p = p.expect("segments cross");
        assert!((p.easting - 5.0).abs() < 1e-9);
        assert!((p.northing - 5.0).abs() < 1e-9);
    }

    #[test]
    fn line_intersection_parallel_returns_none() {
        let p = line_intersection(
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(0.0, 5.0),
            Vec2::new(10.0, 5.0),
        );
        assert!(p.is_none());
    }

    #[test]
    fn dubins_path_reaches_goal_heading() {
        let start = Vec3::new(0.0, 0.0, 0.0);
        let goal = Vec3::new(20.0, 0.0, PI);
        let path = generate_dubins(start, goal, 8.0);
        assert!(path.len() > 2);
        let last = path.last().unwrap();
        assert!(last.xy().dist(&goal.xy()) < 1.0);
    }

    #[test]
    fn dubins_path_heading_is_continuous() {
        let start = Vec3::new(0.0, 0.0, 0.0);
        let goal = Vec3::new(15.0, 10.0, PI / 2.0);
        let path = generate_dubins(start, goal, 6.0);
        for w in path.windows(2) {
            let mut diff = (w[1].heading - w[0].heading).abs();
            if diff > PI {
                diff = TAU - diff;
            }
            assert!(diff < PI / 4.0, "heading jump {diff}");
        }
    }

    #[test]
    fn turn_area_excludes_points_outside_outer_ring() {
        let outer = square(50.0);
        assert!(!is_point_in_turn_area(&outer, &[], &[], Vec2::new(500.0, 500.0)));
    }

    #[test]
    fn turn_area_hole_blocks_unless_drive_thru() {
        let outer = square(100.0);
        let hole = {
            let mut p = square(20.0);
            for v in &mut p.points {
                v.easting += 40.0;
                v.northing += 40.0;
            }
            p.recompute_bounds();
            p
        };
        let inside_hole = Vec2::new(50.0, 50.0);
        assert!(is_point_in_turn_area(&outer, &[], &[], inside_hole));
        assert!(!is_point_in_turn_area(&outer, &[hole.clone()], &[false], inside_hole));
        assert!(is_point_in_turn_area(&outer, &[hole], &[true], inside_hole));
    }

    proptest! {
        #[test]
        fn point_in_axis_aligned_rectangle_matches_bounds_check(
            min_e in -1000.0f64..1000.0,
            width in 1.0f64..500.0,
            min_n in -1000.0f64..1000.0,
            height in 1.0f64..500.0,
            px in -1500.0f64..1500.0,
            py in -1500.0f64..1500.0,
        ) {
            let max_e = min_e + width;
            let max_n = min_n + height;
            let rect = Polygon::new(vec![
                Vec3::new(min_e, min_n, 0.0),
                Vec3::new(max_e, min_n, 0.0),
                Vec3::new(max_e, max_n, 0.0),
                Vec3::new(min_e, max_n, 0.0),
            ]);
            let p = Vec2::new(px, py);
            let expected = px > min_e && px < max_e && py > min_n && py < max_n;
            prop_assert_eq!(point_in_polygon(&rect, p), expected);
        }

        #[test]
        fn outward_offset_of_a_square_strictly_grows_area(half in 5.0f64..200.0, d in 0.1f64..20.0) {
            let sq = square(half);
            let offset = polygon_offset(&sq, d);
            prop_assert!(polygon_area(&offset).abs() > polygon_area(&sq).abs());
        }

        #[test]
        fn inward_offset_of_a_square_keeps_points_inside_original(half in 20.0f64..200.0, d in 0.1f64..10.0) {
            let sq = square(half);
            let offset = polygon_offset(&sq, -d);
            for v in &offset.points {
                prop_assert!(point_in_polygon(&sq, v.xy()));
            }
        }
    }
}

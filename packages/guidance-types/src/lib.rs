//! # guidance-types
//!
//! Shared geometry and course types for the guidance platform.
//!
//! These types are used by:
//! - `guidance-core`: the real-time ground loop (ingest, fusion, guidance,
//!   u-turn planning, coverage, section control)
//! - `field-sim`: a standalone vehicle/field simulator that drives a
//!   virtual tractor along a `Track` and emits `$PANDA` sentences over UDP
//!
//! ## Coordinate conventions
//!
//! - **Geographic**: WGS-84 latitude/longitude, degrees.
//! - **Local plane**: easting/northing in meters about a field origin
//!   (see `guidance-core::projection`), X = east, Y = north.
//! - **Heading**: degrees, 0..360 clockwise from north, unless noted as
//!   radians (internal geometry always uses radians).

use serde::{Deserialize, Serialize};

// ── 2D / 3D value types ───────────────────────────────────────────────────────

/// A point in the local tangent plane (meters). No identity, pure value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub easting: f64,
    pub northing: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { easting: 0.0, northing: 0.0 };

    pub fn new(easting: f64, northing: f64) -> Self {
        Self { easting, northing }
    }

    pub fn dist(&self, other: &Vec2) -> f64 {
        let dx = self.easting - other.easting;
        let dy = self.northing - other.northing;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn dist_sq(&self, other: &Vec2) -> f64 {
        let dx = self.easting - other.easting;
        let dy = self.northing - other.northing;
        dx * dx + dy * dy
    }

    pub fn add(&self, other: &Vec2) -> Vec2 {
        Vec2::new(self.easting + other.easting, self.northing + other.northing)
    }

    pub fn sub(&self, other: &Vec2) -> Vec2 {
        Vec2::new(self.easting - other.easting, self.northing - other.northing)
    }

    pub fn scale(&self, s: f64) -> Vec2 {
        Vec2::new(self.easting * s, self.northing * s)
    }

    /// Rotate 90° clockwise (used to get "right of heading" perpendiculars
    /// from a unit heading vector).
    pub fn rot90_cw(&self) -> Vec2 {
        Vec2::new(self.northing, -self.easting)
    }

    /// Unit vector pointing right of travel for a heading in radians
    /// (0 = north, increasing clockwise).
    pub fn right_of_heading(heading_rad: f64) -> Vec2 {
        Vec2::new(heading_rad.sin(), heading_rad.cos()).rot90_cw()
    }
}

/// Easting/northing plus a heading (radians). Used for heading-tagged
/// polyline samples (curves, u-turn paths, Dubins output, polygon vertices).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub easting: f64,
    pub northing: f64,
    pub heading: f64,
}

impl Vec3 {
    pub fn new(easting: f64, northing: f64, heading: f64) -> Self {
        Self { easting, northing, heading }
    }

    pub fn xy(&self) -> Vec2 {
        Vec2::new(self.easting, self.northing)
    }
}

/// Wraps a radian angle into `(-pi, pi]`.
pub fn wrap_pi(angle: f64) -> f64 {
    let mut a = angle % std::f64::consts::TAU;
    if a <= -std::f64::consts::PI {
        a += std::f64::consts::TAU;
    } else if a > std::f64::consts::PI {
        a -= std::f64::consts::TAU;
    }
    a
}

/// Wraps a degree heading into `[0, 360)`.
pub fn wrap_deg_360(deg: f64) -> f64 {
    let mut d = deg % 360.0;
    if d < 0.0 {
        d += 360.0;
    }
    d
}

// ── Position ──────────────────────────────────────────────────────────────────

/// A single GPS fix, immutable for the cycle that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub easting: f64,
    pub northing: f64,
    /// m/s
    pub speed: f64,
    /// degrees, 0..360 clockwise from north
    pub heading: f64,
}

impl Position {
    pub fn local(&self) -> Vec2 {
        Vec2::new(self.easting, self.northing)
    }
}

// ── Polygon / Boundary ────────────────────────────────────────────────────────

/// One closed ring: an ordered sequence of vertices with a per-vertex
/// heading and a cached bounding box. At least 3 points.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Polygon {
    /// (easting, northing, heading) per vertex.
    pub points: Vec<Vec3>,
    pub min_e: f64,
    pub max_e: f64,
    pub min_n: f64,
    pub max_n: f64,
}

impl Polygon {
    pub fn new(points: Vec<Vec3>) -> Self {
        let mut poly = Self { points, ..Default::default() };
        poly.recompute_bounds();
        poly
    }

    pub fn recompute_bounds(&mut self) {
        let (mut min_e, mut max_e) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_n, mut max_n) = (f64::INFINITY, f64::NEG_INFINITY);
        for p in &self.points {
            min_e = min_e.min(p.easting);
            max_e = max_e.max(p.easting);
            min_n = min_n.min(p.northing);
            max_n = max_n.max(p.northing);
        }
        self.min_e = min_e;
        self.max_e = max_e;
        self.min_n = min_n;
        self.max_n = max_n;
    }

    pub fn in_bounds(&self, p: &Vec2) -> bool {
        p.easting >= self.min_e
            && p.easting <= self.max_e
            && p.northing >= self.min_n
            && p.northing <= self.max_n
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// One outer polygon plus an ordered list of inner hole polygons, and an
/// optional inner headland polygon. Outer is simple and CCW; each hole is
/// simple and CW; holes lie strictly inside outer; no two polygons
/// intersect (enforced by the authoring tool upstream, not re-checked here).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Boundary {
    pub outer: Polygon,
    pub holes: Vec<Polygon>,
    /// Per-hole drive-through flag, same length and order as `holes`: a
    /// `true` entry means that carve-out is passable (e.g. a gate or
    /// mapped-through obstacle) rather than a hard no-go area.
    #[serde(default)]
    pub hole_drive_thru: Vec<bool>,
    pub headland: Option<Polygon>,
}

impl Boundary {
    pub fn new(outer: Polygon) -> Self {
        Self { outer, holes: Vec::new(), hole_drive_thru: Vec::new(), headland: None }
    }

    pub fn inner_polygons(&self) -> &[Polygon] {
        &self.holes
    }
}

// ── Track ──────────────────────────────────────────────────────────────────

/// A named guidance line. Read-only during a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub kind: TrackKind,
    /// Perpendicular nudge offset, meters (positive = right of travel).
    pub nudge: f64,
    pub visible: bool,
    pub mode: TrackMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrackKind {
    AbLine {
        a: Vec2,
        b: Vec2,
        /// degrees, 0..360
        heading: f64,
    },
    Curve {
        /// ordered waypoints, each with a heading (radians)
        points: Vec<Vec3>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TrackMode {
    Normal,
    UTurnOnly,
}

impl Track {
    pub fn ab(name: impl Into<String>, a: Vec2, b: Vec2) -> Self {
        let heading = wrap_deg_360(
            (b.easting - a.easting).atan2(b.northing - a.northing).to_degrees(),
        );
        Self {
            name: name.into(),
            kind: TrackKind::AbLine { a, b, heading },
            nudge: 0.0,
            visible: true,
            mode: TrackMode::Normal,
        }
    }

    pub fn curve(name: impl Into<String>, points: Vec<Vec3>) -> Self {
        Self {
            name: name.into(),
            kind: TrackKind::Curve { points },
            nudge: 0.0,
            visible: true,
            mode: TrackMode::Normal,
        }
    }

    pub fn is_valid(&self) -> bool {
        match &self.kind {
            TrackKind::AbLine { .. } => true,
            TrackKind::Curve { points } => points.len() >= 2,
        }
    }

    /// Apply the perpendicular nudge to an A→B line. Curve nudging and
    /// A→B nudging share the same perpendicular-offset operation; only the
    /// source geometry differs.
    pub fn nudged_ab(&self) -> Option<(Vec2, Vec2)> {
        match &self.kind {
            TrackKind::AbLine { a, b, heading } => {
                let h = heading.to_radians();
                let off = Vec2::right_of_heading(h).scale(self.nudge);
                Some((a.add(&off), b.add(&off)))
            }
            TrackKind::Curve { .. } => None,
        }
    }

    pub fn nudged_curve(&self) -> Option<Vec<Vec3>> {
        match &self.kind {
            TrackKind::Curve { points } => Some(
                points
                    .iter()
                    .map(|p| {
                        let off = Vec2::right_of_heading(p.heading).scale(self.nudge);
                        Vec3::new(p.easting + off.easting, p.northing + off.northing, p.heading)
                    })
                    .collect(),
            ),
            TrackKind::AbLine { .. } => None,
        }
    }
}

// ── Coverage patch (shape only; ownership lives in the coverage engine) ──────

/// A zone-tagged triangle strip: alternating left/right edge vertices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoveragePatch {
    pub zone: u8,
    pub colour: u32,
    /// Parallel vectors: left/right vertex of pair `i`.
    pub lefts: Vec<Vec2>,
    pub rights: Vec<Vec2>,
}

impl CoveragePatch {
    pub fn new(zone: u8, colour: u32, left: Vec2, right: Vec2) -> Self {
        Self { zone, colour, lefts: vec![left], rights: vec![right] }
    }

    pub fn pair_count(&self) -> usize {
        self.lefts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_deg_360_normalizes() {
        assert!((wrap_deg_360(370.0) - 10.0).abs() < 1e-9);
        assert!((wrap_deg_360(-10.0) - 350.0).abs() < 1e-9);
        assert!((wrap_deg_360(0.0) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn wrap_pi_stays_in_range() {
        let w = wrap_pi(3.0 * std::f64::consts::PI);
        assert!(w > -std::f64::consts::PI && w <= std::f64::consts::PI);
    }

    #[test]
    fn ab_track_heading_matches_bearing() {
        let t = Track::ab("t", Vec2::new(0.0, 0.0), Vec2::new(0.0, 100.0));
        match t.kind {
            TrackKind::AbLine { heading, .. } => assert!((heading - 0.0).abs() < 1e-6),
            _ => panic!("expected ab line"),
        }
    }

    #[test]
    fn polygon_bounds_track_points() {
        let poly = Polygon::new(vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(10.0, 10.0, 0.0),
            Vec3::new(0.0, 10.0, 0.0),
        ]);
        assert_eq!(poly.min_e, 0.0);
        assert_eq!(poly.max_e, 10.0);
        assert!(poly.in_bounds(&Vec2::new(5.0, 5.0)));
        assert!(!poly.in_bounds(&Vec2::new(15.0, 5.0)));
    }
}

//! Coverage engine (spec §4.8, component C8).
//!
//! Two representations of the same worked area: a per-zone list of
//! triangle-strip patches (what gets rendered) and a fixed-bounds cell
//! grid (what gets queried and persisted). Both are updated together; the
//! grid is the source of truth for containment and coverage-fraction
//! queries, the patches are kept for export/rendering.

use guidance_types::{CoveragePatch, Vec2};
use std::collections::HashMap;

const MIN_POINT_SPACING_SQ: f64 = 0.0144; // 0.12 m, per spec's patch-vertex invariant
const CELL_SIZE_M: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Cell(i32, i32);

fn cell_of(p: Vec2, min_e: f64, min_n: f64) -> Cell {
    Cell(
        ((p.easting - min_e) / CELL_SIZE_M).floor() as i32,
        ((p.northing - min_n) / CELL_SIZE_M).floor() as i32,
    )
}

#[derive(Debug, Clone)]
pub struct CoverageEngine {
    bounds: (f64, f64, f64, f64), // min_e, min_n, max_e, max_n
    cells: HashMap<Cell, bool>,
    patches: HashMap<u8, Vec<CoveragePatch>>,
    active: HashMap<u8, usize>, // zone -> index into patches[zone] currently being built
    dirty: bool,
}

impl CoverageEngine {
    /// `bounds` is set once per field and never changes afterward.
    pub fn new(min_e: f64, min_n: f64, max_e: f64, max_n: f64) -> Self {
        Self {
            bounds: (min_e, min_n, max_e, max_n),
            cells: HashMap::new(),
            patches: HashMap::new(),
            active: HashMap::new(),
            dirty: false,
        }
    }

    fn mark_segment(&mut self, a_left: Vec2, a_right: Vec2, b_left: Vec2, b_right: Vec2) {
        let (min_e, min_n, ..) = self.bounds;
        for p in [a_left, a_right, b_left, b_right] {
            self.cells.insert(cell_of(p, min_e, min_n), true);
        }
        // Rasterize the quad interior coarsely by sampling a short grid of
        // interpolated points between the two vertex pairs.
        const SAMPLES: usize = 6;
        for i in 0..=SAMPLES {
            let t = i as f64 / SAMPLES as f64;
            let left = lerp(a_left, b_left, t);
            let right = lerp(a_right, b_right, t);
            for j in 0..=SAMPLES {
                let u = j as f64 / SAMPLES as f64;
                let p = lerp(left, right, u);
                self.cells.insert(cell_of(p, min_e, min_n), true);
            }
        }
        self.dirty = true;
    }

    pub fn start_mapping(&mut self, zone: u8, left: Vec2, right: Vec2, colour: Option<u32>) {
        let patch = CoveragePatch::new(zone, colour.unwrap_or(0), left, right);
        let list = self.patches.entry(zone).or_default();
        list.push(patch);
        self.active.insert(zone, list.len() - 1);
        self.mark_segment(left, right, left, right);
    }

    /// Appends a vertex pair iff the new pair's centre has moved at least
    /// `sqrt(0.0144) m` from the previous pair's centre.
    pub fn add_coverage_point(&mut self, zone: u8, left: Vec2, right: Vec2) {
        let Some(&idx) = self.active.get(&zone) else {
            self.start_mapping(zone, left, right, None);
            return;
        };
        let Some(list) = self.patches.get_mut(&zone) else {
            return;
        };
        let patch = &mut list[idx];
        let last_left = *patch.lefts.last().unwrap();
        let last_right = *patch.rights.last().unwrap();
        let prev_centre = midpoint(last_left, last_right);
        let new_centre = midpoint(left, right);
        if prev_centre.dist_sq(&new_centre) < MIN_POINT_SPACING_SQ {
            return;
        }
        patch.lefts.push(left);
        patch.rights.push(right);
        self.mark_segment(last_left, last_right, left, right);
    }

    pub fn stop_mapping(&mut self, zone: u8) {
        self.active.remove(&zone);
    }

    pub fn is_point_covered(&self, p: Vec2) -> bool {
        let (min_e, min_n, ..) = self.bounds;
        self.cells.get(&cell_of(p, min_e, min_n)).copied().unwrap_or(false)
    }

    /// Fraction of the perpendicular segment at `centre + heading·look_ahead`
    /// that lies within any recorded patch, sampled at `>= 8` interior
    /// points.
    pub fn segment_coverage(&self, centre: Vec2, heading: f64, half_width: f64, look_ahead: f64) -> f64 {
        let fwd = Vec2::new(heading.sin(), heading.cos());
        let projected = centre.add(&fwd.scale(look_ahead));
        self.sample_fraction(projected, heading, half_width)
    }

    fn sample_fraction(&self, centre: Vec2, heading: f64, half_width: f64) -> f64 {
        if half_width <= 0.0 {
            return if self.is_point_covered(centre) { 1.0 } else { 0.0 };
        }
        let right = Vec2::right_of_heading(heading);
        const SAMPLES: usize = 9;
        let mut covered = 0usize;
        for i in 0..SAMPLES {
            let t = -1.0 + 2.0 * (i as f64) / (SAMPLES as f64 - 1.0);
            let p = centre.add(&right.scale(t * half_width));
            if self.is_point_covered(p) {
                covered += 1;
            }
        }
        covered as f64 / SAMPLES as f64
    }

    /// The triple (current, look-on, look-off) from one pass: the same
    /// sample fraction computed at the vehicle position and at the two
    /// look-ahead projections used by the section controller.
    pub fn segment_coverage_multi(
        &self,
        centre: Vec2,
        heading: f64,
        half_width: f64,
        look_on: f64,
        look_off: f64,
    ) -> (f64, f64, f64) {
        let current = self.sample_fraction(centre, heading, half_width);
        let on = self.segment_coverage(centre, heading, half_width, look_on);
        let off = self.segment_coverage(centre, heading, half_width, look_off);
        (current, on, off)
    }

    /// Returns `true` (and clears the dirty flag) if anything mutated
    /// state since the previous call.
    pub fn flush_update(&mut self) -> bool {
        let was_dirty = self.dirty;
        self.dirty = false;
        was_dirty
    }

    /// Run-length-encodes the covered-cell bit array over the declared
    /// bounds: a sequence of `(u32 run length, u8 value)` pairs.
    pub fn save(&self) -> Vec<u8> {
        let (min_e, min_n, max_e, max_n) = self.bounds;
        let w = ((max_e - min_e) / CELL_SIZE_M).ceil().max(0.0) as i32;
        let h = ((max_n - min_n) / CELL_SIZE_M).ceil().max(0.0) as i32;

        let mut out = Vec::new();
        out.extend_from_slice(&min_e.to_le_bytes());
        out.extend_from_slice(&min_n.to_le_bytes());
        out.extend_from_slice(&max_e.to_le_bytes());
        out.extend_from_slice(&max_n.to_le_bytes());

        let mut run_value = false;
        let mut run_len: u32 = 0;
        let mut flush = |out: &mut Vec<u8>, value: bool, len: u32| {
            if len == 0 {
                return;
            }
            out.extend_from_slice(&len.to_le_bytes());
            out.push(value as u8);
        };
        for y in 0..h {
            for x in 0..w {
                let covered = self.cells.get(&Cell(x, y)).copied().unwrap_or(false);
                if covered == run_value {
                    run_len += 1;
                } else {
                    flush(&mut out, run_value, run_len);
                    run_value = covered;
                    run_len = 1;
                }
            }
        }
        flush(&mut out, run_value, run_len);
        out
    }

    /// Restores cells from a buffer produced by `save`. Cells whose
    /// declared bounds fall outside this engine's own bounds are silently
    /// discarded.
    pub fn load(&mut self, data: &[u8]) -> Option<()> {
        if data.len() < 32 {
            return None;
        }
        let saved_min_e = f64::from_le_bytes(data[0..8].try_into().ok()?);
        let saved_min_n = f64::from_le_bytes(data[8..16].try_into().ok()?);
        let saved_max_e = f64::from_le_bytes(data[16..24].try_into().ok()?);
        let saved_max_n = f64::from_le_bytes(data[24..32].try_into().ok()?);
        let saved_w = ((saved_max_e - saved_min_e) / CELL_SIZE_M).ceil().max(0.0) as i32;

        let mut offset = 32;
        let mut index: i64 = 0;
        while offset + 5 <= data.len() {
            let len = u32::from_le_bytes(data[offset..offset + 4].try_into().ok()?);
            let value = data[offset + 4] != 0;
            offset += 5;
            for _ in 0..len {
                if saved_w > 0 {
                    let x = (index % saved_w as i64) as i32;
                    let y = (index / saved_w as i64) as i32;
                    let world = Vec2::new(saved_min_e + x as f64 * CELL_SIZE_M, saved_min_n + y as f64 * CELL_SIZE_M);
                    if self.in_bounds(world) && value {
                        let (min_e, min_n, ..) = self.bounds;
                        self.cells.insert(cell_of(world, min_e, min_n), true);
                    }
                }
                index += 1;
            }
        }
        self.dirty = true;
        Some(())
    }

    fn in_bounds(&self, p: Vec2) -> bool {
        let (min_e, min_n, max_e, max_n) = self.bounds;
        p.easting >= min_e && p.easting <= max_e && p.northing >= min_n && p.northing <= max_n
    }
}

fn midpoint(a: Vec2, b: Vec2) -> Vec2 {
    Vec2::new((a.easting + b.easting) / 2.0, (a.northing + b.northing) / 2.0)
}

fn lerp(a: Vec2, b: Vec2, t: f64) -> Vec2 {
    Vec2::new(a.easting + (b.easting - a.easting) * t, a.northing + (b.northing - a.northing) * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_mapping_covers_initial_segment() {
        let mut e = CoverageEngine::new(0.0, 0.0, 100.0, 100.0);
        e.start_mapping(0, Vec2::new(10.0, 10.0), Vec2::new(14.0, 10.0), None);
        assert!(e.is_point_covered(Vec2::new(12.0, 10.0)));
        assert!(!e.is_point_covered(Vec2::new(50.0, 50.0)));
    }

    #[test]
    fn add_coverage_point_requires_minimum_spacing() {
        let mut e = CoverageEngine::new(0.0, 0.0, 100.0, 100.0);
        e.start_mapping(0, Vec2::new(0.0, 0.0), Vec2::new(4.0, 0.0), None);
        e.add_coverage_point(0, Vec2::new(0.01, 0.0), Vec2::new(4.01, 0.0));
        let list = &e.patches[&0];
        assert_eq!(list[0].pair_count(), 1, "sub-threshold move should not append");
    }

    #[test]
    fn add_coverage_point_appends_once_far_enough() {
        let mut e = CoverageEngine::new(0.0, 0.0, 100.0, 100.0);
        e.start_mapping(0, Vec2::new(0.0, 0.0), Vec2::new(4.0, 0.0), None);
        e.add_coverage_point(0, Vec2::new(0.0, 1.0), Vec2::new(4.0, 1.0));
        assert_eq!(e.patches[&0][0].pair_count(), 2);
    }

    #[test]
    fn segment_coverage_is_full_inside_a_wide_patch() {
        let mut e = CoverageEngine::new(0.0, 0.0, 100.0, 100.0);
        e.start_mapping(0, Vec2::new(0.0, 10.0), Vec2::new(20.0, 10.0), None);
        e.add_coverage_point(0, Vec2::new(0.0, 20.0), Vec2::new(20.0, 20.0));
        let frac = e.segment_coverage(Vec2::new(10.0, 15.0), 0.0, 8.0, 0.0);
        assert!(frac > 0.8, "fraction = {frac}");
    }

    #[test]
    fn flush_update_reports_dirty_once() {
        let mut e = CoverageEngine::new(0.0, 0.0, 10.0, 10.0);
        e.start_mapping(0, Vec2::new(1.0, 1.0), Vec2::new(2.0, 1.0), None);
        assert!(e.flush_update());
        assert!(!e.flush_update());
    }

    #[test]
    fn save_and_load_round_trip_preserves_coverage() {
        let mut e = CoverageEngine::new(0.0, 0.0, 20.0, 20.0);
        e.start_mapping(0, Vec2::new(5.0, 5.0), Vec2::new(8.0, 5.0), None);
        let saved = e.save();

        let mut loaded = CoverageEngine::new(0.0, 0.0, 20.0, 20.0);
        loaded.load(&saved).unwrap();
        assert!(loaded.is_point_covered(Vec2::new(6.0, 5.0)));
    }

    #[test]
    fn load_discards_cells_outside_declared_bounds() {
        let mut e = CoverageEngine::new(0.0, 0.0, 50.0, 50.0);
        e.start_mapping(0, Vec2::new(45.0, 45.0), Vec2::new(48.0, 45.0), None);
        let saved = e.save();

        let mut smaller = CoverageEngine::new(0.0, 0.0, 10.0, 10.0);
        smaller.load(&saved).unwrap();
        assert!(!smaller.is_point_covered(Vec2::new(45.0, 45.0)));
    }
}

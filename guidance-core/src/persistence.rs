//! Field file persistence (spec §6): load/save the per-field directory —
//! `Field.txt`, `Boundary.txt`, `Headland.Txt`, `BackPic.Txt`,
//! `TrackLines.txt`, `Headlines.txt`, `Coverage.bin`.
//!
//! Grounded on the teacher's async load/save pattern: missing or corrupt
//! files fall back to a default rather than propagating for reads that
//! tolerate it, while writes surface `PersistenceError` synchronously —
//! persistence failures reach the caller, they never crash the loop.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::coverage::CoverageEngine;
use crate::error::PersistenceError;
use guidance_types::{Boundary, Polygon, Track, TrackKind, TrackMode, Vec2, Vec3};

const FIELD_FILE: &str = "Field.txt";
const BOUNDARY_FILE: &str = "Boundary.txt";
const HEADLAND_FILE: &str = "Headland.Txt";
const BACKPIC_FILE: &str = "BackPic.Txt";
const TRACKLINES_FILE: &str = "TrackLines.txt";
const HEADLINES_FILE: &str = "Headlines.txt";
const COVERAGE_FILE: &str = "Coverage.bin";

#[derive(Debug, Clone, Default)]
pub struct FieldInfo {
    pub name: String,
    pub offset_x: f64,
    pub offset_y: f64,
    pub convergence: f64,
    pub start_lat: f64,
    pub start_lon: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BackPic {
    pub enabled: bool,
    pub max_e: f64,
    pub min_e: f64,
    pub max_n: f64,
    pub min_n: f64,
}

#[derive(Debug, Clone, Default)]
pub struct HeadlinePath {
    pub name: String,
    pub move_distance: f64,
    pub mode: u8,
    pub a_point_index: usize,
    pub points: Vec<Vec3>,
}

/// All of a field's persisted data, loaded as one unit by the pipeline on
/// `Start`.
#[derive(Debug, Clone, Default)]
pub struct FieldData {
    pub info: FieldInfo,
    pub boundary: Option<Boundary>,
    pub back_pic: Option<BackPic>,
    pub tracks: Vec<Track>,
    pub headlines: Vec<HeadlinePath>,
}

fn io_err(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io { path: path.display().to_string(), source }
}

fn malformed(path: &Path, line: usize, reason: impl Into<String>) -> PersistenceError {
    PersistenceError::Malformed { path: path.display().to_string(), line, reason: reason.into() }
}

fn csv_f64(parts: &[&str], idx: usize) -> Option<f64> {
    parts.get(idx).and_then(|s| s.trim().parse().ok())
}

/// Loads every field file that exists; missing optional files (boundary,
/// back pic, track lines, headlines) are skipped rather than erroring —
/// a brand new field directory has none of them yet.
pub async fn load_field(dir: &Path) -> Result<FieldData, PersistenceError> {
    let info = load_field_info(&dir.join(FIELD_FILE)).await?;
    let boundary = load_boundary(dir).await?;
    let back_pic = load_back_pic(&dir.join(BACKPIC_FILE)).await.ok();
    let tracks = load_track_lines(&dir.join(TRACKLINES_FILE)).await.unwrap_or_default();
    let headlines = load_headlines(&dir.join(HEADLINES_FILE)).await.unwrap_or_default();
    Ok(FieldData { info, boundary, back_pic, tracks, headlines })
}

async fn load_field_info(path: &Path) -> Result<FieldInfo, PersistenceError> {
    if !path.exists() {
        info!("persistence: no {} found, using defaults", path.display());
        return Ok(FieldInfo::default());
    }
    let data = fs::read_to_string(path).await.map_err(|e| io_err(path, e))?;
    let mut out = FieldInfo::default();
    let lines: Vec<&str> = data.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        match lines[i].trim() {
            "$FieldDir" => {
                if let Some(name) = lines.get(i + 1) {
                    out.name = name.trim().to_string();
                }
                i += 2;
            }
            "$Offsets" => {
                if let Some(row) = lines.get(i + 1) {
                    let parts: Vec<&str> = row.split(',').collect();
                    out.offset_x = csv_f64(&parts, 0).ok_or_else(|| malformed(path, i + 1, "bad offsetX"))?;
                    out.offset_y = csv_f64(&parts, 1).ok_or_else(|| malformed(path, i + 1, "bad offsetY"))?;
                }
                i += 2;
            }
            "Convergence" => {
                if let Some(v) = lines.get(i + 1) {
                    out.convergence = v.trim().parse().map_err(|_| malformed(path, i + 1, "bad convergence"))?;
                }
                i += 2;
            }
            "StartFix" => {
                if let Some(row) = lines.get(i + 1) {
                    let parts: Vec<&str> = row.split(',').collect();
                    out.start_lat = csv_f64(&parts, 0).ok_or_else(|| malformed(path, i + 1, "bad start lat"))?;
                    out.start_lon = csv_f64(&parts, 1).ok_or_else(|| malformed(path, i + 1, "bad start lon"))?;
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(out)
}

fn parse_polygon_block(lines: &[&str], mut i: usize, path: &Path) -> Result<(Polygon, bool, usize), PersistenceError> {
    let is_drive_thru = lines[i].trim().eq_ignore_ascii_case("true");
    i += 1;
    let count: usize = lines[i].trim().parse().map_err(|_| malformed(path, i, "bad point count"))?;
    i += 1;
    let mut points = Vec::with_capacity(count);
    for _ in 0..count {
        let parts: Vec<&str> = lines[i].split(',').collect();
        let e = csv_f64(&parts, 0).ok_or_else(|| malformed(path, i, "bad easting"))?;
        let n = csv_f64(&parts, 1).ok_or_else(|| malformed(path, i, "bad northing"))?;
        let h = csv_f64(&parts, 2).ok_or_else(|| malformed(path, i, "bad heading"))?;
        points.push(Vec3::new(e, n, h));
        i += 1;
    }
    Ok((Polygon::new(points), is_drive_thru, i))
}

async fn load_boundary(dir: &Path) -> Result<Option<Boundary>, PersistenceError> {
    let path = dir.join(BOUNDARY_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(&path).await.map_err(|e| io_err(&path, e))?;
    let lines: Vec<&str> = data.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() || lines[0].trim() != "$Boundary" {
        return Err(malformed(&path, 0, "missing $Boundary header"));
    }
    let mut i = 1;
    let mut polygons = Vec::new();
    while i < lines.len() {
        let (poly, drive_thru, next) = parse_polygon_block(&lines, i, &path)?;
        polygons.push((poly, drive_thru));
        i = next;
    }
    let mut iter = polygons.into_iter();
    let (outer, _outer_drive_thru) = iter.next().ok_or_else(|| malformed(&path, 0, "no outer polygon"))?;
    let (holes, hole_drive_thru): (Vec<Polygon>, Vec<bool>) = iter.unzip();

    let headland_path = dir.join(HEADLAND_FILE);
    let headland = if headland_path.exists() {
        let hd = fs::read_to_string(&headland_path).await.map_err(|e| io_err(&headland_path, e))?;
        let hlines: Vec<&str> = hd.lines().filter(|l| !l.trim().is_empty()).collect();
        if !hlines.is_empty() {
            let (poly, _, _) = parse_polygon_block(&hlines, 0, &headland_path)?;
            Some(poly)
        } else {
            None
        }
    } else {
        None
    };

    Ok(Some(Boundary { outer, holes, hole_drive_thru, headland }))
}

async fn load_back_pic(path: &Path) -> Result<BackPic, PersistenceError> {
    let data = fs::read_to_string(path).await.map_err(|e| io_err(path, e))?;
    let lines: Vec<&str> = data.lines().collect();
    if lines.len() < 6 || lines[0].trim() != "$BackPic" {
        return Err(malformed(path, 0, "missing $BackPic header"));
    }
    Ok(BackPic {
        enabled: lines[1].trim().eq_ignore_ascii_case("true"),
        max_e: lines[2].trim().parse().map_err(|_| malformed(path, 2, "bad maxE"))?,
        min_e: lines[3].trim().parse().map_err(|_| malformed(path, 3, "bad minE"))?,
        max_n: lines[4].trim().parse().map_err(|_| malformed(path, 4, "bad maxN"))?,
        min_n: lines[5].trim().parse().map_err(|_| malformed(path, 5, "bad minN"))?,
    })
}

async fn load_track_lines(path: &Path) -> Result<Vec<Track>, PersistenceError> {
    let data = fs::read_to_string(path).await.map_err(|e| io_err(path, e))?;
    let lines: Vec<&str> = data.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() || lines[0].trim() != "$TrackLines" {
        return Err(malformed(path, 0, "missing $TrackLines header"));
    }
    let mut tracks = Vec::new();
    let mut i = 1;
    while i < lines.len() {
        let name = lines[i].trim().to_string();
        i += 1;
        let _heading_rad: f64 = lines[i].trim().parse().map_err(|_| malformed(path, i, "bad heading"))?;
        i += 1;
        let a_parts: Vec<&str> = lines[i].split(',').collect();
        let a = Vec2::new(
            csv_f64(&a_parts, 0).ok_or_else(|| malformed(path, i, "bad A.e"))?,
            csv_f64(&a_parts, 1).ok_or_else(|| malformed(path, i, "bad A.n"))?,
        );
        i += 1;
        let b_parts: Vec<&str> = lines[i].split(',').collect();
        let b = Vec2::new(
            csv_f64(&b_parts, 0).ok_or_else(|| malformed(path, i, "bad B.e"))?,
            csv_f64(&b_parts, 1).ok_or_else(|| malformed(path, i, "bad B.n"))?,
        );
        i += 1;
        let nudge: f64 = lines[i].trim().parse().map_err(|_| malformed(path, i, "bad nudge"))?;
        i += 1;
        let mode_raw = lines[i].trim();
        i += 1;
        let visible = lines[i].trim().eq_ignore_ascii_case("true");
        i += 1;
        let curve_count: usize = lines[i].trim().parse().map_err(|_| malformed(path, i, "bad curve count"))?;
        i += 1;
        let mut curve_points = Vec::with_capacity(curve_count);
        for _ in 0..curve_count {
            let parts: Vec<&str> = lines[i].split(',').collect();
            curve_points.push(Vec3::new(
                csv_f64(&parts, 0).ok_or_else(|| malformed(path, i, "bad curve e"))?,
                csv_f64(&parts, 1).ok_or_else(|| malformed(path, i, "bad curve n"))?,
                csv_f64(&parts, 2).ok_or_else(|| malformed(path, i, "bad curve heading"))?,
            ));
            i += 1;
        }

        let kind = if curve_count >= 2 {
            TrackKind::Curve { points: curve_points }
        } else {
            let heading = (b.easting - a.easting).atan2(b.northing - a.northing).to_degrees();
            TrackKind::AbLine { a, b, heading: guidance_types::wrap_deg_360(heading) }
        };
        let mode = if mode_raw.eq_ignore_ascii_case("uturnonly") { TrackMode::UTurnOnly } else { TrackMode::Normal };
        tracks.push(Track { name, kind, nudge, visible, mode });
    }
    Ok(tracks)
}

async fn load_headlines(path: &Path) -> Result<Vec<HeadlinePath>, PersistenceError> {
    let data = fs::read_to_string(path).await.map_err(|e| io_err(path, e))?;
    let lines: Vec<&str> = data.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() || lines[0].trim() != "$HeadLines" {
        return Err(malformed(path, 0, "missing $HeadLines header"));
    }
    let mut out = Vec::new();
    let mut i = 1;
    while i < lines.len() {
        let name = lines[i].trim().to_string();
        i += 1;
        let move_distance: f64 = lines[i].trim().parse().map_err(|_| malformed(path, i, "bad moveDistance"))?;
        i += 1;
        let mode: u8 = lines[i].trim().parse().map_err(|_| malformed(path, i, "bad mode"))?;
        i += 1;
        let a_point_index: usize = lines[i].trim().parse().map_err(|_| malformed(path, i, "bad aPointIndex"))?;
        i += 1;
        let count: usize = lines[i].trim().parse().map_err(|_| malformed(path, i, "bad count"))?;
        i += 1;
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            let parts: Vec<&str> = lines[i].split(',').collect();
            points.push(Vec3::new(
                csv_f64(&parts, 0).ok_or_else(|| malformed(path, i, "bad point e"))?,
                csv_f64(&parts, 1).ok_or_else(|| malformed(path, i, "bad point n"))?,
                csv_f64(&parts, 2).ok_or_else(|| malformed(path, i, "bad point heading"))?,
            ));
            i += 1;
        }
        out.push(HeadlinePath { name, move_distance, mode, a_point_index, points });
    }
    Ok(out)
}

pub async fn save_field_info(dir: &Path, info: &FieldInfo) -> Result<(), PersistenceError> {
    let path = dir.join(FIELD_FILE);
    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let body = format!(
        "{now}\n$FieldDir\n{}\n$Offsets\n{:.3},{:.3}\nConvergence\n{:.5}\nStartFix\n{:.8},{:.8}\n",
        info.name, info.offset_x, info.offset_y, info.convergence, info.start_lat, info.start_lon
    );
    fs::write(&path, body).await.map_err(|e| io_err(&path, e))
}

pub async fn save_boundary(dir: &Path, boundary: &Boundary) -> Result<(), PersistenceError> {
    let path = dir.join(BOUNDARY_FILE);
    let mut body = String::from("$Boundary\n");
    let drive_thru_flags = std::iter::once(false).chain(
        boundary.hole_drive_thru.iter().copied().chain(std::iter::repeat(false)).take(boundary.holes.len()),
    );
    for (poly, drive_thru) in std::iter::once(&boundary.outer).chain(boundary.holes.iter()).zip(drive_thru_flags) {
        body.push_str(if drive_thru { "True\n" } else { "False\n" });
        body.push_str(&format!("{}\n", poly.points.len()));
        for p in &poly.points {
            body.push_str(&format!("{:.3},{:.3},{:.5}\n", p.easting, p.northing, p.heading));
        }
    }
    fs::write(&path, body).await.map_err(|e| io_err(&path, e))?;

    if let Some(headland) = &boundary.headland {
        let hpath = dir.join(HEADLAND_FILE);
        let mut hbody = String::new();
        hbody.push_str("False\n");
        hbody.push_str(&format!("{}\n", headland.points.len()));
        for p in &headland.points {
            hbody.push_str(&format!("{:.3},{:.3},{:.5}\n", p.easting, p.northing, p.heading));
        }
        fs::write(&hpath, hbody).await.map_err(|e| io_err(&hpath, e))?;
    }
    Ok(())
}

pub async fn save_coverage(dir: &Path, coverage: &CoverageEngine) -> Result<(), PersistenceError> {
    let path = dir.join(COVERAGE_FILE);
    let data = coverage.save();
    fs::write(&path, data).await.map_err(|e| io_err(&path, e))
}

pub async fn load_coverage(dir: &Path, coverage: &mut CoverageEngine) -> Result<(), PersistenceError> {
    let path = dir.join(COVERAGE_FILE);
    if !path.exists() {
        return Ok(());
    }
    let data = fs::read(&path).await.map_err(|e| io_err(&path, e))?;
    if coverage.load(&data).is_none() {
        warn!("persistence: {} is corrupt, starting with empty coverage", path.display());
    }
    Ok(())
}

pub fn field_dir(root: &Path, field_name: &str) -> PathBuf {
    root.join(field_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_field_file_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let data = load_field(dir.path()).await.unwrap();
        assert_eq!(data.info.name, "");
        assert!(data.boundary.is_none());
    }

    #[tokio::test]
    async fn field_info_round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let info = FieldInfo {
            name: "North 40".to_string(),
            offset_x: 1.5,
            offset_y: -2.25,
            convergence: 0.123,
            start_lat: 45.12345678,
            start_lon: -93.87654321,
        };
        save_field_info(dir.path(), &info).await.unwrap();
        let loaded = load_field_info(&dir.path().join(FIELD_FILE)).await.unwrap();
        assert_eq!(loaded.name, "North 40");
        assert!((loaded.offset_x - 1.5).abs() < 1e-6);
        assert!((loaded.start_lat - 45.12345678).abs() < 1e-6);
    }

    #[tokio::test]
    async fn boundary_round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let outer = Polygon::new(vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(10.0, 10.0, 0.0),
            Vec3::new(0.0, 10.0, 0.0),
        ]);
        let boundary = Boundary::new(outer);
        save_boundary(dir.path(), &boundary).await.unwrap();
        let loaded = load_boundary(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.outer.points.len(), 4);
        assert!(loaded.holes.is_empty());
    }

    #[tokio::test]
    async fn hole_drive_thru_flags_round_trip_through_save_and_load() {
        let dir = tempdir().unwrap();
        let outer = Polygon::new(vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(100.0, 0.0, 0.0),
            Vec3::new(100.0, 100.0, 0.0),
            Vec3::new(0.0, 100.0, 0.0),
        ]);
        let gate = Polygon::new(vec![
            Vec3::new(40.0, 40.0, 0.0),
            Vec3::new(60.0, 40.0, 0.0),
            Vec3::new(60.0, 60.0, 0.0),
            Vec3::new(40.0, 60.0, 0.0),
        ]);
        let obstacle = Polygon::new(vec![
            Vec3::new(10.0, 10.0, 0.0),
            Vec3::new(20.0, 10.0, 0.0),
            Vec3::new(20.0, 20.0, 0.0),
            Vec3::new(10.0, 20.0, 0.0),
        ]);
        let boundary =
            Boundary { outer, holes: vec![gate, obstacle], hole_drive_thru: vec![true, false], headland: None };
        save_boundary(dir.path(), &boundary).await.unwrap();
        let loaded = load_boundary(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.holes.len(), 2);
        assert_eq!(loaded.hole_drive_thru, vec![true, false]);
    }

    #[tokio::test]
    async fn coverage_round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let mut engine = CoverageEngine::new(0.0, 0.0, 20.0, 20.0);
        engine.start_mapping(0, Vec2::new(5.0, 5.0), Vec2::new(6.0, 5.0), None);
        engine.add_coverage_point(0, Vec2::new(5.0, 6.0), Vec2::new(6.0, 6.0));
        save_coverage(dir.path(), &engine).await.unwrap();

        let mut reloaded = CoverageEngine::new(0.0, 0.0, 20.0, 20.0);
        load_coverage(dir.path(), &mut reloaded).await.unwrap();
        assert!(reloaded.is_point_covered(Vec2::new(5.5, 5.5)));
    }
}

//! Local tangent-plane projection (spec §4.2, component C2).
//!
//! Equirectangular approximation about a fixed field origin: longitude is
//! scaled by `cos(origin_lat)` so that easting and northing share a meters
//! scale near the origin. Accurate to a few centimeters over a few
//! kilometers, which matches the guidance platform's operating envelope
//! (a single field, never a multi-kilometer haul).

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Fixed reference point a field's local plane is built around. Set once
/// from the first valid fix of a session and never moved afterward so that
/// repeated calls stay affine (fixed origin in, fixed origin out).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalOrigin {
    pub lat: f64,
    pub lon: f64,
    cos_lat: f64,
}

impl LocalOrigin {
    pub fn new(lat_deg: f64, lon_deg: f64) -> Self {
        Self { lat: lat_deg, lon: lon_deg, cos_lat: lat_deg.to_radians().cos() }
    }

    /// Project a WGS-84 fix to (easting, northing) meters relative to this
    /// origin.
    pub fn to_local(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let d_lat = (lat_deg - self.lat).to_radians();
        let d_lon = (lon_deg - self.lon).to_radians();
        let northing = d_lat * EARTH_RADIUS_M;
        let easting = d_lon * EARTH_RADIUS_M * self.cos_lat;
        (easting, northing)
    }

    /// Invert a local-plane point back to WGS-84. Exact inverse of
    /// `to_local` for this same origin (equirectangular, not round-earth).
    pub fn to_geo(&self, easting: f64, northing: f64) -> (f64, f64) {
        let d_lat = northing / EARTH_RADIUS_M;
        let d_lon = easting / (EARTH_RADIUS_M * self.cos_lat);
        (self.lat + d_lat.to_degrees(), self.lon + d_lon.to_degrees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_projects_to_zero() {
        let o = LocalOrigin::new(45.0, -93.0);
        let (e, n) = o.to_local(45.0, -93.0);
        assert!(e.abs() < 1e-9 && n.abs() < 1e-9);
    }

    #[test]
    fn round_trip_is_affine() {
        let o = LocalOrigin::new(45.0, -93.0);
        let (e, n) = o.to_local(45.001, -93.002);
        let (lat, lon) = o.to_geo(e, n);
        assert!((lat - 45.001).abs() < 1e-9);
        assert!((lon - (-93.002)).abs() < 1e-9);
    }

    #[test]
    fn one_degree_latitude_is_about_111km() {
        let o = LocalOrigin::new(0.0, 0.0);
        let (_, n) = o.to_local(1.0, 0.0);
        assert!((n - 111_320.0).abs() < 500.0);
    }

    #[test]
    fn longitude_scale_shrinks_away_from_equator() {
        let o = LocalOrigin::new(60.0, 0.0);
        let (e, _) = o.to_local(60.0, 1.0);
        assert!(e < 60_000.0);
    }
}

//! Local-plane → WGS-84 conversion, the same equirectangular
//! approximation the control core uses, kept independent here since
//! `field-sim` ships as its own process with no dependency on the core.

const EARTH_RADIUS_M: f64 = 6_378_137.0;

#[derive(Debug, Clone, Copy)]
pub struct LocalOrigin {
    lat: f64,
    lon: f64,
    cos_lat: f64,
}

impl LocalOrigin {
    pub fn new(lat_deg: f64, lon_deg: f64) -> Self {
        Self { lat: lat_deg, lon: lon_deg, cos_lat: lat_deg.to_radians().cos() }
    }

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
    fn origin_maps_to_itself() {
        let o = LocalOrigin::new(45.0, -93.0);
        let (lat, lon) = o.to_geo(0.0, 0.0);
        assert!((lat - 45.0).abs() < 1e-9);
        assert!((lon - (-93.0)).abs() < 1e-9);
    }
}

//! Kinematic bicycle model driving a virtual vehicle along a configured
//! track. Advances position/heading by `dt` each tick the way the
//! teacher's `BoatSim::tick` advances boat position/attitude — one
//! struct holding all per-tick state, one `tick(dt)` method, pure math,
//! never panics.

use guidance_types::{wrap_deg_360, Track, TrackKind, Vec2};

use crate::config::VehicleSimConfig;

pub struct VehicleSim {
    pub position: Vec2,
    pub heading_deg: f64,
    pub speed_mps: f64,
    pub yaw_rate_rad_s: f64,
    steer_rad: f64,
    wheelbase_m: f64,
    max_steer_rad: f64,
    steer_gain: f64,
    lookahead_m: f64,
    curve_index: usize,
}

impl VehicleSim {
    pub fn new(cfg: &VehicleSimConfig, track: &Track) -> Self {
        let (position, heading_deg) = start_pose(track);
        Self {
            position,
            heading_deg,
            speed_mps: cfg.speed_mps,
            yaw_rate_rad_s: 0.0,
            steer_rad: 0.0,
            wheelbase_m: cfg.wheelbase_m,
            max_steer_rad: cfg.max_steer_rad,
            steer_gain: cfg.steer_gain,
            lookahead_m: cfg.lookahead_m,
            curve_index: 0,
        }
    }

    /// Advance by `dt` seconds, steering toward a lookahead point on `track`.
    pub fn tick(&mut self, dt: f64, track: &Track) {
        let target = self.target_point(track);
        let to_target = target.sub(&self.position);
        if to_target.dist(&Vec2::ZERO) > 1e-6 {
            let bearing_deg = to_target.easting.atan2(to_target.northing).to_degrees();
            let heading_error = wrap_deg_360(bearing_deg - self.heading_deg + 180.0) - 180.0;
            self.steer_rad = (heading_error.to_radians() * self.steer_gain)
                .clamp(-self.max_steer_rad, self.max_steer_rad);
        }

        self.yaw_rate_rad_s = (self.speed_mps / self.wheelbase_m) * self.steer_rad.tan();
        self.heading_deg = wrap_deg_360(self.heading_deg + self.yaw_rate_rad_s.to_degrees() * dt);

        let heading_rad = self.heading_deg.to_radians();
        let step = Vec2::new(heading_rad.sin(), heading_rad.cos()).scale(self.speed_mps * dt);
        self.position = self.position.add(&step);
    }

    fn target_point(&mut self, track: &Track) -> Vec2 {
        match &track.kind {
            TrackKind::AbLine { a, b, .. } => {
                let dir = b.sub(a);
                let len = dir.dist(&Vec2::ZERO);
                if len < 1e-6 {
                    return *a;
                }
                let unit = dir.scale(1.0 / len);
                let to_vehicle = self.position.sub(a);
                let along = to_vehicle.easting * unit.easting + to_vehicle.northing * unit.northing;
                a.add(&unit.scale(along + self.lookahead_m))
            }
            TrackKind::Curve { points } => {
                if points.is_empty() {
                    return self.position;
                }
                while self.curve_index + 1 < points.len()
                    && points[self.curve_index].xy().dist(&self.position) < self.lookahead_m
                {
                    self.curve_index += 1;
                }
                points[self.curve_index].xy()
            }
        }
    }
}

fn start_pose(track: &Track) -> (Vec2, f64) {
    match &track.kind {
        TrackKind::AbLine { a, b, .. } => {
            let heading = wrap_deg_360((b.easting - a.easting).atan2(b.northing - a.northing).to_degrees());
            (*a, heading)
        }
        TrackKind::Curve { points } => {
            if let Some(first) = points.first() {
                (first.xy(), wrap_deg_360(first.heading.to_degrees()))
            } else {
                (Vec2::ZERO, 0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidance_types::Track;

    #[test]
    fn vehicle_starts_at_point_a_heading_toward_b() {
        let track = Track::ab("T1", Vec2::new(0.0, 0.0), Vec2::new(0.0, 100.0));
        let cfg = VehicleSimConfig::default();
        let sim = VehicleSim::new(&cfg, &track);
        assert_eq!(sim.position, Vec2::new(0.0, 0.0));
        assert!((sim.heading_deg - 0.0).abs() < 1e-6);
    }

    #[test]
    fn vehicle_advances_north_along_a_north_heading_ab_line() {
        let track = Track::ab("T1", Vec2::new(0.0, 0.0), Vec2::new(0.0, 100.0));
        let cfg = VehicleSimConfig { speed_mps: 2.0, ..VehicleSimConfig::default() };
        let mut sim = VehicleSim::new(&cfg, &track);
        for _ in 0..50 {
            sim.tick(0.1, &track);
        }
        assert!(sim.position.northing > 5.0);
        assert!(sim.position.easting.abs() < 1.0);
    }
}

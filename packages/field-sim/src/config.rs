//! Simulator configuration (TOML + serde), grounded on the teacher's
//! `SimConfig` — loaded once at startup and handed to the components that
//! need it, same shape as the control core's own `CoreConfig`.

use guidance_types::{Track, Vec2};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleSimConfig {
    pub wheelbase_m: f64,
    pub max_steer_rad: f64,
    pub speed_mps: f64,
    pub steer_gain: f64,
    pub lookahead_m: f64,
}

impl Default for VehicleSimConfig {
    fn default() -> Self {
        Self { wheelbase_m: 2.5, max_steer_rad: 0.5, speed_mps: 2.5, steer_gain: 2.0, lookahead_m: 4.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoiseConfig {
    pub gps_noise_std_m: f64,
    pub heading_noise_std_deg: f64,
    pub fix_quality: u8,
    pub satellites: u8,
    pub hdop_nominal: f64,
    pub diff_age_s: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            gps_noise_std_m: 0.02,
            heading_noise_std_deg: 0.3,
            fix_quality: 4,
            satellites: 12,
            hdop_nominal: 0.9,
            diff_age_s: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub update_rate_hz: f64,
    #[serde(default)]
    pub vehicle: VehicleSimConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    pub track: Track,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            origin_lat: 45.0,
            origin_lon: -93.0,
            update_rate_hz: 10.0,
            vehicle: VehicleSimConfig::default(),
            noise: NoiseConfig::default(),
            track: Track::ab("default", Vec2::new(0.0, 0.0), Vec2::new(0.0, 200.0)),
        }
    }
}

impl SimConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading sim config {}: {e}", path.display()))?;
        let cfg: SimConfig = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing sim config {}: {e}", path.display()))?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_a_usable_track() {
        let cfg = SimConfig::default();
        assert!(cfg.update_rate_hz > 0.0);
        assert!(!cfg.track.name.is_empty());
    }
}

//! Process-wide configuration (spec §3 "Configuration").
//!
//! Loaded once at start from a TOML file, owned by the pipeline, and read
//! under a consistent snapshot each cycle — `CoreConfig` is `Clone`, and
//! the pipeline clones it at cycle start so no component can observe a
//! write landing mid-cycle (writers may only commit between cycles).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub wheelbase_m: f64,
    /// Antenna-to-pivot, fore/aft, meters (positive = antenna ahead of pivot).
    pub antenna_fore_aft_m: f64,
    /// Antenna-to-pivot, lateral, meters (positive = antenna right of pivot).
    pub antenna_lateral_m: f64,
    pub pure_pursuit_gain: f64,
    pub stanley_heading_gain: f64,
    pub stanley_xte_gain: f64,
    pub u_turn_compensation: f64,
    pub max_steer_angle_rad: f64,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            wheelbase_m: 2.5,
            antenna_fore_aft_m: 0.0,
            antenna_lateral_m: 0.0,
            pure_pursuit_gain: 1.0,
            stanley_heading_gain: 1.0,
            stanley_xte_gain: 1.0,
            u_turn_compensation: 1.0,
            max_steer_angle_rad: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ToolKinematicsMode {
    Rigid,
    SingleTrailed,
    TowBetweenTank,
}

impl Default for ToolKinematicsMode {
    fn default() -> Self {
        ToolKinematicsMode::Rigid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub mode: ToolKinematicsMode,
    pub width_m: f64,
    pub overlap_m: f64,
    pub offset_m: f64,
    /// Hitch length, tool-mount to pivot (trailed implements); for
    /// tow-between-tank this is the tractor-to-tank hitch.
    pub hitch_length_m: f64,
    /// Trailing-hitch length (tank-to-tool, for tow-between-tank).
    pub trailing_hitch_length_m: f64,
    /// Per-section width, meters, left to right.
    pub section_widths_m: Vec<f64>,
    pub look_ahead_on_s: f64,
    pub look_ahead_off_s: f64,
    pub turn_off_delay_s: f64,
    pub coverage_margin_m: f64,
    pub min_coverage_pct: f64,
    pub slow_speed_cutoff_mps: f64,
    pub zone_map: Vec<u8>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            mode: ToolKinematicsMode::Rigid,
            width_m: 12.0,
            overlap_m: 0.0,
            offset_m: 0.0,
            hitch_length_m: 0.0,
            trailing_hitch_length_m: 0.0,
            section_widths_m: vec![2.0; 6],
            look_ahead_on_s: 1.5,
            look_ahead_off_s: 0.5,
            turn_off_delay_s: 0.2,
            coverage_margin_m: 0.0,
            min_coverage_pct: 0.70,
            slow_speed_cutoff_mps: 0.1,
            zone_map: vec![0; 6],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GuidanceAlgorithm {
    PurePursuit,
    Stanley,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceConfig {
    pub algorithm: GuidanceAlgorithm,
    pub dead_zone_m: f64,
    pub dead_zone_delay_cycles: u32,
    pub min_look_ahead_m: f64,
    pub look_ahead_hold_m: f64,
    pub look_ahead_acquire_factor: f64,
    pub goal_point_look_ahead_mult: f64,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            algorithm: GuidanceAlgorithm::PurePursuit,
            dead_zone_m: 0.02,
            dead_zone_delay_cycles: 3,
            min_look_ahead_m: 1.0,
            look_ahead_hold_m: 3.0,
            look_ahead_acquire_factor: 1.5,
            goal_point_look_ahead_mult: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UTurnStyle {
    Omega,
    Wide,
    KStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UTurnConfig {
    pub turn_radius_m: f64,
    pub extension_length_m: f64,
    pub skip_width_rows: u32,
    pub style: UTurnStyle,
    pub smoothing: bool,
    pub u_turn_compensation: f64,
    pub headland_width_multiplier: f64,
}

impl Default for UTurnConfig {
    fn default() -> Self {
        Self {
            turn_radius_m: 6.0,
            extension_length_m: 0.0,
            skip_width_rows: 0,
            style: UTurnStyle::Omega,
            smoothing: true,
            u_turn_compensation: 1.0,
            headland_width_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsConfig {
    pub min_fix_quality: u8,
    pub max_hdop: f64,
    pub max_diff_age_s: f64,
    pub dual_gps: bool,
    pub dual_heading_offset_deg: f64,
    pub dual_switch_speed_mps: f64,
    pub fix_to_fix_distance_m: f64,
    /// 0..1, weight given to GPS heading in the IMU blend.
    pub heading_fusion_weight: f64,
    pub min_gps_step_m: f64,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            min_fix_quality: 1,
            max_hdop: 5.0,
            max_diff_age_s: 10.0,
            dual_gps: false,
            dual_heading_offset_deg: 0.0,
            dual_switch_speed_mps: 0.3,
            fix_to_fix_distance_m: 0.25,
            heading_fusion_weight: 0.8,
            min_gps_step_m: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtripConfig {
    pub enabled: bool,
    pub caster_host: String,
    pub caster_port: u16,
    pub mount_point: String,
    pub username: String,
    pub password: String,
    /// Destination subnet for forwarded RTCM (datagrams go to `<subnet>.255:port`).
    pub forward_subnet: String,
    pub udp_forward_port: u16,
    pub gga_upload_interval_s: u64,
}

impl Default for NtripConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            caster_host: String::new(),
            caster_port: 2101,
            mount_point: String::new(),
            username: String::new(),
            password: String::new(),
            forward_subnet: "192.168.1".to_string(),
            udp_forward_port: 2233,
            gga_upload_interval_s: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    pub vehicle: VehicleConfig,
    pub tool: ToolConfig,
    pub guidance: GuidanceConfig,
    pub u_turn: UTurnConfig,
    pub connections: ConnectionsConfig,
    pub ntrip: NtripConfig,
}

impl CoreConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let cfg: CoreConfig = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for GuidanceAlgorithm {
    fn default() -> Self {
        GuidanceAlgorithm::PurePursuit
    }
}

impl Default for UTurnStyle {
    fn default() -> Self {
        UTurnStyle::Omega
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let cfg = CoreConfig::default();
        assert!(cfg.vehicle.wheelbase_m > 0.0);
        assert!(cfg.connections.heading_fusion_weight > 0.0 && cfg.connections.heading_fusion_weight < 1.0);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = CoreConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: CoreConfig = toml::from_str(&text).unwrap();
        assert_eq!(cfg.vehicle.wheelbase_m, back.vehicle.wheelbase_m);
    }
}

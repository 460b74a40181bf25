//! `VehicleState`: the pipeline's single mutable working record (spec §3).
//!
//! One instance lives for the life of the control task and is mutated in
//! place every cycle by its single owner (the pipeline coordinator). It is
//! never shared across an await point.

use guidance_types::Position;

/// Latency timestamps for one cycle, nanoseconds since an arbitrary
/// monotonic epoch chosen by the caller (the pipeline coordinator stamps
/// these from `std::time::Instant`, converted to an offset in nanoseconds
/// at publication time).
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleTimestamps {
    pub parse_start_ns: u64,
    pub parse_end_ns: u64,
    pub guidance_end_ns: u64,
}

#[derive(Debug, Clone, Default)]
pub struct VehicleState {
    pub position: Position,
    /// 0..8, NMEA GGA-style fix quality.
    pub fix_quality: u8,
    pub satellites: u8,
    pub hdop: f64,
    pub diff_age_s: f64,
    /// radians
    pub roll: f64,
    /// radians
    pub pitch: f64,
    /// radians/s
    pub yaw_rate: f64,
    pub imu_valid: bool,
    /// Pre-computed `position.heading` in radians, kept alongside the
    /// degree form so guidance code never repeats the conversion.
    pub heading_rad: f64,
    pub cross_track_error_m: f64,
    pub steer_angle_rad: f64,
    pub distance_to_turn_m: f64,
    /// bit i = section i on
    pub section_bitmask: u32,
    pub timestamps: CycleTimestamps,
    /// Whether the most recent fix passed C4's rate-limit gate. Downstream
    /// consumers must skip a cycle where this is false.
    pub fix_valid: bool,
}

impl VehicleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pivot position in the local plane, derived from antenna position.
    /// C4 overwrites `position.{easting,northing}` with the pivot in place,
    /// so after fusion this is simply the stored position.
    pub fn pivot(&self) -> guidance_types::Vec2 {
        self.position.local()
    }
}

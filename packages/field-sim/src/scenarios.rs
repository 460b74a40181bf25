//! Injectable fix-quality fault scenarios.
//!
//! Each scenario degrades one aspect of the emitted fix so the control
//! core's edge-case handling (§7's `FixBelowMinimum`, stale differential
//! age, dead reckoning on dropout) can be exercised without real hardware.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Silently drop a fraction of sentences (hardware/radio dropout).
    GpsDropout,
    /// Force fix quality below the usual RTK-fixed value.
    LowFixQuality,
    /// Inflate HDOP past typical thresholds.
    HighHdop,
    /// Report a differential age that grows without bound (base station loss).
    StaleDiffAge,
    /// Add a fixed heading bias (antenna miscalibration, compass deviation).
    HeadingGlitch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub active: Vec<ScenarioKind>,
    pub dropout_probability: f64,
    pub heading_glitch_deg: f64,
}

impl ScenarioConfig {
    pub fn has(&self, kind: ScenarioKind) -> bool {
        self.active.contains(&kind)
    }
}

pub fn preset(kind: ScenarioKind) -> ScenarioConfig {
    match kind {
        ScenarioKind::GpsDropout => {
            ScenarioConfig { active: vec![kind], dropout_probability: 0.1, ..Default::default() }
        }
        ScenarioKind::HeadingGlitch => {
            ScenarioConfig { active: vec![kind], heading_glitch_deg: 8.0, ..Default::default() }
        }
        _ => ScenarioConfig { active: vec![kind], ..Default::default() },
    }
}

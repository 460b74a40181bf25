//! Closed error kinds for the ground loop, per spec §7.
//!
//! Parse and geometry failures are recovered locally (dropped frames,
//! skipped cycles) and never reach this enum — they are counted in
//! `LatencyMetrics` instead. `GuidanceError` is the surface for the
//! failures that must reach a caller: configuration and persistence.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NmeaError {
    #[error("sentence does not start with '$PANDA' or '$PAOGI'")]
    InvalidHeader,
    #[error("checksum mismatch: expected {expected:02X}, computed {computed:02X}")]
    BadChecksum { expected: u8, computed: u8 },
    #[error("expected at least {expected} comma-separated fields, found {found}")]
    TooFewFields { expected: usize, found: usize },
    #[error("field {index} ({name}) is not a valid number: {value:?}")]
    InvalidField { index: usize, name: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum TurnPlanError {
    #[error("no interior arc found after {steps} inward shifts")]
    NoInteriorArc { steps: u32 },
    #[error("track never crosses the turn area boundary ahead of the vehicle")]
    NoEntryFound,
    #[error("candidate arc passed within {dist:.2} m of the pivot (minimum 3 m)")]
    TooCloseToPivot { dist: f64 },
    #[error("turn area has no polygon to plan against")]
    NoTurnArea,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error reading/writing {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("malformed record in {path} at line {line}: {reason}")]
    Malformed { path: String, line: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("UDP send failed: {0}")]
    Send(#[source] std::io::Error),
}

/// Unified error surface at the pipeline boundary.
#[derive(Debug, Error)]
pub enum GuidanceError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Per-cycle, per-kind rejection counters (§7/§8's "IsValid" distinction).
#[derive(Debug, Clone, Default)]
pub struct ErrorCounters {
    pub bad_checksum: u64,
    pub malformed_sentence: u64,
    pub fix_below_minimum: u64,
    pub no_guidance: u64,
    pub guidance_misses: u64,
    pub turn_synthesis_failed: u64,
    pub out_of_boundary: u64,
    pub transport_send_failed: u64,
    pub persistence_io_error: u64,
}

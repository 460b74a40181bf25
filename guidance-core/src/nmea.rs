//! NMEA ingest (spec §4.3, component C3): `$PANDA` / `$PAOGI` parsing.
//!
//! `$PANDA,hhmmss.ss,DDMM.mmmmm,N,DDDMM.mmmmm,E,q,ss,h.h,aa.a,ge.e,kk.k,
//!  ddd.d,rr.r,pp.p,yy.y*CC\r\n`. `$PAOGI` is the same sentence under a
//! different talker tag. Checksum is the XOR of every byte strictly
//! between `$` and `*`, written as two upper-case hex digits.
//!
//! Parsing works on a borrowed byte span: the field list is a fixed-size
//! array of `&str` slices into the input, never an owned `Vec<String>`.
//! Projection to the local plane (C2) and antenna-to-pivot translation
//! (C4) are downstream steps; this module only fills `position.{lat,lon}`
//! and the fields carried directly by the sentence.

use crate::error::NmeaError;
use crate::vehicle::VehicleState;
use guidance_types::wrap_deg_360;

const KNOTS_TO_MPS: f64 = 0.514444;
const MAX_FIELDS: usize = 16;

/// Parses one sentence (with or without trailing `\r\n`) into `state`.
/// On `Err`, `state` is left exactly as it was on entry; the caller is
/// responsible for bumping its own failure counters (see `error::ErrorCounters`).
pub fn parse(line: &[u8], state: &mut VehicleState) -> Result<(), NmeaError> {
    let text = std::str::from_utf8(line).map_err(|_| NmeaError::InvalidHeader)?;
    let trimmed = text.trim_end_matches(['\r', '\n']);

    if trimmed.len() < 7 || !trimmed.starts_with('$') {
        return Err(NmeaError::InvalidHeader);
    }
    let header = &trimmed[1..6.min(trimmed.len())];
    if header != "PANDA" && header != "PAOGI" {
        return Err(NmeaError::InvalidHeader);
    }
    let star = trimmed.rfind('*').ok_or(NmeaError::InvalidHeader)?;
    if trimmed.len() < star + 3 {
        return Err(NmeaError::InvalidHeader);
    }

    let body = &trimmed[1..star];
    let checksum_str = &trimmed[star + 1..star + 3];
    let expected = u8::from_str_radix(checksum_str, 16).map_err(|_| NmeaError::InvalidField {
        index: 0,
        name: "checksum",
        value: checksum_str.to_string(),
    })?;
    let computed = body.bytes().fold(0u8, |acc, b| acc ^ b);
    if expected != computed {
        return Err(NmeaError::BadChecksum { expected, computed });
    }

    let mut fields: [&str; MAX_FIELDS] = [""; MAX_FIELDS];
    let mut count = 0usize;
    for (i, part) in body.split(',').enumerate() {
        if i < MAX_FIELDS {
            fields[i] = part;
        }
        count += 1;
    }
    // index 0 is the talker word itself; 1..=12 are required.
    const REQUIRED: usize = 13;
    if count < REQUIRED {
        return Err(NmeaError::TooFewFields { expected: REQUIRED, found: count });
    }

    let lat = parse_coord(fields[2], fields[3], 2, "latitude", true)?;
    let lon = parse_coord(fields[4], fields[5], 4, "longitude", false)?;
    let fix_quality = parse_u8(fields[6], 6, "fix_quality")?;
    let satellites = parse_u8(fields[7], 7, "satellites")?;
    let hdop = parse_f64(fields[8], 8, "hdop")?;
    let alt = parse_f64(fields[9], 9, "altitude")?;
    let diff_age_s = parse_f64(fields[10], 10, "diff_age")?;
    let speed_knots = parse_f64(fields[11], 11, "speed")?;
    let heading_deg = parse_f64(fields[12], 12, "heading")?;

    let imu_present = count >= MAX_FIELDS
        && !fields[13].is_empty()
        && !fields[14].is_empty()
        && !fields[15].is_empty();
    let (roll, pitch, yaw_rate) = if imu_present {
        let roll_deg = parse_f64(fields[13], 13, "roll")?;
        let pitch_deg = parse_f64(fields[14], 14, "pitch")?;
        let yaw_rate_deg = parse_f64(fields[15], 15, "yaw_rate")?;
        (roll_deg.to_radians(), pitch_deg.to_radians(), yaw_rate_deg.to_radians())
    } else {
        (0.0, 0.0, 0.0)
    };

    let heading_deg = wrap_deg_360(heading_deg);
    state.position.lat = lat;
    state.position.lon = lon;
    state.position.alt = alt;
    state.position.speed = speed_knots * KNOTS_TO_MPS;
    state.position.heading = heading_deg;
    state.heading_rad = heading_deg.to_radians();
    state.fix_quality = fix_quality;
    state.satellites = satellites;
    state.hdop = hdop;
    state.diff_age_s = diff_age_s;
    state.roll = roll;
    state.pitch = pitch;
    state.yaw_rate = yaw_rate;
    state.imu_valid = imu_present;
    Ok(())
}

fn parse_coord(
    value: &str,
    hemisphere: &str,
    index: usize,
    name: &'static str,
    is_lat: bool,
) -> Result<f64, NmeaError> {
    let raw: f64 = value.parse().map_err(|_| NmeaError::InvalidField {
        index,
        name,
        value: value.to_string(),
    })?;
    let _ = is_lat; // DDMM vs DDDMM differ only in digit count, not in the MM.mmmmm parse below
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let mut deg = degrees + minutes / 60.0;
    match hemisphere {
        "S" | "W" => deg = -deg,
        "N" | "E" => {}
        other => {
            return Err(NmeaError::InvalidField {
                index: index + 1,
                name: "hemisphere",
                value: other.to_string(),
            })
        }
    }
    Ok(deg)
}

fn parse_f64(value: &str, index: usize, name: &'static str) -> Result<f64, NmeaError> {
    value.parse().map_err(|_| NmeaError::InvalidField { index, name, value: value.to_string() })
}

fn parse_u8(value: &str, index: usize, name: &'static str) -> Result<u8, NmeaError> {
    value.parse().map_err(|_| NmeaError::InvalidField { index, name, value: value.to_string() })
}

fn xor_checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

fn build_sentence(talker: &str, fields: &[String]) -> String {
    let body = format!("{talker},{}", fields.join(","));
    let checksum = xor_checksum(&body);
    format!("${body}*{checksum:02X}\r\n")
}

//! `$PANDA` sentence encoding — the inverse of the control core's parser:
//! same fixed field order, same `DDMM.mmmmm` coordinate format, same XOR
//! checksum over the bytes between `$` and `*`.

use guidance_types::wrap_deg_360;

const KNOTS_PER_MPS: f64 = 1.0 / 0.514444;

pub struct PandaFields {
    pub time_hhmmss: String,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub fix_quality: u8,
    pub satellites: u8,
    pub hdop: f64,
    pub altitude_m: f64,
    pub diff_age_s: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub imu: Option<(f64, f64, f64)>,
}

pub fn encode(f: &PandaFields) -> String {
    let (lat_field, lat_hem) = encode_coord(f.lat_deg, true);
    let (lon_field, lon_hem) = encode_coord(f.lon_deg, false);
    let speed_knots = f.speed_mps * KNOTS_PER_MPS;
    let heading = wrap_deg_360(f.heading_deg);

    let mut body = format!(
        "PANDA,{},{lat_field},{lat_hem},{lon_field},{lon_hem},{},{:02},{:.1},{:.1},{:.1},{:.2},{:.1}",
        f.time_hhmmss, f.fix_quality, f.satellites, f.hdop, f.altitude_m, f.diff_age_s, speed_knots, heading
    );
    if let Some((roll_deg, pitch_deg, yaw_rate_deg)) = f.imu {
        body.push_str(&format!(",{roll_deg:.2},{pitch_deg:.2},{yaw_rate_deg:.2}"));
    }
    let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${body}*{checksum:02X}\r\n")
}

/// Returns the `DDMM.mmmmm` (or `DDDMM.mmmmm`) field and hemisphere letter.
fn encode_coord(deg: f64, is_lat: bool) -> (String, char) {
    let hemisphere = if is_lat {
        if deg >= 0.0 { 'N' } else { 'S' }
    } else if deg >= 0.0 {
        'E'
    } else {
        'W'
    };
    let abs = deg.abs();
    let whole_deg = abs.trunc();
    let minutes = (abs - whole_deg) * 60.0;
    let ddmm = whole_deg * 100.0 + minutes;
    // field width = degree digits (2 for lat, 3 for lon) + 2 minute-integer
    // digits + '.' + 5 fractional digits
    let field = if is_lat { format!("{ddmm:010.5}") } else { format!("{ddmm:011.5}") };
    (field, hemisphere)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PandaFields {
        PandaFields {
            time_hhmmss: "123456.78".into(),
            lat_deg: 48.1173,
            lon_deg: 11.5167,
            fix_quality: 4,
            satellites: 12,
            hdop: 0.9,
            altitude_m: 545.4,
            diff_age_s: 1.0,
            speed_mps: 2.5,
            heading_deg: 123.4,
            imu: None,
        }
    }

    #[test]
    fn encoded_sentence_has_valid_checksum() {
        let sentence = encode(&sample());
        let star = sentence.find('*').unwrap();
        let body = &sentence[1..star];
        let expected: u8 = body.bytes().fold(0, |acc, b| acc ^ b);
        let given = u8::from_str_radix(sentence[star + 1..].trim_end(), 16).unwrap();
        assert_eq!(expected, given);
    }

    #[test]
    fn encoded_sentence_round_trips_through_the_core_parser_format() {
        let sentence = encode(&sample());
        assert!(sentence.starts_with("$PANDA,"));
        let fields: Vec<&str> = sentence.trim_end().trim_start_matches('$').split(',').collect();
        assert_eq!(fields.len(), 13);
        assert_eq!(fields[3], "N");
        assert_eq!(fields[5], "E");
    }

    #[test]
    fn imu_fields_are_appended_when_present() {
        let mut fields = sample();
        fields.imu = Some((1.0, -2.0, 0.05));
        let sentence = encode(&fields);
        let body_fields: Vec<&str> = sentence.trim_end().trim_start_matches('$').split(',').collect();
        assert_eq!(body_fields.len(), 16);
    }

    #[test]
    fn southern_western_hemisphere_letters_are_used_for_negative_degrees() {
        let mut fields = sample();
        fields.lat_deg = -33.8;
        fields.lon_deg = -151.2;
        let sentence = encode(&fields);
        assert!(sentence.contains(",S,"));
        assert!(sentence.contains(",W,"));
    }
}

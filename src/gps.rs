use log::{debug, warn};

use crate::types::{GpsFix, GpsSolution};

const KNOTS_TO_MPS: f64 = 0.514444;

/// Incremental NMEA parser producing `GpsFix` values.
///
/// GGA carries position/quality/satellites, RMC carries speed/course, so a
/// complete fix is emitted on each GGA with the most recent RMC kinematics
/// merged in. Corrupt checksums discard the single sentence and log it;
/// the stream keeps going.
pub struct NmeaParser {
    last_speed_mps: f64,
    last_heading_deg: f64,
    rejected_sentences: u64,
}

impl NmeaParser {
    pub fn new() -> Self {
        Self {
            last_speed_mps: 0.0,
            last_heading_deg: 0.0,
            rejected_sentences: 0,
        }
    }

    pub fn rejected_sentences(&self) -> u64 {
        self.rejected_sentences
    }

    /// Feed one sentence. Returns a fix when the sentence completes one.
    pub fn parse_sentence(&mut self, sentence: &str, timestamp_ns: u64) -> Option<GpsFix> {
        let sentence = sentence.trim();
        let body = match verify_checksum(sentence) {
            Some(body) => body,
            None => {
                self.rejected_sentences += 1;
                warn!("NMEA checksum failure, dropping: {:?}", sentence);
                return None;
            }
        };

        let fields: Vec<&str> = body.split(',').collect();
        match fields.first().copied() {
            Some("GPGGA") | Some("GNGGA") => self.parse_gga(&fields, timestamp_ns),
            Some("GPRMC") | Some("GNRMC") => {
                self.parse_rmc(&fields);
                None
            }
            Some("GPVTG") | Some("GNVTG") => {
                self.parse_vtg(&fields);
                None
            }
            _ => {
                debug!("ignoring NMEA sentence type {:?}", fields.first());
                None
            }
        }
    }

    fn parse_gga(&mut self, fields: &[&str], timestamp_ns: u64) -> Option<GpsFix> {
        if fields.len() < 10 {
            self.rejected_sentences += 1;
            warn!("truncated GGA sentence ({} fields)", fields.len());
            return None;
        }

        let lat = parse_coord(fields[2], fields[3])?;
        let lon = parse_coord(fields[4], fields[5])?;
        let quality: u8 = fields[6].parse().ok()?;
        let satellites: u8 = fields[7].parse().ok()?;
        let hdop: f64 = fields[8].parse().ok()?;
        let alt_m: f64 = fields[9].parse().ok()?;

        Some(GpsFix {
            lat,
            lon,
            alt_m,
            speed_mps: self.last_speed_mps,
            heading_deg: self.last_heading_deg,
            satellites,
            hdop,
            solution: solution_from_quality(quality),
            timestamp_ns,
        })
    }

    fn parse_rmc(&mut self, fields: &[&str]) {
        if fields.len() < 9 || fields[2] != "A" {
            return;
        }
        if let Ok(knots) = fields[7].parse::<f64>() {
            self.last_speed_mps = knots * KNOTS_TO_MPS;
        }
        if let Ok(course) = fields[8].parse::<f64>() {
            self.last_heading_deg = course;
        }
    }

    fn parse_vtg(&mut self, fields: &[&str]) {
        // $GPVTG,course,T,...,speed,N,speed,K
        if fields.len() < 8 {
            return;
        }
        if let Ok(course) = fields[1].parse::<f64>() {
            self.last_heading_deg = course;
        }
        if let Ok(knots) = fields[5].parse::<f64>() {
            self.last_speed_mps = knots * KNOTS_TO_MPS;
        }
    }
}

impl Default for NmeaParser {
    fn default() -> Self {
        Self::new()
    }
}

/// GGA fix-quality field to solution type. Quality 1 is an autonomous fix
/// with no correction applied; 9 is the u-blox SBAS convention.
fn solution_from_quality(quality: u8) -> GpsSolution {
    match quality {
        2 => GpsSolution::Dgps,
        4 => GpsSolution::RtkFixed,
        5 => GpsSolution::RtkFloat,
        9 => GpsSolution::Sbas,
        _ => GpsSolution::None,
    }
}

/// Validate `$...*hh` framing and XOR checksum; returns the body between
/// `$` and `*` on success.
fn verify_checksum(sentence: &str) -> Option<&str> {
    let stripped = sentence.strip_prefix('$')?;
    let (body, checksum_str) = stripped.rsplit_once('*')?;
    let expected = u8::from_str_radix(checksum_str, 16).ok()?;
    let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);
    if actual == expected {
        Some(body)
    } else {
        None
    }
}

/// NMEA ddmm.mmmm / dddmm.mmmm to signed decimal degrees.
fn parse_coord(value: &str, hemisphere: &str) -> Option<f64> {
    if value.len() < 4 {
        return None;
    }
    let dot = value.find('.')?;
    let deg_digits = dot.checked_sub(2)?;
    let degrees: f64 = value[..deg_digits].parse().ok()?;
    let minutes: f64 = value[deg_digits..].parse().ok()?;
    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Some(decimal),
        "S" | "W" => Some(-decimal),
        _ => None,
    }
}

/// Pair primary and secondary antenna fixes for dual-antenna attitude.
/// Rejects pairs whose timestamps differ by more than `max_skew_ns`.
pub fn pair_fixes(primary: &GpsFix, secondary: &GpsFix, max_skew_ns: u64) -> Option<(GpsFix, GpsFix)> {
    let skew = primary.timestamp_ns.abs_diff(secondary.timestamp_ns);
    if skew <= max_skew_ns {
        Some((*primary, *secondary))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn with_checksum(body: &str) -> String {
        let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${}*{:02X}", body, sum)
    }

    #[test]
    fn test_gga_parse() {
        let mut parser = NmeaParser::new();
        let s = with_checksum("GPGGA,123519,4807.038,N,01131.000,E,4,08,0.9,545.4,M,46.9,M,,");
        let fix = parser.parse_sentence(&s, 1_000_000).expect("fix");
        assert_relative_eq!(fix.lat, 48.0 + 7.038 / 60.0, epsilon = 1e-9);
        assert_relative_eq!(fix.lon, 11.0 + 31.0 / 60.0, epsilon = 1e-9);
        assert_eq!(fix.satellites, 8);
        assert_eq!(fix.solution, GpsSolution::RtkFixed);
        assert_relative_eq!(fix.alt_m, 545.4);
    }

    #[test]
    fn test_rmc_speed_merged_into_next_gga() {
        let mut parser = NmeaParser::new();
        let rmc = with_checksum("GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,,");
        assert!(parser.parse_sentence(&rmc, 1).is_none());

        let gga = with_checksum("GPGGA,123520,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        let fix = parser.parse_sentence(&gga, 2).expect("fix");
        assert_relative_eq!(fix.speed_mps, 22.4 * KNOTS_TO_MPS, epsilon = 1e-9);
        assert_relative_eq!(fix.heading_deg, 84.4);
        assert_eq!(fix.solution, GpsSolution::None);
    }

    #[test]
    fn test_corrupt_checksum_discarded() {
        let mut parser = NmeaParser::new();
        let s = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*00";
        assert!(parser.parse_sentence(s, 1).is_none());
        assert_eq!(parser.rejected_sentences(), 1);
    }

    #[test]
    fn test_southern_western_hemispheres() {
        let mut parser = NmeaParser::new();
        let s = with_checksum("GPGGA,123519,3345.500,S,07040.200,W,2,10,1.1,520.0,M,30.0,M,,");
        let fix = parser.parse_sentence(&s, 1).expect("fix");
        assert!(fix.lat < 0.0);
        assert!(fix.lon < 0.0);
        assert_eq!(fix.solution, GpsSolution::Dgps);
    }

    #[test]
    fn test_pair_fixes_skew_gate() {
        let mut parser = NmeaParser::new();
        let s = with_checksum("GPGGA,123519,4807.038,N,01131.000,E,4,08,0.9,545.4,M,46.9,M,,");
        let a = parser.parse_sentence(&s, 1_000_000).unwrap();
        let mut b = a;
        b.timestamp_ns = 1_400_000;
        assert!(pair_fixes(&a, &b, 500_000).is_some());
        b.timestamp_ns = 2_000_000;
        assert!(pair_fixes(&a, &b, 500_000).is_none());
    }
}

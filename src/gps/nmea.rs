// src/gps/nmea.rs
//! NMEA sentence parsing for serial GPS receivers

use crate::tracker::{ProviderKind, Reading};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

const KNOTS_TO_MPS: f64 = 0.514_444;

/// Rough user-equivalent range error used to turn HDOP into meters
const UERE_M: f64 = 5.0;

/// Collects state across sentences and emits one reading per valid RMC.
///
/// GGA sentences only refresh the HDOP used for the accuracy estimate.
#[derive(Debug, Default)]
pub struct NmeaParser {
    hdop: Option<f64>,
}

impl NmeaParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hdop(&self) -> Option<f64> {
        self.hdop
    }

    /// Parse a single NMEA sentence, returning a reading when it completes a fix
    pub fn parse_sentence(&mut self, line: &str, received_at: DateTime<Utc>) -> Option<Reading> {
        // Drop the checksum so the last field parses cleanly
        let body = line.split('*').next().unwrap_or(line);
        let parts: Vec<&str> = body.split(',').collect();

        if line.starts_with("$GPGGA") || line.starts_with("$GNGGA") {
            self.parse_gga(&parts);
            None
        } else if line.starts_with("$GPRMC") || line.starts_with("$GNRMC") {
            self.parse_rmc(&parts, received_at)
        } else {
            None
        }
    }

    /// GGA (Global Positioning System Fix Data)
    fn parse_gga(&mut self, parts: &[&str]) {
        if parts.len() < 15 {
            return;
        }

        // Fix quality 0 means the HDOP is meaningless
        if parts[6] == "0" {
            self.hdop = None;
            return;
        }

        if let Ok(hdop) = parts[8].parse::<f64>() {
            self.hdop = Some(hdop);
        }
    }

    /// RMC (Recommended Minimum Course)
    fn parse_rmc(&self, parts: &[&str], received_at: DateTime<Utc>) -> Option<Reading> {
        if parts.len() < 10 {
            return None;
        }

        // Status A = valid, V = void
        if parts[2] != "A" {
            return None;
        }

        let latitude = parse_coordinate(parts[3], parts[4], "S")?;
        let longitude = parse_coordinate(parts[5], parts[6], "W")?;

        let speed = parts[7].parse::<f64>().map(|knots| knots * KNOTS_TO_MPS).unwrap_or(0.0);
        let course = parts[8].parse::<f64>().unwrap_or(0.0);
        let time = parse_datetime(parts[9], parts[1]).unwrap_or(received_at);

        Some(
            Reading::new(ProviderKind::Gps, latitude, longitude, time)
                .with_accuracy(self.hdop.map_or(0.0, |hdop| hdop * UERE_M))
                .with_motion(course, speed),
        )
    }
}

/// Convert `ddmm.mmmm` plus hemisphere into signed decimal degrees
fn parse_coordinate(value: &str, hemisphere: &str, negative: &str) -> Option<f64> {
    if value.is_empty() || hemisphere.is_empty() {
        return None;
    }

    let raw = value.parse::<f64>().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;

    Some(if hemisphere == negative { -decimal } else { decimal })
}

/// Combine RMC `ddmmyy` and `hhmmss.ss` fields
fn parse_datetime(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%d%m%y").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H%M%S%.f").ok()?;
    Some(date.and_time(time).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_gga_sets_hdop_only() {
        let mut parser = NmeaParser::new();
        let gga = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

        assert!(parser.parse_sentence(gga, now()).is_none());
        assert_eq!(parser.hdop(), Some(0.9));
    }

    #[test]
    fn test_rmc_emits_reading() {
        let mut parser = NmeaParser::new();
        parser.parse_sentence("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47", now());
        let rmc = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";

        let reading = parser.parse_sentence(rmc, now()).unwrap();

        assert_eq!(reading.provider, ProviderKind::Gps);
        assert!((reading.latitude - 48.1173).abs() < 1e-4);
        assert!((reading.longitude - 11.516_666).abs() < 1e-4);
        // 22.4 knots in m/s
        assert!((reading.speed - 11.52).abs() < 0.01);
        assert_eq!(reading.bearing, 84.4);
        assert!((reading.accuracy - 4.5).abs() < 1e-9);
        assert_eq!(reading.time, Utc.with_ymd_and_hms(1994, 3, 23, 12, 35, 19).unwrap());
    }

    #[test]
    fn test_southern_western_hemispheres() {
        let mut parser = NmeaParser::new();
        let rmc = "$GNRMC,010203.00,A,3351.000,S,15112.000,W,0.0,0.0,010124,,,A*00";

        let reading = parser.parse_sentence(rmc, now()).unwrap();
        assert!((reading.latitude + 33.85).abs() < 1e-9);
        assert!((reading.longitude + 151.2).abs() < 1e-9);
    }

    #[test]
    fn test_void_rmc_is_ignored() {
        let mut parser = NmeaParser::new();
        let rmc = "$GPRMC,123519,V,,,,,,,230394,,*00";
        assert!(parser.parse_sentence(rmc, now()).is_none());
    }

    #[test]
    fn test_invalid_sentence() {
        let mut parser = NmeaParser::new();
        assert!(parser.parse_sentence("$INVALID,123,456", now()).is_none());
        assert!(parser.hdop().is_none());
    }
}

use std::{fs, path::PathBuf};

use log::{debug, error, warn};

use super::{DType, Field, Reading, Sensor, Value, MISSING};

const FIELDS: &[Field] = &[Field::new("temperature", DType::Float)];

/// Raw value the chip reports after a power-on reset instead of a conversion.
const POWER_ON_RESET: &str = "85000";

/// DS18B20/DS18S20 1-wire thermometer, read through the kernel's `w1_slave` file.
#[derive(Debug, Clone)]
pub struct Ds18x20 {
    path: PathBuf,
}

impl Ds18x20 {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Sensor for Ds18x20 {
    fn dtypes(&self) -> &'static [Field] {
        FIELDS
    }

    fn read(&mut self) -> Reading {
        debug!("DS18x20: reading {}", self.path.display());
        let temperature = match fs::read_to_string(&self.path) {
            Ok(payload) => parse_payload(&payload),
            Err(err) => {
                error!("DS18x20: cannot read {}: {err}", self.path.display());
                MISSING
            }
        };
        Reading::from([("temperature".to_string(), Value::Float(temperature))])
    }
}

/// Temperature in °C from a `w1_slave` payload, or [`MISSING`] when the payload
/// fails its CRC, carries the power-on reset value or cannot be parsed.
///
/// ```text
/// 2d 00 4b 46 ff ff 03 10 dd : crc=dd YES
/// 2d 00 4b 46 ff ff 03 10 dd t=22562
/// ```
pub fn parse_payload(payload: &str) -> f64 {
    let mut lines = payload.lines();
    let (Some(crc_line), Some(data_line)) = (lines.next(), lines.next()) else {
        warn!("DS18x20: truncated payload");
        return MISSING;
    };

    if !crc_line.contains("YES") {
        warn!("DS18x20: invalid CRC");
        return MISSING;
    }

    let raw = data_line
        .split(' ')
        .last()
        .and_then(|token| token.trim().strip_prefix("t="));
    let Some(raw) = raw else {
        warn!("DS18x20: no temperature token");
        return MISSING;
    };

    if raw == POWER_ON_RESET {
        warn!("DS18x20: T=85000 error occurred");
        return MISSING;
    }

    match raw.parse::<i64>() {
        Ok(milli) => milli as f64 / 1000.0,
        Err(err) => {
            warn!("DS18x20: unparsable temperature '{raw}': {err}");
            MISSING
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const VALID: &str = "2d 00 4b 46 ff ff 03 10 dd : crc=dd YES\n\
                         2d 00 4b 46 ff ff 03 10 dd t=22562\n";
    const BAD_CRC: &str = "2d 00 4b 46 ff ff 03 10 dd : crc=fa NO\n\
                           2d 00 4b 46 ff ff 03 10 dd t=22562\n";
    const RESET: &str = "2d 00 4b 46 ff ff 03 10 dd : crc=dd YES\n\
                         2d 00 4b 46 ff ff 03 10 dd t=85000\n";

    fn read_file(payload: &str) -> f64 {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(payload.as_bytes()).unwrap();
        let mut sensor = Ds18x20::new(file.path());
        sensor.read()["temperature"].as_f64().unwrap()
    }

    #[test]
    fn parses_temperature() {
        assert_eq!(parse_payload(VALID), 22.562);
        assert_eq!(read_file(VALID), 22.562);
    }

    #[test]
    fn invalid_crc_is_missing() {
        assert!(parse_payload(BAD_CRC).is_nan());
        assert!(read_file(BAD_CRC).is_nan());
    }

    #[test]
    fn power_on_reset_is_missing() {
        assert!(parse_payload(RESET).is_nan());
        assert!(read_file(RESET).is_nan());
    }

    #[test]
    fn negative_temperatures_parse() {
        let payload = "aa : crc=aa YES\naa t=-1250\n";
        assert_eq!(parse_payload(payload), -1.25);
    }

    #[test]
    fn garbage_is_missing() {
        assert!(parse_payload("").is_nan());
        assert!(parse_payload("crc=dd YES\n").is_nan());
        assert!(parse_payload("crc=dd YES\nt=abc\n").is_nan());
        assert!(parse_payload("crc=dd YES\n2d 00 4b\n").is_nan());
    }

    #[test]
    fn unreadable_file_is_missing() {
        let mut sensor = Ds18x20::new("/nonexistent/w1_slave");
        assert!(sensor.read()["temperature"].is_missing());
    }
}

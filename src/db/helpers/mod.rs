use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{StationError, StationResult};

/// Fixed-width RFC 3339 so that text comparison orders timestamps.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str, field: &str) -> StationResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StationError::storage(format!("failed to parse {field} '{value}': {err}")))
}

/// Table and column names are spliced into SQL, so only plain identifiers pass.
pub fn validate_ident(name: &str) -> StationResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StationError::config(format!("invalid identifier '{name}'")))
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn timestamps_round_trip_at_microsecond_precision() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        let text = format_timestamp(&ts);
        assert_eq!(text, "2024-05-01T12:30:00.123456Z");
        assert_eq!(parse_timestamp(&text, "time").unwrap(), ts);
    }

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1);
        assert!(format_timestamp(&early) < format_timestamp(&late));
    }

    #[test]
    fn identifiers() {
        assert!(validate_ident("dummy0_table").is_ok());
        assert!(validate_ident("_t").is_ok());
        assert!(validate_ident("0table").is_err());
        assert!(validate_ident("drop table;").is_err());
        assert!(validate_ident("").is_err());
        assert!(validate_ident("a\"b").is_err());
    }
}

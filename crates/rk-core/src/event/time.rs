use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Parse an event timestamp: RFC 3339, or `YYYY-MM-DD HH:MM:SS[.fff]`
/// taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Format epoch milliseconds as RFC 3339 with millisecond precision and `Z`.
/// Out-of-range values fall back to the raw number.
pub fn format_millis(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => format_instant(&dt),
        None => ms.to_string(),
    }
}

pub fn format_instant(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_offset() {
        let dt = parse_timestamp("2024-03-01T10:00:30+01:00").unwrap();
        assert_eq!(format_instant(&dt), "2024-03-01T09:00:30.000Z");
    }

    #[test]
    fn parses_space_separated_as_utc() {
        let dt = parse_timestamp("2024-03-01 10:00:30").unwrap();
        assert_eq!(format_instant(&dt), "2024-03-01T10:00:30.000Z");
        let dt = parse_timestamp("2024-03-01 10:00:30.250").unwrap();
        assert_eq!(dt.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2024-13-01 10:00:00").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn millis_roundtrip_format() {
        let dt = parse_timestamp("2024-03-01T10:01:00Z").unwrap();
        assert_eq!(format_millis(dt.timestamp_millis()), "2024-03-01T10:01:00.000Z");
    }
}

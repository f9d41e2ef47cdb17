//! Timestamp encoding for TEXT columns.
//!
//! Every timestamp is written as fixed-width UTC with nanoseconds, so string
//! comparison in SQL orders the same way as time does.

use chrono::{DateTime, Utc};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(&Utc::now())
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_width() {
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(format_timestamp(&t), "2024-03-05T07:08:09.000000000Z");
    }

    #[test]
    fn test_roundtrip() {
        let t = Utc::now();
        assert_eq!(parse_timestamp(&format_timestamp(&t)), Some(t));
    }

    #[test]
    fn test_lexical_order_matches_time() {
        let early = Utc.with_ymd_and_hms(2024, 3, 5, 23, 59, 59).unwrap();
        let late = early + chrono::Duration::nanoseconds(1);
        assert!(format_timestamp(&early) < format_timestamp(&late));
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}

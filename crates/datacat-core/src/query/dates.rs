//! Date-string parsing for timestamp comparisons.
//!
//! Five formats are accepted; anything else falls through to string
//! binding and the database decides.

use chrono::{NaiveDate, NaiveDateTime};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a user-supplied date string into a UTC-naive timestamp.
///
/// Surrounding single or double quotes are tolerated. A date without a
/// time component means midnight.
pub fn parse_date_string(input: &str) -> Option<NaiveDateTime> {
    let trimmed = input.trim().trim_matches(|c| c == '"' || c == '\'');

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_only() {
        let ts = parse_date_string("2025-07-20").unwrap();
        assert_eq!(ts.to_string(), "2025-07-20 00:00:00");
    }

    #[test]
    fn test_date_time_variants() {
        assert!(parse_date_string("2025-07-20 15:30:00").is_some());
        assert!(parse_date_string("2025-07-20T15:30:00").is_some());
        assert!(parse_date_string("2025-07-20 15:30").is_some());
        assert!(parse_date_string("2025-07-20T15:30").is_some());
    }

    #[test]
    fn test_quoted_input() {
        assert!(parse_date_string("\"2025-07-20\"").is_some());
        assert!(parse_date_string("'2025-07-20 15:30'").is_some());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_date_string("not-a-date").is_none());
        assert!(parse_date_string("20/07/2025").is_none());
        assert!(parse_date_string("").is_none());
    }
}

pub mod init;
pub mod keys;
pub mod log;
pub mod policy;
pub mod status;
pub mod trust;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use keytrust::core::errors::{KeyTrustError, Result};

/// Parse a `YYYY-MM-DD` date as midnight UTC.
pub fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    let invalid = || KeyTrustError::InvalidArgument {
        detail: format!("Invalid date format: '{s}'. Expected ISO 8601 (YYYY-MM-DD), e.g. 2026-01-15"),
    };
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid())?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
    Ok(Utc.from_utc_datetime(&midnight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso_dates_at_midnight() {
        let at = parse_date("2026-01-15").unwrap();
        assert_eq!(at.to_rfc3339(), "2026-01-15T00:00:00+00:00");
    }

    #[test]
    fn rejects_other_formats() {
        assert!(parse_date("15/01/2026").is_err());
        assert!(parse_date("2026-13-01").is_err());
    }
}

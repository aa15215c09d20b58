use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Epoch values above this are treated as milliseconds rather than seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Get the last day of a given month.
pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    first_of_next.pred_opt()
}

/// Get the quarter (1-4) for a given date.
pub fn quarter_of(d: NaiveDate) -> u8 {
    ((d.month() - 1) / 3 + 1) as u8
}

/// Midnight UTC at the start of `d`.
pub fn start_of_day(d: NaiveDate) -> DateTime<Utc> {
    d.and_time(NaiveTime::MIN).and_utc()
}

/// Last representable instant of `d` in UTC.
pub fn end_of_day(d: NaiveDate) -> DateTime<Utc> {
    start_of_day(d) + Duration::days(1) - Duration::nanoseconds(1)
}

/// Parse a timestamp given as text.
///
/// Accepts RFC 3339 (`2021-01-05T10:00:00Z`, `...+02:00`), the space-separated
/// form databases emit (`2021-01-05 10:00:00+00`), naive date-times (read as
/// UTC), bare dates (midnight UTC) and epoch numbers in a string.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty timestamp".into());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(ndt.and_utc());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(start_of_day(d));
    }
    if let Ok(n) = s.parse::<f64>() {
        return timestamp_from_epoch(n);
    }

    Err(format!("unrecognized timestamp: {s}"))
}

/// Convert an epoch number (seconds, or milliseconds when large) to UTC.
pub fn timestamp_from_epoch(n: f64) -> Result<DateTime<Utc>, String> {
    if !n.is_finite() {
        return Err(format!("non-finite epoch value: {n}"));
    }
    let parsed = if n.abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(n as i64)
    } else {
        let secs = n.floor() as i64;
        let nanos = ((n - n.floor()) * 1e9) as u32;
        DateTime::from_timestamp(secs, nanos)
    };
    parsed.ok_or_else(|| format!("epoch value out of range: {n}"))
}

/// Parse a date-only string (`YYYY-MM-DD`), returning None for anything else.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Elapsed time from `earlier` to `later` in fractional days.
/// Negative when `later` precedes `earlier`.
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 86_400_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(
            last_day_of_month(2025, 1),
            NaiveDate::from_ymd_opt(2025, 1, 31)
        );
        assert_eq!(
            last_day_of_month(2025, 2),
            NaiveDate::from_ymd_opt(2025, 2, 28)
        );
        assert_eq!(
            last_day_of_month(2024, 2),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        ); // Leap year
        assert_eq!(
            last_day_of_month(2025, 12),
            NaiveDate::from_ymd_opt(2025, 12, 31)
        );
    }

    #[test]
    fn test_quarter_of() {
        assert_eq!(quarter_of(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()), 1);
        assert_eq!(quarter_of(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()), 2);
        assert_eq!(quarter_of(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()), 3);
        assert_eq!(
            quarter_of(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()),
            4
        );
    }

    #[test]
    fn test_parse_rfc3339_converts_to_utc() {
        let ts = parse_timestamp("2021-01-05T23:30:00-02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2021, 1, 6, 1, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_database_form() {
        let ts = parse_timestamp("2021-01-05 10:00:00+00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2021, 1, 5, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_is_utc() {
        let ts = parse_timestamp("2021-01-05 10:15:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2021, 1, 5, 10, 15, 0).unwrap());
        let ts = parse_timestamp("2021-01-05T10:15:00.250").unwrap();
        assert_eq!(ts.nanosecond(), 250_000_000);
    }

    #[test]
    fn test_parse_bare_date() {
        let ts = parse_timestamp("2021-02-01").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2021, 2, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_epoch_seconds_and_millis() {
        let secs = parse_timestamp("1609459200").unwrap();
        let millis = parse_timestamp("1609459200000").unwrap();
        assert_eq!(secs, Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(secs, millis);
    }

    #[test]
    fn test_negative_fractional_epoch() {
        let ts = timestamp_from_epoch(-1.5).unwrap();
        assert_eq!(ts.timestamp_millis(), -1500);
        assert_eq!(timestamp_from_epoch(2.25).unwrap().timestamp_millis(), 2250);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_timestamp("").is_err());
        assert!(parse_timestamp("   ").is_err());
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("2021-13-45").is_err());
    }

    #[test]
    fn test_end_of_day() {
        let d = NaiveDate::from_ymd_opt(2021, 1, 10).unwrap();
        let end = end_of_day(d);
        assert_eq!(end.date_naive(), d);
        assert_eq!(end + Duration::nanoseconds(1), start_of_day(d.succ_opt().unwrap()));
    }

    #[test]
    fn test_days_between() {
        let a = Utc.with_ymd_and_hms(2021, 1, 5, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2021, 1, 10, 12, 0, 0).unwrap();
        assert_eq!(days_between(a, b), 5.5);
        assert_eq!(days_between(b, a), -5.5);
    }
}

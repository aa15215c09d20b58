use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Time unit used to bucket events.
///
/// Buckets are computed on the UTC calendar date of a timestamp:
/// - `Day`: the date itself
/// - `Week`: the Monday starting the ISO week containing the date
/// - `Month`: the first of the month
/// - `Year`: January 1st
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Year,
}

/// Spacing between axis ticks for a granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickInterval {
    Millis(u64),
    Months(u32),
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
        Granularity::Year,
    ];

    /// Parse a single-letter interval token (`D`, `W`, `M`, `Y`) or its
    /// spelled-out name. Anything else is a contract violation.
    pub fn parse(token: &str) -> Result<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "d" | "day" => Ok(Granularity::Day),
            "w" | "week" => Ok(Granularity::Week),
            "m" | "month" => Ok(Granularity::Month),
            "y" | "year" => Ok(Granularity::Year),
            _ => Err(Error::InvalidGranularity(token.to_string())),
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Granularity::Day => "D",
            Granularity::Week => "W",
            Granularity::Month => "M",
            Granularity::Year => "Y",
        }
    }

    /// Axis title for charts keyed by this granularity.
    pub fn axis_title(&self) -> &'static str {
        match self {
            Granularity::Day => "Day",
            Granularity::Week => "Week",
            Granularity::Month => "Month",
            Granularity::Year => "Year",
        }
    }

    pub fn tick_interval(&self) -> TickInterval {
        match self {
            Granularity::Day => TickInterval::Millis(86_400_000),
            Granularity::Week => TickInterval::Millis(604_800_000),
            Granularity::Month => TickInterval::Months(1),
            Granularity::Year => TickInterval::Months(12),
        }
    }

    /// Truncate a date to the start of its bucket.
    pub fn bucket_start(&self, d: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Day => d,
            Granularity::Week => d - Duration::days(d.weekday().num_days_from_monday() as i64),
            Granularity::Month => d - Duration::days(d.day0() as i64),
            Granularity::Year => d - Duration::days(d.ordinal0() as i64),
        }
    }

    /// Bucket containing a timestamp, evaluated in UTC.
    pub fn bucket_of(&self, ts: DateTime<Utc>) -> NaiveDate {
        self.bucket_start(ts.date_naive())
    }

    /// Start of the bucket following `start`. `start` must already be a
    /// bucket start. Returns None at the end of the representable calendar.
    pub fn next_bucket(&self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            Granularity::Day => start.succ_opt(),
            Granularity::Week => start.checked_add_signed(Duration::days(7)),
            Granularity::Month => start.checked_add_months(Months::new(1)),
            Granularity::Year => start.checked_add_months(Months::new(12)),
        }
    }

    /// Display label for a bucket: `YYYY-MM-DD` for days and weeks,
    /// `YYYY-MM-01` for months, `YYYY-01-01` for years.
    pub fn label(&self, bucket: NaiveDate) -> String {
        let fmt = match self {
            Granularity::Day | Granularity::Week => "%Y-%m-%d",
            Granularity::Month => "%Y-%m-01",
            Granularity::Year => "%Y-01-01",
        };
        bucket.format(fmt).to_string()
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Granularity::parse(s)
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!(Granularity::parse("D").unwrap(), Granularity::Day);
        assert_eq!(Granularity::parse("w").unwrap(), Granularity::Week);
        assert_eq!(Granularity::parse("M").unwrap(), Granularity::Month);
        assert_eq!(Granularity::parse(" year ").unwrap(), Granularity::Year);
    }

    #[test]
    fn test_parse_invalid() {
        match Granularity::parse("Q") {
            Err(Error::InvalidGranularity(t)) => assert_eq!(t, "Q"),
            other => panic!("expected InvalidGranularity, got {other:?}"),
        }
        assert!(Granularity::parse("").is_err());
    }

    #[test]
    fn test_week_anchors_to_monday() {
        // 2021-01-10 is a Sunday; its ISO week starts Monday 2021-01-04.
        assert_eq!(Granularity::Week.bucket_start(date(2021, 1, 10)), date(2021, 1, 4));
        assert_eq!(Granularity::Week.bucket_start(date(2021, 1, 4)), date(2021, 1, 4));
        assert_eq!(Granularity::Week.bucket_start(date(2021, 1, 11)), date(2021, 1, 11));
        for g in [date(2020, 12, 31), date(2024, 2, 29), date(2023, 1, 1)] {
            assert_eq!(Granularity::Week.bucket_start(g).weekday(), Weekday::Mon);
        }
    }

    #[test]
    fn test_week_crosses_year_boundary() {
        // Friday 2021-01-01 belongs to the week starting Monday 2020-12-28.
        assert_eq!(Granularity::Week.bucket_start(date(2021, 1, 1)), date(2020, 12, 28));
    }

    #[test]
    fn test_month_and_year_start() {
        assert_eq!(Granularity::Month.bucket_start(date(2024, 2, 29)), date(2024, 2, 1));
        assert_eq!(Granularity::Year.bucket_start(date(2024, 12, 31)), date(2024, 1, 1));
        assert_eq!(Granularity::Day.bucket_start(date(2024, 12, 31)), date(2024, 12, 31));
    }

    #[test]
    fn test_bucket_of_uses_utc_date() {
        let ts = chrono::FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2021, 1, 31, 22, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        // 22:00 at UTC-5 is 03:00 on Feb 1st in UTC.
        assert_eq!(Granularity::Month.bucket_of(ts), date(2021, 2, 1));
    }

    #[test]
    fn test_next_bucket() {
        assert_eq!(Granularity::Day.next_bucket(date(2021, 2, 28)), Some(date(2021, 3, 1)));
        assert_eq!(Granularity::Week.next_bucket(date(2021, 12, 27)), Some(date(2022, 1, 3)));
        assert_eq!(Granularity::Month.next_bucket(date(2021, 12, 1)), Some(date(2022, 1, 1)));
        assert_eq!(Granularity::Year.next_bucket(date(2021, 1, 1)), Some(date(2022, 1, 1)));
    }

    #[test]
    fn test_labels() {
        assert_eq!(Granularity::Month.label(date(2021, 3, 1)), "2021-03-01");
        assert_eq!(Granularity::Year.label(date(2021, 1, 1)), "2021-01-01");
        assert_eq!(Granularity::Week.label(date(2021, 1, 4)), "2021-01-04");
    }

    #[test]
    fn test_tick_intervals() {
        assert_eq!(Granularity::Day.tick_interval(), TickInterval::Millis(86_400_000));
        assert_eq!(Granularity::Year.tick_interval(), TickInterval::Months(12));
    }
}

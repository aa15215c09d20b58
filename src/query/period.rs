use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;

use crate::date_util::{last_day_of_month, quarter_of};
use crate::error::{Error, Result};
use crate::query::range::DateRange;

static RE_QUARTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-Q([1-4])$").unwrap());
static RE_WEEK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-W(\d{1,2})$").unwrap());
static RE_MONTH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").unwrap());

/// Shorthand for a reporting window, resolved to a [`DateRange`] on
/// creation dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Period {
    Year(i32),
    Quarter(i32, u8),
    Month(i32, u8),
    Week(i32, u8),
    Rolling(u32, NaiveDate),
    YearToDate(i32, NaiveDate),
    QuarterToDate(i32, u8, NaiveDate),
    MonthToDate(i32, u8, NaiveDate),
}

impl Period {
    /// Parse a period string relative to the local date.
    pub fn parse(s: &str) -> Result<Self> {
        Self::parse_as_of(s, chrono::Local::now().date_naive())
    }

    /// Parse a period string.
    ///
    /// Supported formats:
    /// - `2025`: year
    /// - `2025-Q1`: quarter
    /// - `2025-01`: month
    /// - `2025-W05`: ISO week
    /// - `30d`: rolling last N days, ending `today`
    /// - `ytd`, `qtd`, `mtd`: to date, ending `today`
    pub fn parse_as_of(s: &str, today: NaiveDate) -> Result<Self> {
        let s = s.trim();

        match s.to_lowercase().as_str() {
            "ytd" => return Ok(Period::YearToDate(today.year(), today)),
            "qtd" => return Ok(Period::QuarterToDate(today.year(), quarter_of(today), today)),
            "mtd" => return Ok(Period::MonthToDate(today.year(), today.month() as u8, today)),
            _ => {}
        }

        // Rolling: "30d", "7d", etc.
        if let Some(n) = s.strip_suffix(['d', 'D']) {
            if let Ok(n) = n.parse::<u32>() {
                if n == 0 {
                    return Err(Error::PeriodParse(format!("rolling window must be at least 1 day: {s}")));
                }
                return Ok(Period::Rolling(n, today));
            }
        }

        if s.len() == 4 {
            if let Ok(year) = s.parse::<i32>() {
                return Ok(Period::Year(year));
            }
        }

        if let Some(caps) = RE_QUARTER.captures(s) {
            let year = parse_capture(&caps[1], s)?;
            let q = parse_capture(&caps[2], s)?;
            return Ok(Period::Quarter(year, q));
        }

        if let Some(caps) = RE_WEEK.captures(s) {
            let year = parse_capture(&caps[1], s)?;
            let week: u8 = parse_capture(&caps[2], s)?;
            if NaiveDate::from_isoywd_opt(year, week as u32, Weekday::Mon).is_some() {
                return Ok(Period::Week(year, week));
            }
        }

        if let Some(caps) = RE_MONTH.captures(s) {
            let year = parse_capture(&caps[1], s)?;
            let month: u8 = parse_capture(&caps[2], s)?;
            if (1..=12).contains(&month) {
                return Ok(Period::Month(year, month));
            }
        }

        Err(Error::PeriodParse(format!("unrecognized period: {s}")))
    }

    /// Convert to a canonical key string.
    pub fn to_key(&self) -> String {
        match self {
            Period::Year(y) => format!("{y}"),
            Period::Quarter(y, q) => format!("{y}-Q{q}"),
            Period::Month(y, m) => format!("{y}-{m:02}"),
            Period::Week(y, w) => format!("{y}-W{w:02}"),
            Period::Rolling(n, _) => format!("{n}d"),
            Period::YearToDate(y, _) => format!("{y}-ytd"),
            Period::QuarterToDate(y, q, _) => format!("{y}-Q{q}-td"),
            Period::MonthToDate(y, m, _) => format!("{y}-{m:02}-td"),
        }
    }

    /// Get the date range (inclusive start, inclusive end) for this period.
    pub fn date_range(&self) -> Result<(NaiveDate, NaiveDate)> {
        let invalid = || Error::PeriodParse(format!("period out of range: {}", self.to_key()));
        let ymd = |y: i32, m: u32, d: u32| NaiveDate::from_ymd_opt(y, m, d).ok_or_else(invalid);

        let range = match self {
            Period::Year(y) => (ymd(*y, 1, 1)?, ymd(*y, 12, 31)?),
            Period::Quarter(y, q) => {
                let start_month = (*q as u32 - 1) * 3 + 1;
                let end_month = *q as u32 * 3;
                (
                    ymd(*y, start_month, 1)?,
                    last_day_of_month(*y, end_month).ok_or_else(invalid)?,
                )
            }
            Period::Month(y, m) => (
                ymd(*y, *m as u32, 1)?,
                last_day_of_month(*y, *m as u32).ok_or_else(invalid)?,
            ),
            Period::Week(y, w) => {
                let start = NaiveDate::from_isoywd_opt(*y, *w as u32, Weekday::Mon)
                    .ok_or_else(invalid)?;
                (start, start + Duration::days(6))
            }
            Period::Rolling(n, as_of) => (
                as_of
                    .checked_sub_signed(Duration::days(*n as i64 - 1))
                    .ok_or_else(invalid)?,
                *as_of,
            ),
            Period::YearToDate(y, as_of) => (ymd(*y, 1, 1)?, *as_of),
            Period::QuarterToDate(y, q, as_of) => {
                let start_month = (*q as u32 - 1) * 3 + 1;
                (ymd(*y, start_month, 1)?, *as_of)
            }
            Period::MonthToDate(y, m, as_of) => (ymd(*y, *m as u32, 1)?, *as_of),
        };
        Ok(range)
    }

    /// Creation-date filter covering this period.
    pub fn to_range(&self) -> Result<DateRange> {
        let (start, end) = self.date_range()?;
        Ok(DateRange::between_dates(start, end))
    }
}

fn parse_capture<T: std::str::FromStr>(cap: &str, input: &str) -> Result<T> {
    cap.parse()
        .map_err(|_| Error::PeriodParse(format!("invalid number in period: {input}")))
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 7).unwrap()
    }

    #[test]
    fn test_parse_year_quarter_month_week() {
        assert_eq!(Period::parse_as_of("2025", today()).unwrap(), Period::Year(2025));
        assert_eq!(Period::parse_as_of("2025-Q4", today()).unwrap(), Period::Quarter(2025, 4));
        assert_eq!(Period::parse_as_of("2025-01", today()).unwrap(), Period::Month(2025, 1));
        assert_eq!(Period::parse_as_of("2025-W05", today()).unwrap(), Period::Week(2025, 5));
        assert_eq!(Period::parse_as_of("2025-W1", today()).unwrap(), Period::Week(2025, 1));
    }

    #[test]
    fn test_parse_rolling_and_to_date() {
        assert_eq!(Period::parse_as_of("30d", today()).unwrap(), Period::Rolling(30, today()));
        assert_eq!(Period::parse_as_of("YTD", today()).unwrap(), Period::YearToDate(2026, today()));
        assert_eq!(
            Period::parse_as_of("qtd", today()).unwrap(),
            Period::QuarterToDate(2026, 1, today())
        );
        assert_eq!(
            Period::parse_as_of("mtd", today()).unwrap(),
            Period::MonthToDate(2026, 2, today())
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Period::parse_as_of("garbage", today()).is_err());
        assert!(Period::parse_as_of("2025-Q5", today()).is_err());
        assert!(Period::parse_as_of("2025-13", today()).is_err());
        assert!(Period::parse_as_of("2025-W60", today()).is_err());
        assert!(Period::parse_as_of("0d", today()).is_err());
    }

    #[test]
    fn test_to_key() {
        assert_eq!(Period::Year(2025).to_key(), "2025");
        assert_eq!(Period::Quarter(2025, 1).to_key(), "2025-Q1");
        assert_eq!(Period::Month(2025, 1).to_key(), "2025-01");
        assert_eq!(Period::Week(2025, 5).to_key(), "2025-W05");
        assert_eq!(Period::Rolling(30, today()).to_key(), "30d");
    }

    #[test]
    fn test_date_ranges() {
        let (s, e) = Period::Quarter(2025, 2).date_range().unwrap();
        assert_eq!(s, NaiveDate::from_ymd_opt(2025, 4, 1).unwrap());
        assert_eq!(e, NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());

        let (s, e) = Period::Month(2024, 2).date_range().unwrap();
        assert_eq!(s, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(e, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let (s, e) = Period::Week(2025, 1).date_range().unwrap();
        assert_eq!(s.weekday(), Weekday::Mon);
        assert_eq!((e - s).num_days(), 6);

        let (s, e) = Period::Rolling(7, today()).date_range().unwrap();
        assert_eq!(s, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(e, today());
    }

    #[test]
    fn test_rolling_window_past_calendar_start() {
        let period = Period::parse_as_of("100000000d", today()).unwrap();
        assert!(matches!(period.date_range(), Err(Error::PeriodParse(_))));
        assert!(matches!(period.to_range(), Err(Error::PeriodParse(_))));
    }

    #[test]
    fn test_to_range_covers_whole_days() {
        let r = Period::Month(2021, 1).to_range().unwrap();
        assert!(r.contains(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()));
        assert!(r.contains(Utc.with_ymd_and_hms(2021, 1, 31, 23, 59, 59).unwrap()));
        assert!(!r.contains(Utc.with_ymd_and_hms(2021, 2, 1, 0, 0, 0).unwrap()));
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::date_util::{end_of_day, parse_date, parse_timestamp, start_of_day};
use crate::error::{Error, Result};

/// Inclusive filter on an event's creation timestamp. Missing bounds are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Whole days from `start` through `end`, both inclusive.
    pub fn between_dates(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start_of_day(start)),
            end: Some(end_of_day(end)),
        }
    }

    /// Build a range from optional date-picker bounds.
    ///
    /// Empty strings count as absent. A date-only end bound covers the
    /// whole day, so an event created at 18:00 on the end date is included.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let start = match start.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Some(match parse_date(s) {
                Some(d) => start_of_day(d),
                None => parse_timestamp(s).map_err(|e| Error::InvalidDate(format!("start {s}: {e}")))?,
            }),
            None => None,
        };
        let end = match end.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Some(match parse_date(s) {
                Some(d) => end_of_day(d),
                None => parse_timestamp(s).map_err(|e| Error::InvalidDate(format!("end {s}: {e}")))?,
            }),
            None => None,
        };

        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(Error::InvalidDate(format!(
                    "start {} is after end {}",
                    s.to_rfc3339(),
                    e.to_rfc3339()
                )));
            }
        }
        Ok(Self { start, end })
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_bound = |b: Option<DateTime<Utc>>| {
            b.map(|t| t.to_rfc3339()).unwrap_or_else(|| "..".to_string())
        };
        write!(f, "[{}, {}]", fmt_bound(self.start), fmt_bound(self.end))
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::events::MalformedEvent;
use crate::query::Granularity;

/// Unit of every duration value produced by this crate.
pub const DURATION_UNIT: &str = "days";

/// One point of a bucketed series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    /// First day of the bucket.
    pub bucket: NaiveDate,
    pub value: f64,
}

/// A request whose terminal timestamp precedes its creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NegativeDuration {
    pub id: String,
    pub created: DateTime<Utc>,
    pub terminal: DateTime<Utc>,
    pub days: f64,
}

/// Mean and median duration per bucket.
///
/// `mean` and `median` share the same buckets in the same order. Buckets
/// without any completed request are absent, not zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationSeries {
    pub metric: String,
    pub granularity: Granularity,
    pub unit: &'static str,
    pub mean: Vec<SeriesPoint>,
    pub median: Vec<SeriesPoint>,
    /// Number of durations behind each bucket.
    pub samples: Vec<u64>,
    /// Requests in range that have not reached the terminal state.
    pub excluded_open: u64,
    /// Negative durations, left out of `mean` and `median`.
    pub anomalies: Vec<NegativeDuration>,
}

/// Summary statistics over a set of durations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DurationStats {
    pub count: u64,
    pub mean_days: Option<f64>,
    pub median_days: Option<f64>,
    pub p90_days: Option<f64>,
    pub min_days: Option<f64>,
    pub max_days: Option<f64>,
}

/// A single request's duration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationSample {
    pub id: String,
    pub created: DateTime<Utc>,
    pub days: f64,
}

/// Raw per-request durations, for box or violin plots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub metric: String,
    pub unit: &'static str,
    /// In creation order.
    pub samples: Vec<DurationSample>,
    pub stats: DurationStats,
    pub excluded_open: u64,
    pub anomalies: Vec<NegativeDuration>,
}

/// Requests created, closed and merged within one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    pub bucket: NaiveDate,
    pub created: u64,
    pub closed: u64,
    pub merged: u64,
}

/// Either a computed value or an explicit "nothing to show".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Outcome<T> {
    /// No events remained after filtering.
    NoData,
    Data(T),
}

impl<T> Outcome<T> {
    pub fn is_no_data(&self) -> bool {
        matches!(self, Outcome::NoData)
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Outcome::Data(d) => Some(d),
            Outcome::NoData => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Outcome::Data(d) => Some(d),
            Outcome::NoData => None,
        }
    }
}

/// What every metric call returns: the outcome plus the rows it had to drop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport<T> {
    pub outcome: Outcome<T>,
    pub dropped: Vec<MalformedEvent>,
}

impl<T> MetricReport<T> {
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }
}

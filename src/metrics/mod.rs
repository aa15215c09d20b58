pub mod spec;
pub mod types;

pub use spec::{BucketAnchor, MetricSpec, MetricSpecBuilder};
pub use types::*;

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::date_util::{days_between, start_of_day};
use crate::error::Result;
use crate::events::{normalize, Event, MalformedEvent, RawEvent};
use crate::query::{DateRange, Granularity};

/// Normalize, filter on creation date and sort ascending by creation.
fn prepare(rows: &[RawEvent], range: &DateRange) -> (Vec<Event>, Vec<MalformedEvent>) {
    let normalized = normalize(rows);
    let mut events: Vec<Event> = normalized
        .events
        .into_iter()
        .filter(|e| range.contains(e.created))
        .collect();
    events.sort_by_key(|e| e.created);
    log::debug!(
        "{} of {} rows in range {range}",
        events.len(),
        rows.len()
    );
    (events, normalized.dropped)
}

/// Durations of the requests that reached `spec.terminal`, in creation order.
struct Durations<'a> {
    completed: Vec<(&'a Event, DateTime<Utc>, f64)>,
    excluded_open: u64,
    anomalies: Vec<NegativeDuration>,
}

fn durations<'a>(events: &'a [Event], spec: &MetricSpec) -> Durations<'a> {
    let mut out = Durations {
        completed: Vec::with_capacity(events.len()),
        excluded_open: 0,
        anomalies: Vec::new(),
    };
    for e in events {
        let Some(end) = e.terminal(spec.terminal) else {
            out.excluded_open += 1;
            continue;
        };
        let days = days_between(e.created, end);
        if days < 0.0 {
            log::warn!(
                "{}: request {} has {} before created ({days:.2} days)",
                spec.name,
                e.id,
                spec.terminal.column()
            );
            out.anomalies.push(NegativeDuration {
                id: e.id.clone(),
                created: e.created,
                terminal: end,
                days,
            });
            continue;
        }
        out.completed.push((e, end, days));
    }
    out
}

/// Mean and median duration of `spec` per bucket.
///
/// Malformed rows are dropped and reported in the result. If no event is
/// left after the date filter the outcome is [`Outcome::NoData`]; events that
/// are all still open produce empty series instead.
pub fn aggregate(
    rows: &[RawEvent],
    spec: &MetricSpec,
    granularity: Granularity,
    range: &DateRange,
) -> Result<MetricReport<DurationSeries>> {
    spec.check_granularity(granularity)?;
    let started = Instant::now();
    log::debug!("{} - START ({granularity})", spec.name);

    let (events, dropped) = prepare(rows, range);
    if events.is_empty() {
        log::info!("{} - NO DATA AVAILABLE", spec.name);
        return Ok(MetricReport { outcome: Outcome::NoData, dropped });
    }

    let d = durations(&events, spec);
    let mut buckets: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for (e, end, days) in &d.completed {
        let anchor = match spec.bucket_on {
            BucketAnchor::Created => e.created,
            BucketAnchor::Terminal => *end,
        };
        buckets.entry(granularity.bucket_of(anchor)).or_default().push(*days);
    }

    let mut mean = Vec::with_capacity(buckets.len());
    let mut median = Vec::with_capacity(buckets.len());
    let mut samples = Vec::with_capacity(buckets.len());
    for (bucket, mut days) in buckets {
        let stats = stats_from_days(&mut days);
        // Buckets only exist once a duration was pushed, so both are set.
        if let (Some(m), Some(md)) = (stats.mean_days, stats.median_days) {
            mean.push(SeriesPoint { bucket, value: m });
            median.push(SeriesPoint { bucket, value: md });
            samples.push(stats.count);
        }
    }

    log::debug!(
        "{} - END - {:?} ({} buckets)",
        spec.name,
        started.elapsed(),
        mean.len()
    );
    Ok(MetricReport {
        outcome: Outcome::Data(DurationSeries {
            metric: spec.name.clone(),
            granularity,
            unit: DURATION_UNIT,
            mean,
            median,
            samples,
            excluded_open: d.excluded_open,
            anomalies: d.anomalies,
        }),
        dropped,
    })
}

/// Per-request durations of `spec`, unbucketed.
pub fn distribution(
    rows: &[RawEvent],
    spec: &MetricSpec,
    range: &DateRange,
) -> Result<MetricReport<Distribution>> {
    let (events, dropped) = prepare(rows, range);
    if events.is_empty() {
        log::info!("{} - NO DATA AVAILABLE", spec.name);
        return Ok(MetricReport { outcome: Outcome::NoData, dropped });
    }

    let d = durations(&events, spec);
    let samples: Vec<DurationSample> = d
        .completed
        .iter()
        .map(|(e, _, days)| DurationSample {
            id: e.id.clone(),
            created: e.created,
            days: *days,
        })
        .collect();
    let mut days: Vec<f64> = samples.iter().map(|s| s.days).collect();
    let stats = stats_from_days(&mut days);

    Ok(MetricReport {
        outcome: Outcome::Data(Distribution {
            metric: spec.name.clone(),
            unit: DURATION_UNIT,
            samples,
            stats,
            excluded_open: d.excluded_open,
            anomalies: d.anomalies,
        }),
        dropped,
    })
}

/// Number of requests open at `at`. Requests never closed or merged count
/// as open.
pub fn open_count_at(events: &[Event], at: DateTime<Utc>) -> u64 {
    events.iter().filter(|e| e.is_open_at(at)).count() as u64
}

/// Open-request count at the end of every bucket.
///
/// Unlike the duration series this one is dense. `range` selects the buckets
/// reported, not the requests counted: a request created before the range
/// start and still open is part of every count. Without bounds the series
/// runs from the first creation to the last creation, close or merge.
pub fn open_series(
    rows: &[RawEvent],
    granularity: Granularity,
    range: &DateRange,
) -> Result<MetricReport<Vec<SeriesPoint>>> {
    let (events, dropped) = prepare(rows, &DateRange::unbounded());
    let Some(first) = events.first() else {
        return Ok(MetricReport { outcome: Outcome::NoData, dropped });
    };

    let start = range.start.map_or(first.created, |s| s.max(first.created));
    let last = match range.end {
        Some(end) => end,
        None => events
            .iter()
            .flat_map(|e| std::iter::once(e.created).chain(e.closed).chain(e.merged))
            .max()
            .unwrap_or(first.created),
    };

    let last_bucket = granularity.bucket_of(last);
    let mut bucket = granularity.bucket_of(start);
    let mut points = Vec::new();
    while bucket <= last_bucket {
        let next = granularity.next_bucket(bucket);
        let at = match next {
            Some(n) => start_of_day(n) - Duration::nanoseconds(1),
            None => DateTime::<Utc>::MAX_UTC,
        };
        points.push(SeriesPoint {
            bucket,
            value: open_count_at(&events, at) as f64,
        });
        match next {
            Some(n) => bucket = n,
            None => break,
        }
    }
    log::debug!("open series: {} {granularity} buckets over {range}", points.len());

    Ok(MetricReport { outcome: Outcome::Data(points), dropped })
}

/// Requests created, closed and merged per bucket. Each timestamp is
/// bucketed on its own; the date filter still applies to creation.
pub fn bucket_counts(
    rows: &[RawEvent],
    granularity: Granularity,
    range: &DateRange,
) -> Result<MetricReport<Vec<BucketCounts>>> {
    let (events, dropped) = prepare(rows, range);
    if events.is_empty() {
        return Ok(MetricReport { outcome: Outcome::NoData, dropped });
    }

    let mut counts: BTreeMap<NaiveDate, BucketCounts> = BTreeMap::new();
    for e in &events {
        bump(&mut counts, granularity.bucket_of(e.created), |c| c.created += 1);
        if let Some(ts) = e.closed {
            bump(&mut counts, granularity.bucket_of(ts), |c| c.closed += 1);
        }
        if let Some(ts) = e.merged {
            bump(&mut counts, granularity.bucket_of(ts), |c| c.merged += 1);
        }
    }

    Ok(MetricReport {
        outcome: Outcome::Data(counts.into_values().collect()),
        dropped,
    })
}

fn bump(counts: &mut BTreeMap<NaiveDate, BucketCounts>, bucket: NaiveDate, f: impl FnOnce(&mut BucketCounts)) {
    f(counts.entry(bucket).or_insert_with(|| BucketCounts {
        bucket,
        ..Default::default()
    }));
}

/// Sorts `days` in place and summarizes it.
fn stats_from_days(days: &mut [f64]) -> DurationStats {
    if days.is_empty() {
        return DurationStats::default();
    }
    days.sort_by(|a, b| a.total_cmp(b));

    let avg = days.iter().sum::<f64>() / days.len() as f64;

    let median = if days.len() % 2 == 0 {
        let mid = days.len() / 2;
        (days[mid - 1] + days[mid]) / 2.0
    } else {
        days[days.len() / 2]
    };

    let p90_idx = ((days.len() as f64) * 0.9).ceil() as usize;
    let p90_idx = p90_idx.min(days.len()).max(1) - 1;

    DurationStats {
        count: days.len() as u64,
        mean_days: Some(avg),
        median_days: Some(median),
        p90_days: Some(days[p90_idx]),
        min_days: days.first().copied(),
        max_days: days.last().copied(),
    }
}

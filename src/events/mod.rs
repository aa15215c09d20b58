//! Pull/change request event rows.
//!
//! Rows arrive untyped ([`RawEvent`]) from an import file, the event store or
//! an in-memory cache. [`normalize`] turns them into typed [`Event`]s and
//! reports every row it had to drop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::date_util::{parse_timestamp, timestamp_from_epoch};
use crate::error::Result;

/// A timestamp cell as it appears in input: text or an epoch number.
/// Any other JSON value lands in `Other` and makes its row malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(f64),
    Text(String),
    Other(serde_json::Value),
}

impl RawTimestamp {
    fn parse(&self) -> std::result::Result<Option<DateTime<Utc>>, String> {
        match self {
            RawTimestamp::Epoch(n) => timestamp_from_epoch(*n).map(Some),
            RawTimestamp::Text(s) if s.trim().is_empty() => Ok(None),
            RawTimestamp::Text(s) => parse_timestamp(s).map(Some),
            RawTimestamp::Other(v) => Err(format!("expected a timestamp string or epoch number, got {v}")),
        }
    }
}

impl std::fmt::Display for RawTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawTimestamp::Epoch(n) => write!(f, "{n}"),
            RawTimestamp::Text(s) => write!(f, "{s}"),
            RawTimestamp::Other(v) => write!(f, "{v}"),
        }
    }
}

/// Identifier cell; forges emit both numeric and string ids. Anything else
/// is kept as its JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(i64),
    Text(String),
    Other(serde_json::Value),
}

impl std::fmt::Display for RawId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawId::Number(n) => write!(f, "{n}"),
            RawId::Text(s) => write!(f, "{s}"),
            RawId::Other(v) => write!(f, "{v}"),
        }
    }
}

/// One input row, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default, alias = "pull_request_id", alias = "pr_id")]
    pub id: Option<RawId>,
    #[serde(default, alias = "created_at", alias = "pr_created_at")]
    pub created: Option<RawTimestamp>,
    #[serde(default, alias = "closed_at", alias = "pr_closed_at")]
    pub closed: Option<RawTimestamp>,
    #[serde(default, alias = "merged_at", alias = "pr_merged_at")]
    pub merged: Option<RawTimestamp>,
}

impl RawEvent {
    /// Convenience constructor for text timestamps.
    pub fn new(id: impl Into<String>, created: &str, closed: Option<&str>, merged: Option<&str>) -> Self {
        Self {
            id: Some(RawId::Text(id.into())),
            created: Some(RawTimestamp::Text(created.to_string())),
            closed: closed.map(|s| RawTimestamp::Text(s.to_string())),
            merged: merged.map(|s| RawTimestamp::Text(s.to_string())),
        }
    }
}

/// Which timestamp ends a request for a given metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Terminal {
    Closed,
    Merged,
}

impl Terminal {
    pub fn column(&self) -> &'static str {
        match self {
            Terminal::Closed => "closed",
            Terminal::Merged => "merged",
        }
    }
}

/// A validated pull/change request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: String,
    pub created: DateTime<Utc>,
    pub closed: Option<DateTime<Utc>>,
    pub merged: Option<DateTime<Utc>>,
}

impl Event {
    pub fn terminal(&self, terminal: Terminal) -> Option<DateTime<Utc>> {
        match terminal {
            Terminal::Closed => self.closed,
            Terminal::Merged => self.merged,
        }
    }

    /// When the request stopped being open: the earlier of close and merge.
    pub fn ended(&self) -> Option<DateTime<Utc>> {
        match (self.closed, self.merged) {
            (Some(c), Some(m)) => Some(c.min(m)),
            (c, m) => c.or(m),
        }
    }

    /// Whether the request was open at `at`: created by then and neither
    /// closed nor merged yet.
    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        self.created <= at && self.ended().map_or(true, |end| end > at)
    }
}

/// A row dropped during normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("row {row}{}: {column}: {reason}", .id.as_deref().map(|id| format!(" (id {id})")).unwrap_or_default())]
pub struct MalformedEvent {
    /// Zero-based position in the input.
    pub row: usize,
    pub id: Option<String>,
    pub column: &'static str,
    pub value: Option<String>,
    pub reason: String,
}

/// Result of [`normalize`]: the usable events plus every dropped row.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub events: Vec<Event>,
    pub dropped: Vec<MalformedEvent>,
}

/// Validate raw rows.
///
/// `created` is required. `closed` and `merged` are optional, but a present
/// value that does not parse makes the whole row malformed. Rows without an
/// id get `#<row>`.
pub fn normalize(rows: &[RawEvent]) -> Normalized {
    let mut out = Normalized::default();

    for (row, raw) in rows.iter().enumerate() {
        let id = raw.id.as_ref().map(|id| id.to_string());
        let malformed = |column: &'static str, value: Option<&RawTimestamp>, reason: String| MalformedEvent {
            row,
            id: id.clone(),
            column,
            value: value.map(|v| v.to_string()),
            reason,
        };

        let created = match raw.created.as_ref().map(|c| (c, c.parse())) {
            Some((_, Ok(Some(ts)))) => ts,
            None | Some((_, Ok(None))) => {
                out.dropped.push(malformed("created", raw.created.as_ref(), "missing required timestamp".into()));
                continue;
            }
            Some((value, Err(reason))) => {
                out.dropped.push(malformed("created", Some(value), reason));
                continue;
            }
        };

        let optional = |column: &'static str, cell: Option<&RawTimestamp>| match cell {
            None => Ok(None),
            Some(value) => value.parse().map_err(|reason| malformed(column, Some(value), reason)),
        };
        let closed = optional("closed", raw.closed.as_ref());
        let merged = optional("merged", raw.merged.as_ref());

        match (closed, merged) {
            (Ok(closed), Ok(merged)) => out.events.push(Event {
                id: id.clone().unwrap_or_else(|| format!("#{row}")),
                created,
                closed,
                merged,
            }),
            (Err(e), _) | (_, Err(e)) => out.dropped.push(e),
        }
    }

    if !out.dropped.is_empty() {
        log::warn!(
            "Dropped {} of {} event rows with malformed timestamps",
            out.dropped.len(),
            rows.len()
        );
        for d in &out.dropped {
            log::debug!("Malformed event: {d}");
        }
    }
    out
}

/// Parse event rows from JSON: either a single array or one object per line.
///
/// Only a document that is not JSON at all is an error. An element or line
/// that is not an event object becomes an empty row, which [`normalize`]
/// then reports as malformed, so row positions stay stable.
pub fn parse_json(input: &str) -> Result<Vec<RawEvent>> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<serde_json::Value> = serde_json::from_str(trimmed)?;
        return Ok(values
            .into_iter()
            .enumerate()
            .map(|(row, v)| row_from_value(row, serde_json::from_value(v)))
            .collect());
    }
    Ok(trimmed
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(row, l)| row_from_value(row, serde_json::from_str(l)))
        .collect())
}

fn row_from_value(row: usize, parsed: serde_json::Result<RawEvent>) -> RawEvent {
    parsed.unwrap_or_else(|e| {
        log::warn!("Event row {row} is not an event object: {e}");
        RawEvent::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_valid_rows() {
        let rows = vec![
            RawEvent::new("1", "2021-01-05", Some("2021-01-10"), Some("2021-01-10")),
            RawEvent::new("2", "2021-02-01T08:00:00Z", None, None),
        ];
        let n = normalize(&rows);
        assert!(n.dropped.is_empty());
        assert_eq!(n.events.len(), 2);
        assert_eq!(n.events[0].created, Utc.with_ymd_and_hms(2021, 1, 5, 0, 0, 0).unwrap());
        assert!(n.events[1].closed.is_none());
    }

    #[test]
    fn test_normalize_drops_and_reports() {
        let rows = vec![
            RawEvent::new("ok", "2021-01-05", None, None),
            RawEvent::new("bad-created", "soon", None, None),
            RawEvent {
                id: Some(RawId::Number(7)),
                created: None,
                closed: None,
                merged: None,
            },
            RawEvent::new("bad-closed", "2021-01-05", Some("never"), None),
        ];
        let n = normalize(&rows);
        assert_eq!(n.events.len(), 1);
        assert_eq!(n.dropped.len(), 3);

        assert_eq!(n.dropped[0].row, 1);
        assert_eq!(n.dropped[0].column, "created");
        assert_eq!(n.dropped[0].value.as_deref(), Some("soon"));

        assert_eq!(n.dropped[1].id.as_deref(), Some("7"));
        assert_eq!(n.dropped[1].reason, "missing required timestamp");

        assert_eq!(n.dropped[2].column, "closed");
        assert!(n.dropped[2].to_string().starts_with("row 3 (id bad-closed): closed:"));
    }

    #[test]
    fn test_empty_terminal_text_is_absent() {
        let rows = vec![RawEvent::new("1", "2021-01-05", Some(""), None)];
        let n = normalize(&rows);
        assert_eq!(n.events.len(), 1);
        assert!(n.events[0].closed.is_none());
    }

    #[test]
    fn test_missing_id_gets_row_marker() {
        let rows = vec![RawEvent {
            created: Some(RawTimestamp::Epoch(1_609_459_200.0)),
            ..Default::default()
        }];
        let n = normalize(&rows);
        assert_eq!(n.events[0].id, "#0");
    }

    #[test]
    fn test_is_open_at() {
        let e = Event {
            id: "1".into(),
            created: Utc.with_ymd_and_hms(2021, 1, 5, 0, 0, 0).unwrap(),
            closed: Some(Utc.with_ymd_and_hms(2021, 1, 10, 0, 0, 0).unwrap()),
            merged: None,
        };
        assert!(!e.is_open_at(Utc.with_ymd_and_hms(2021, 1, 4, 0, 0, 0).unwrap()));
        assert!(e.is_open_at(Utc.with_ymd_and_hms(2021, 1, 5, 0, 0, 0).unwrap()));
        assert!(!e.is_open_at(Utc.with_ymd_and_hms(2021, 1, 10, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_parse_json_array_with_aliases() {
        let input = r#"[
            {"pull_request_id": 12, "created_at": "2021-01-05T00:00:00Z", "closed_at": null, "merged_at": 1610236800},
            {"id": "abc", "created": "2021-01-06"}
        ]"#;
        let rows = parse_json(input).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, Some(RawId::Number(12)));
        assert_eq!(rows[0].merged, Some(RawTimestamp::Epoch(1_610_236_800.0)));
        assert!(rows[0].closed.is_none());
        assert_eq!(rows[1].id, Some(RawId::Text("abc".into())));
    }

    #[test]
    fn test_parse_json_lines() {
        let input = "{\"id\": 1, \"created\": \"2021-01-05\"}\n\n{\"id\": 2, \"created\": \"2021-01-06\"}\n";
        let rows = parse_json(input).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_mistyped_cells_drop_only_their_row() {
        let input = r#"[
            {"id": 1, "created": "2021-01-05"},
            {"id": 2, "created": true},
            {"id": 3, "created": "2021-01-06", "closed": {"at": "2021-01-07"}},
            {"id": 4.5, "created": "2021-01-07"},
            {"id": 18446744073709551615, "created": "2021-01-08"},
            "not a row"
        ]"#;
        let rows = parse_json(input).unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[1].created, Some(RawTimestamp::Other(serde_json::Value::Bool(true))));

        let n = normalize(&rows);
        let ids: Vec<&str> = n.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4.5", "18446744073709551615"]);

        let dropped: Vec<(usize, &str)> = n.dropped.iter().map(|d| (d.row, d.column)).collect();
        assert_eq!(dropped, vec![(1, "created"), (2, "closed"), (5, "created")]);
        assert_eq!(n.dropped[0].value.as_deref(), Some("true"));
    }

    #[test]
    fn test_parse_json_lines_keeps_going_past_bad_line() {
        let input = "{\"id\": 1, \"created\": \"2021-01-05\"}\n{oops\n{\"id\": 2, \"created\": \"2021-01-06\"}\n";
        let rows = parse_json(input).unwrap();
        assert_eq!(rows.len(), 3);
        let n = normalize(&rows);
        assert_eq!(n.events.len(), 2);
        assert_eq!(n.dropped[0].row, 1);
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        assert!(parse_json("[{\"id\": ").is_err());
    }
}

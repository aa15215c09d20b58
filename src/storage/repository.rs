use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use crate::events::{Event, RawEvent, RawId, RawTimestamp};

fn ts_key(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Requests ───────────────────────────────────────────────────────

pub fn upsert_request(conn: &Connection, repo: &str, event: &Event) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO fact_requests (repo, request_id, created_at, closed_at, merged_at, imported_at)
         VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
         ON CONFLICT(repo, request_id) DO UPDATE SET
            created_at=excluded.created_at, closed_at=excluded.closed_at,
            merged_at=excluded.merged_at, imported_at=excluded.imported_at",
        params![
            repo,
            event.id,
            ts_key(event.created),
            event.closed.map(ts_key),
            event.merged.map(ts_key),
        ],
    )?;
    Ok(())
}

/// Upsert `events` in one transaction. Nothing is written if any row fails.
pub fn upsert_requests(conn: &Connection, repo: &str, events: &[Event]) -> Result<u64, rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    for event in events {
        upsert_request(&tx, repo, event)?;
    }
    tx.commit()?;
    Ok(events.len() as u64)
}

/// Load the rows of `repos` as raw events, oldest first.
/// An empty selection loads every repository.
pub fn load_raw_events(conn: &Connection, repos: &[String]) -> Result<Vec<RawEvent>, rusqlite::Error> {
    let filter = if repos.is_empty() {
        String::new()
    } else {
        let placeholders = vec!["?"; repos.len()].join(", ");
        format!("WHERE repo IN ({placeholders})")
    };
    let sql = format!(
        "SELECT request_id, created_at, closed_at, merged_at FROM fact_requests
         {filter} ORDER BY created_at, repo, request_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(repos.iter()), |row| {
        let text = |s: Option<String>| s.map(RawTimestamp::Text);
        Ok(RawEvent {
            id: Some(RawId::Text(row.get(0)?)),
            created: text(row.get(1)?),
            closed: text(row.get(2)?),
            merged: text(row.get(3)?),
        })
    })?;
    rows.collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoSummary {
    pub repo: String,
    pub requests: u64,
    pub open: u64,
    pub merged: u64,
    pub first_created: Option<String>,
    pub last_created: Option<String>,
}

pub fn list_repos(conn: &Connection) -> Result<Vec<RepoSummary>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT repo, COUNT(*),
                SUM(CASE WHEN closed_at IS NULL THEN 1 ELSE 0 END),
                SUM(CASE WHEN merged_at IS NOT NULL THEN 1 ELSE 0 END),
                MIN(created_at), MAX(created_at)
         FROM fact_requests GROUP BY repo ORDER BY repo",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(RepoSummary {
            repo: row.get(0)?,
            requests: row.get::<_, i64>(1)? as u64,
            open: row.get::<_, i64>(2)? as u64,
            merged: row.get::<_, i64>(3)? as u64,
            first_created: row.get(4)?,
            last_created: row.get(5)?,
        })
    })?;
    rows.collect()
}

pub fn delete_repo(conn: &Connection, repo: &str) -> Result<u64, rusqlite::Error> {
    let count = conn.execute("DELETE FROM fact_requests WHERE repo = ?1", params![repo])?;
    Ok(count as u64)
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Import Jobs ────────────────────────────────────────────────────

pub fn insert_import_job(
    conn: &Connection,
    repo: &str,
    source_path: Option<&str>,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO import_jobs (repo, source_path, status, started_at)
         VALUES (?1, ?2, 'running', datetime('now'))",
        params![repo, source_path],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn complete_import_job(
    conn: &Connection,
    job_id: i64,
    status: &str,
    imported: u64,
    dropped: u64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE import_jobs SET
            status = ?2, completed_at = datetime('now'),
            imported = ?3, dropped = ?4
         WHERE id = ?1",
        params![job_id, status, imported as i64, dropped as i64],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub id: i64,
    pub repo: String,
    pub source_path: Option<String>,
    pub status: String,
    pub imported: u64,
    pub dropped: u64,
    pub started_at: String,
    pub completed_at: Option<String>,
}

pub fn recent_import_jobs(conn: &Connection, limit: u32) -> Result<Vec<ImportJob>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, repo, source_path, status, imported, dropped, started_at, completed_at
         FROM import_jobs ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(ImportJob {
            id: row.get(0)?,
            repo: row.get(1)?,
            source_path: row.get(2)?,
            status: row.get(3)?,
            imported: row.get::<_, i64>(4)? as u64,
            dropped: row.get::<_, i64>(5)? as u64,
            started_at: row.get(6)?,
            completed_at: row.get(7)?,
        })
    })?;
    rows.collect()
}

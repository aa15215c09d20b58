pub mod repository;

use rusqlite_migration::{Migrations, M};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::events::{normalize, MalformedEvent, RawEvent};
use crate::source::EventSource;

/// Database wraps two `tokio_rusqlite::Connection` instances (writer + reader)
/// using WAL mode for concurrent access. The writer serializes writes via
/// `tokio_rusqlite`'s internal channel; the reader can proceed without blocking.
#[derive(Clone)]
pub struct Database {
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
}

/// Outcome of importing event rows for one repository.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub repo: String,
    pub imported: u64,
    pub dropped: Vec<MalformedEvent>,
}

impl Database {
    /// Open the database at the default path (`~/.repohealth/repohealth.db`).
    pub async fn open() -> Result<Self> {
        let dir = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
            .join(".repohealth");
        std::fs::create_dir_all(&dir)?;
        Self::open_at(dir.join("repohealth.db")).await
    }

    /// Open the database at the given path.
    pub async fn open_at(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let writer = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_writer(&writer).await?;

        let reader = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_reader(&reader).await?;

        Ok(Self { writer, reader })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let writer = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init_writer(&writer).await?;

        // For in-memory, we share the same connection for reader/writer
        // since in-memory DBs are per-connection.
        Ok(Self {
            reader: writer.clone(),
            writer,
        })
    }

    async fn init_writer(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA busy_timeout=5000;",
            )
            .map_err(|e| e.to_string())?;
            let migrations = Migrations::new(vec![M::up(include_str!("migrations/001_initial.sql"))]);
            migrations.to_latest(conn).map_err(|e| e.to_string())?;
            Ok::<(), String>(())
        })
        .await
        .map_err(|e| Error::Migration(e.to_string()))
    }

    async fn init_reader(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA busy_timeout=5000;")?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
        Ok(())
    }

    /// Get a reference to the writer connection.
    pub fn writer(&self) -> &tokio_rusqlite::Connection {
        &self.writer
    }

    /// Get a reference to the reader connection.
    pub fn reader(&self) -> &tokio_rusqlite::Connection {
        &self.reader
    }

    /// Validate and store rows for `repo` in a single transaction.
    /// Malformed rows are skipped and returned in the report.
    pub async fn import_events(
        &self,
        repo: &str,
        rows: &[RawEvent],
        source_path: Option<&str>,
    ) -> Result<ImportReport> {
        let normalized = normalize(rows);
        let dropped = normalized.dropped;
        let events = normalized.events;
        let dropped_count = dropped.len() as u64;

        let imported = self
            .writer
            .call({
                let repo = repo.to_string();
                let source_path = source_path.map(str::to_string);
                move |conn| {
                    let job_id = repository::insert_import_job(conn, &repo, source_path.as_deref())?;
                    match repository::upsert_requests(conn, &repo, &events) {
                        Ok(imported) => {
                            repository::complete_import_job(conn, job_id, "completed", imported, dropped_count)?;
                            Ok::<u64, rusqlite::Error>(imported)
                        }
                        Err(e) => {
                            log::error!("Import for {repo} failed: {e}");
                            repository::complete_import_job(conn, job_id, "failed", 0, dropped_count)?;
                            Err(e)
                        }
                    }
                }
            })
            .await?;

        log::info!("Imported {imported} requests for {repo} ({dropped_count} dropped)");
        Ok(ImportReport {
            repo: repo.to_string(),
            imported,
            dropped,
        })
    }

    /// Raw rows for a repository selection; empty selects everything.
    pub async fn load_events(&self, repos: &[String]) -> Result<Vec<RawEvent>> {
        let repos = repos.to_vec();
        Ok(self
            .reader
            .call(move |conn| repository::load_raw_events(conn, &repos))
            .await?)
    }
}

impl EventSource for Database {
    async fn fetch(&self, repos: &[String]) -> Result<Option<Vec<RawEvent>>> {
        self.load_events(repos).await.map(Some)
    }
}

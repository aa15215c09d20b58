pub mod date_util;
pub mod error;
pub mod events;
pub mod metrics;
pub mod query;
pub mod source;
pub mod storage;

pub use error::{Error, Result};
pub use events::{Event, MalformedEvent, RawEvent, Terminal};
pub use metrics::{
    aggregate, bucket_counts, distribution, open_count_at, open_series, DurationSeries,
    MetricReport, MetricSpec, Outcome, SeriesPoint,
};
pub use query::{DateRange, Granularity, Period};
pub use source::{wait_for_events, EventCache, EventSource, WaitOptions};
pub use storage::{Database, ImportReport};

use std::future::Future;
use std::path::Path;

use storage::repository;

/// Config key holding the interval used when none is given.
pub const DEFAULT_INTERVAL_KEY: &str = "default_interval";

/// Main entry point: an event store plus the settings kept in it.
pub struct RepoHealth {
    db: Database,
}

impl RepoHealth {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    // ── Import ─────────────────────────────────────────────────────

    /// Import a JSON array or JSON-lines file of event rows for `repo`.
    pub async fn import_file(&self, repo: &str, path: impl AsRef<Path>) -> Result<ImportReport> {
        let path = path.as_ref();
        let input = tokio::fs::read_to_string(path).await?;
        let rows = events::parse_json(&input)?;
        log::debug!("Read {} rows from {}", rows.len(), path.display());
        self.db
            .import_events(repo, &rows, Some(&path.display().to_string()))
            .await
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Rows for a repository selection, waiting for the store within `opts`.
    pub async fn events(
        &self,
        repos: &[String],
        opts: WaitOptions,
        cancel: impl Future<Output = ()>,
    ) -> Result<Vec<RawEvent>> {
        wait_for_events(&self.db, repos, opts, cancel).await
    }

    /// The configured default interval, or monthly.
    pub async fn default_granularity(&self) -> Result<Granularity> {
        Ok(self.configured_granularity().await?.unwrap_or(Granularity::Month))
    }

    /// Interval for `spec` when none is given: the configured default if the
    /// metric supports it, otherwise the metric's own default.
    pub async fn default_granularity_for(&self, spec: &MetricSpec) -> Result<Granularity> {
        Ok(match self.configured_granularity().await? {
            Some(g) if spec.granularities.contains(&g) => g,
            _ => spec.default_granularity,
        })
    }

    async fn configured_granularity(&self) -> Result<Option<Granularity>> {
        self.config_get(DEFAULT_INTERVAL_KEY)
            .await?
            .map(|token| Granularity::parse(&token))
            .transpose()
    }

    pub async fn repos(&self) -> Result<Vec<repository::RepoSummary>> {
        self.db
            .reader()
            .call(|conn| repository::list_repos(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn recent_imports(&self, limit: u32) -> Result<Vec<repository::ImportJob>> {
        self.db
            .reader()
            .call(move |conn| repository::recent_import_jobs(conn, limit))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn remove_repo(&self, repo: &str) -> Result<u64> {
        self.db
            .writer()
            .call({
                let repo = repo.to_string();
                move |conn| repository::delete_repo(conn, &repo)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        if key == DEFAULT_INTERVAL_KEY {
            Granularity::parse(value)?;
        }
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}

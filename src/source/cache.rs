use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::events::RawEvent;
use crate::source::EventSource;

type Entries = HashMap<String, Arc<Vec<RawEvent>>>;

/// In-memory event rows per repository.
///
/// Producers [`publish`](EventCache::publish) rows when a download finishes;
/// readers either check with [`get`](EventCache::get) or await readiness with
/// [`wait_ready`](EventCache::wait_ready), which is woken on publish instead
/// of sleeping between checks.
#[derive(Clone)]
pub struct EventCache {
    tx: Arc<watch::Sender<Entries>>,
}

impl Default for EventCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCache {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Entries::new());
        Self { tx: Arc::new(tx) }
    }

    /// Store (or replace) the rows for `repo` and wake waiters.
    pub fn publish(&self, repo: &str, rows: Vec<RawEvent>) {
        let count = rows.len();
        self.tx.send_modify(|entries| {
            entries.insert(repo.to_string(), Arc::new(rows));
        });
        log::debug!("Published {count} event rows for {repo}");
    }

    /// Forget the rows for `repo`. Returns whether anything was removed.
    pub fn invalidate(&self, repo: &str) -> bool {
        let mut removed = false;
        self.tx.send_if_modified(|entries| {
            removed = entries.remove(repo).is_some();
            removed
        });
        removed
    }

    /// Rows for every repo in `repos`, concatenated in the given order, or
    /// None if any of them has not been published.
    pub fn get(&self, repos: &[String]) -> Option<Vec<RawEvent>> {
        collect(&self.tx.borrow(), repos)
    }

    /// Wait until every repo in `repos` has been published.
    pub async fn wait_ready(&self, repos: &[String], timeout: Duration) -> Result<Vec<RawEvent>> {
        let mut rx = self.tx.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|entries| repos.iter().all(|r| entries.contains_key(r))),
        )
        .await;

        match waited {
            Ok(Ok(entries)) => collect(&entries, repos)
                .ok_or_else(|| Error::Other("cache entry vanished while reading".into())),
            // The sender lives in `self`, so the channel cannot close while we wait.
            Ok(Err(_)) => Err(Error::Other("event cache closed".into())),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }
}

fn collect(entries: &Entries, repos: &[String]) -> Option<Vec<RawEvent>> {
    let mut rows = Vec::new();
    for repo in repos {
        rows.extend(entries.get(repo)?.iter().cloned());
    }
    Some(rows)
}

impl EventSource for EventCache {
    async fn fetch(&self, repos: &[String]) -> Result<Option<Vec<RawEvent>>> {
        Ok(self.get(repos))
    }
}

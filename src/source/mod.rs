//! Where event rows come from, and how callers wait for them.
//!
//! A source may not have the rows for a repository selection yet. Callers
//! wait through [`wait_for_events`], a single awaited call bounded by a
//! timeout and an optional cancellation future.

pub mod cache;

pub use cache::EventCache;

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::events::RawEvent;

/// Supplies the event table for a repository selection.
pub trait EventSource {
    /// `Ok(None)` means the rows are not ready yet.
    fn fetch(&self, repos: &[String]) -> impl Future<Output = Result<Option<Vec<RawEvent>>>> + Send;
}

/// Bounds for [`wait_for_events`].
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Fetch rows from `source`, retrying while they are not ready.
///
/// Returns [`Error::Timeout`] once `opts.timeout` has elapsed and
/// [`Error::Cancelled`] as soon as `cancel` resolves. Errors from the source
/// are returned immediately.
pub async fn wait_for_events<S, C>(
    source: &S,
    repos: &[String],
    opts: WaitOptions,
    cancel: C,
) -> Result<Vec<RawEvent>>
where
    S: EventSource,
    C: Future<Output = ()>,
{
    let attempt = async {
        let mut polls: u32 = 0;
        loop {
            match source.fetch(repos).await {
                Ok(Some(rows)) => {
                    log::debug!("Event data for {repos:?} ready after {polls} retries");
                    return Ok::<Vec<RawEvent>, Error>(rows);
                }
                Ok(None) => {}
                Err(e) => return Err(e),
            }
            polls += 1;
            log::debug!("Event data for {repos:?} not ready, retry {polls}");
            tokio::time::sleep(opts.poll_interval).await;
        }
    };

    tokio::select! {
        res = tokio::time::timeout(opts.timeout, attempt) => match res {
            Ok(rows) => rows,
            Err(_) => {
                log::warn!("Timed out after {:?} waiting for {repos:?}", opts.timeout);
                Err(Error::Timeout(opts.timeout))
            }
        },
        _ = cancel => Err(Error::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Ready after a fixed number of fetches.
    struct SlowSource {
        calls: AtomicU32,
        ready_after: u32,
    }

    impl EventSource for SlowSource {
        async fn fetch(&self, _repos: &[String]) -> Result<Option<Vec<RawEvent>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.ready_after {
                Ok(Some(vec![RawEvent::new("1", "2021-01-05", None, None)]))
            } else {
                Ok(None)
            }
        }
    }

    struct FailingSource;

    impl EventSource for FailingSource {
        async fn fetch(&self, _repos: &[String]) -> Result<Option<Vec<RawEvent>>> {
            Err(Error::Database("connection lost".into()))
        }
    }

    fn fast() -> WaitOptions {
        WaitOptions {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_returns_once_ready() {
        let source = SlowSource { calls: AtomicU32::new(0), ready_after: 3 };
        let rows = wait_for_events(&source, &["r".to_string()], fast(), std::future::pending())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let source = SlowSource { calls: AtomicU32::new(0), ready_after: u32::MAX };
        let opts = WaitOptions {
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
        };
        let err = wait_for_events(&source, &["r".to_string()], opts, std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled() {
        let source = SlowSource { calls: AtomicU32::new(0), ready_after: u32::MAX };
        let cancel = tokio::time::sleep(Duration::from_millis(100));
        let err = wait_for_events(&source, &["r".to_string()], fast(), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_source_error_is_not_retried() {
        let err = wait_for_events(&FailingSource, &["r".to_string()], fast(), std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }
}

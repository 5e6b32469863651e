use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use debrix_core::{StreamId, TorrentRecord};
use tracing::{debug, warn};

use super::TorrentSource;
use crate::Error;

/// Fans a search out to every configured source in parallel and merges the
/// results.
pub struct Aggregator {
    sources: Vec<Arc<dyn TorrentSource>>,
    /// Budget for normal sources.
    search_timeout: Duration,
    /// Quick-skip budget for sources reporting `is_slow()`.
    slow_search_timeout: Duration,
}

enum Outcome {
    Found(Vec<TorrentRecord>),
    Failed(String),
    // The search is still running and will warm its own cache; this call
    // just stops waiting for it.
    TimedOut,
}

impl Aggregator {
    pub fn new(
        sources: Vec<Arc<dyn TorrentSource>>,
        search_timeout: Duration,
        slow_search_timeout: Duration,
    ) -> Self {
        Self {
            sources,
            search_timeout,
            slow_search_timeout,
        }
    }

    pub fn sources(&self) -> &[Arc<dyn TorrentSource>] {
        &self.sources
    }

    /// Search every source. Succeeds (possibly empty) unless *every* source
    /// returned an error; a timed-out source counts as empty, not as failed.
    pub async fn find(&self, id: &StreamId) -> Result<Vec<TorrentRecord>, Error> {
        let (tx, mut rx) = tokio::sync::mpsc::channel(self.sources.len().max(1));
        for source in &self.sources {
            let budget = if source.is_slow() {
                self.slow_search_timeout
            } else {
                self.search_timeout
            };
            let source = source.clone();
            let id = id.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let name = source.name();
                // The inner task is spawned separately so that hitting the
                // budget leaves it running: the source still writes its own
                // result cache for the next request.
                let handle = tokio::spawn(async move { source.find(&id).await });
                let outcome = match tokio::time::timeout(budget, handle).await {
                    Ok(Ok(Ok(records))) => Outcome::Found(records),
                    Ok(Ok(Err(e))) => Outcome::Failed(format!("{e:#}")),
                    Ok(Err(join_err)) => Outcome::Failed(format!("search panicked: {join_err}")),
                    Err(_) => Outcome::TimedOut,
                };
                let _ = tx.send((name, outcome)).await;
            });
        }
        drop(tx);

        let mut per_source: Vec<(&'static str, Vec<TorrentRecord>)> = Vec::new();
        let mut errors: Vec<(&'static str, String)> = Vec::new();
        while let Some((name, outcome)) = rx.recv().await {
            match outcome {
                Outcome::Found(records) => {
                    debug!(source = name, count = records.len(), "source answered");
                    per_source.push((name, records));
                }
                Outcome::Failed(message) => {
                    warn!(source = name, "source failed: {message}");
                    errors.push((name, message));
                }
                Outcome::TimedOut => {
                    debug!(source = name, "source timed out, treating as empty");
                    per_source.push((name, Vec::new()));
                }
            }
        }

        if !self.sources.is_empty() && errors.len() == self.sources.len() {
            let joined = errors
                .iter()
                .map(|(name, message)| format!("{name}: {message}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::AllSourcesFailed(joined));
        }

        // Dedup is pointless when a single source produced everything.
        let non_empty = per_source.iter().filter(|(_, r)| !r.is_empty()).count();
        if non_empty <= 1 {
            return Ok(per_source.into_iter().flat_map(|(_, r)| r).collect());
        }

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for (_, records) in per_source {
            for record in records {
                if seen.insert(record.info_hash()) {
                    merged.push(record);
                }
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use debrix_core::InfoHash;

    use super::*;

    struct FixedSource {
        name: &'static str,
        slow: bool,
        delay: Duration,
        result: Result<Vec<TorrentRecord>, String>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn ok(name: &'static str, records: Vec<TorrentRecord>) -> Arc<Self> {
            Arc::new(Self {
                name,
                slow: false,
                delay: Duration::ZERO,
                result: Ok(records),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                slow: false,
                delay: Duration::ZERO,
                result: Err("connection refused".to_string()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TorrentSource for FixedSource {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_slow(&self) -> bool {
            self.slow
        }

        async fn find(&self, _id: &StreamId) -> anyhow::Result<Vec<TorrentRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.result {
                Ok(records) => Ok(records.clone()),
                Err(message) => anyhow::bail!("{message}"),
            }
        }
    }

    fn record(hash: &str) -> TorrentRecord {
        TorrentRecord::new(
            format!("Movie {hash}"),
            "1080p".to_string(),
            InfoHash::from_str(hash).unwrap(),
            Vec::new(),
        )
    }

    fn id() -> StreamId {
        "tt1254207".parse().unwrap()
    }

    fn aggregator(sources: Vec<Arc<dyn TorrentSource>>) -> Aggregator {
        Aggregator::new(sources, Duration::from_secs(5), Duration::from_secs(2))
    }

    const HASH_A: &str = "DD8255ECDC7CA55FB0BBF81323D87062DB1F6D1C";
    const HASH_B: &str = "A621779B5E3D486E127C3EFBCA9B6F8D135F52E5";

    #[tokio::test]
    async fn test_all_empty_without_error_is_empty_success() {
        let agg = aggregator(vec![
            FixedSource::ok("one", vec![]),
            FixedSource::ok("two", vec![]),
        ]);
        let found = agg.find(&id()).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_all_failed_names_every_source() {
        let agg = aggregator(vec![
            FixedSource::failing("one"),
            FixedSource::failing("two"),
        ]);
        match agg.find(&id()).await {
            Err(Error::AllSourcesFailed(message)) => {
                assert!(message.contains("one"));
                assert!(message.contains("two"));
            }
            other => panic!("expected AllSourcesFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let agg = aggregator(vec![
            FixedSource::failing("bad"),
            FixedSource::ok("good", vec![record(HASH_A)]),
        ]);
        let found = agg.find(&id()).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_dedupes_across_sources() {
        let agg = aggregator(vec![
            FixedSource::ok("one", vec![record(HASH_A), record(HASH_B)]),
            FixedSource::ok("two", vec![record(HASH_A)]),
        ]);
        let found = agg.find(&id()).await.unwrap();
        assert_eq!(found.len(), 2);
        let hashes: Vec<_> = found.iter().map(|r| r.info_hash()).collect();
        let unique: HashSet<_> = hashes.iter().collect();
        assert_eq!(unique.len(), hashes.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_is_quick_skipped_not_cancelled() {
        let slow = Arc::new(FixedSource {
            name: "slow",
            slow: true,
            delay: Duration::from_secs(10),
            result: Ok(vec![record(HASH_B)]),
            calls: AtomicUsize::new(0),
        });
        let agg = aggregator(vec![
            slow.clone(),
            FixedSource::ok("fast", vec![record(HASH_A)]),
        ]);
        let found = agg.find(&id()).await.unwrap();
        // Slow source's records are missing from this call...
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].info_hash(), InfoHash::from_str(HASH_A).unwrap());
        // ...but its search was started and keeps running detached.
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }
}

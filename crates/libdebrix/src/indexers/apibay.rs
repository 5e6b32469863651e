use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use debrix_core::{InfoHash, StreamId, TorrentRecord, quality};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{SourceHttpOptions, TorrentSource, episode_tag};
use crate::cache::{KvStore, TypedCache};

const TRACKERS: &[&str] = &[
    "udp://tracker.opentrackr.org:1337",
    "udp://open.stealth.si:80/announce",
    "udp://tracker.torrent.eu.org:451/announce",
    "udp://exodus.desync.com:6969",
    "udp://explodie.org:6969",
];

/// JSON-API indexer. A single GET returns typed rows carrying the release
/// name, so no meta lookup is needed.
pub struct ApibayClient {
    opts: SourceHttpOptions,
    client: reqwest::Client,
    base_url: String,
    cache: TypedCache<Vec<TorrentRecord>>,
}

#[derive(Deserialize)]
struct ApibayRow {
    name: String,
    info_hash: String,
}

impl ApibayClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://apibay.org";

    pub fn new(
        base_url: String,
        opts: SourceHttpOptions,
        store: Arc<dyn KvStore>,
        max_age: Duration,
    ) -> anyhow::Result<Self> {
        let client = opts.build_client()?;
        Ok(Self {
            opts,
            client,
            base_url,
            cache: TypedCache::new("torrents", store, max_age),
        })
    }

    async fn search(&self, id: &StreamId) -> anyhow::Result<Vec<TorrentRecord>> {
        let url = format!("{}/q.php", self.base_url);
        let response = self
            .opts
            .apply_headers(self.client.get(&url).query(&[("q", id.imdb_id.as_str())]))
            .send()
            .await
            .with_context(|| format!("error fetching {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("apibay responded with {}", response.status());
        }
        let rows: Vec<ApibayRow> = response
            .json()
            .await
            .context("error decoding apibay response")?;

        // "No results" is a single placeholder row with an all-zero hash.
        let rows: Vec<ApibayRow> = rows
            .into_iter()
            .filter(|r| !r.info_hash.bytes().all(|b| b == b'0'))
            .collect();

        let episode_filter = id
            .episode
            .map(|e| episode_tag(e.season, e.episode).to_lowercase());

        let mut records = Vec::new();
        for row in rows {
            if let Some(filter) = &episode_filter
                && !row.name.to_lowercase().contains(filter)
            {
                continue;
            }
            let info_hash = match InfoHash::from_str(&row.info_hash) {
                Ok(h) => h,
                Err(e) => {
                    warn!(name = %row.name, "dropping row with bad info hash: {e}");
                    continue;
                }
            };
            let Some(q) = quality::parse_quality(&row.name) else {
                continue;
            };
            records.push(TorrentRecord::new(
                row.name,
                q,
                info_hash,
                TRACKERS.iter().map(|t| t.to_string()).collect(),
            ));
        }
        Ok(records)
    }
}

#[async_trait]
impl TorrentSource for ApibayClient {
    fn name(&self) -> &'static str {
        "apibay"
    }

    async fn find(&self, id: &StreamId) -> anyhow::Result<Vec<TorrentRecord>> {
        let key = id.cache_key(self.name());
        if let Some(cached) = self.cache.get(&key).await? {
            debug!(id = %id, count = cached.len(), "apibay cache hit");
            return Ok(cached);
        }
        let records = self.search(id).await?;
        // Empty is the site's current answer; caching it stops us from
        // hammering the endpoint on every replay of the same id.
        self.cache.insert(&key, &records).await?;
        Ok(records)
    }
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use debrix_core::StreamId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{KvStore, TypedCache};
use crate::user_agent;

/// Human-readable metadata for an identifier, used by scrape indexers to
/// build search queries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub title: String,
    pub year: Option<u16>,
    pub release_info: Option<String>,
}

#[async_trait]
pub trait MetaFetcher: Send + Sync {
    async fn meta(&self, id: &StreamId) -> anyhow::Result<MetaRecord>;
}

/// Metadata client against a Cinemeta-compatible endpoint.
pub struct CinemetaClient {
    client: reqwest::Client,
    base_url: String,
    cache: TypedCache<MetaRecord>,
}

#[derive(Deserialize)]
struct CinemetaResponse {
    meta: CinemetaMeta,
}

#[derive(Deserialize)]
struct CinemetaMeta {
    name: String,
    // Cinemeta is loose here: year may be "2008" or "2008-2013", and either
    // field may be missing depending on the catalog.
    year: Option<String>,
    #[serde(rename = "releaseInfo")]
    release_info: Option<String>,
}

impl CinemetaClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://v3-cinemeta.strem.io";

    pub fn new(
        base_url: String,
        timeout: Duration,
        store: Arc<dyn KvStore>,
        max_age: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("error building cinemeta HTTP client")?;
        Ok(Self {
            client,
            base_url,
            cache: TypedCache::new("meta", store, max_age),
        })
    }
}

fn parse_year(s: &str) -> Option<u16> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[async_trait]
impl MetaFetcher for CinemetaClient {
    async fn meta(&self, id: &StreamId) -> anyhow::Result<MetaRecord> {
        if let Some(cached) = self.cache.get(&id.imdb_id).await? {
            return Ok(cached);
        }

        let kind = if id.is_episode() { "series" } else { "movie" };
        let url = format!("{}/meta/{}/{}.json", self.base_url, kind, id.imdb_id);
        let response = self
            .client
            .get(&url)
            .header(http::header::USER_AGENT, user_agent::random_desktop())
            .send()
            .await
            .with_context(|| format!("error fetching {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("cinemeta responded with {} for {url}", response.status());
        }
        let body: CinemetaResponse = response
            .json()
            .await
            .with_context(|| format!("error decoding cinemeta response for {url}"))?;

        let record = MetaRecord {
            title: body.meta.name,
            year: body
                .meta
                .year
                .as_deref()
                .or(body.meta.release_info.as_deref())
                .and_then(parse_year),
            release_info: body.meta.release_info,
        };
        debug!(id=%id, title=%record.title, year=?record.year, "fetched meta");
        self.cache.insert(&id.imdb_id, &record).await?;
        Ok(record)
    }
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use debrix_core::{StreamId, TorrentRecord, quality};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use super::{
    SourceHttpOptions, TorrentSource, episode_tag, magnet_regex, record_from_magnet_uri,
};
use crate::cache::{KvStore, TypedCache};
use crate::meta::MetaFetcher;

const MAX_DETAIL_PAGES: usize = 10;
const QUALITY_TOKENS: [&str; 3] = ["720p", "1080p", "2160p"];

/// HTML-scrape indexer. Search happens by title+year from the meta fetcher,
/// so an exact match cannot be guaranteed; every result is tagged with the
/// guessed-match marker.
pub struct LeetxClient {
    opts: SourceHttpOptions,
    client: reqwest::Client,
    base_url: String,
    cache: TypedCache<Vec<TorrentRecord>>,
    meta: Arc<dyn MetaFetcher>,
}

// Parsing helpers are synchronous on purpose: parsed documents are not Send
// and must never be held across an await.

fn first_torrent_href(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(r#"td.name a[href^="/torrent/"]"#).unwrap();
    doc.select(&sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_owned)
}

/// Link from a torrent page up to the title's library page: the general-info
/// page for a movie, or the aggregate listing every episode torrent for a
/// series.
fn library_href(html: &str, episode: bool) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = if episode {
        Selector::parse(r#"a[href^="/tv/"]"#).unwrap()
    } else {
        Selector::parse(r#"a[href^="/movie/"]"#).unwrap()
    };
    doc.select(&sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_owned)
}

/// Torrent links whose text names one of the qualities worth offering,
/// paired with that link text as a fallback title.
fn quality_torrent_links(html: &str) -> Vec<(String, String)> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(r#"a[href^="/torrent/"]"#).unwrap();
    let mut links = Vec::new();
    for a in doc.select(&sel) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let text = a.text().collect::<Vec<_>>().join(" ").trim().to_string();
        if QUALITY_TOKENS.iter().any(|q| text.contains(q))
            && !links.iter().any(|(h, _)| h == href)
        {
            links.push((href.to_string(), text));
        }
    }
    links
}

fn extract_magnet(html: &str) -> Option<String> {
    magnet_regex().find(html).map(|m| m.as_str().to_string())
}

impl LeetxClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://1337x.to";

    pub fn new(
        base_url: String,
        opts: SourceHttpOptions,
        store: Arc<dyn KvStore>,
        max_age: Duration,
        meta: Arc<dyn MetaFetcher>,
    ) -> anyhow::Result<Self> {
        let client = opts.build_client()?;
        Ok(Self {
            opts,
            client,
            base_url,
            cache: TypedCache::new("torrents", store, max_age),
            meta,
        })
    }

    async fn get_text(&self, url: &str) -> anyhow::Result<String> {
        let response = self
            .opts
            .apply_headers(self.client.get(url))
            .send()
            .await
            .with_context(|| format!("error fetching {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("{url} responded with {}", response.status());
        }
        response.text().await.context("error reading body")
    }

    async fn search(&self, id: &StreamId) -> anyhow::Result<Vec<TorrentRecord>> {
        let meta = self
            .meta
            .meta(id)
            .await
            .context("error resolving title for search")?;
        let query = match id.episode {
            Some(e) => format!("{} {}", meta.title, episode_tag(e.season, e.episode)),
            None => match meta.year {
                Some(year) => format!("{} {}", meta.title, year),
                None => meta.title.clone(),
            },
        };

        let search_url = format!(
            "{}/search/{}/1/",
            self.base_url,
            urlencoding::encode(&query)
        );
        let search_html = self.get_text(&search_url).await?;

        let episode_filter = id
            .episode
            .map(|e| episode_tag(e.season, e.episode).to_lowercase());
        let filter_links = |mut links: Vec<(String, String)>| {
            if let Some(tag) = &episode_filter {
                links.retain(|(_, text)| text.to_lowercase().contains(tag));
            }
            links
        };

        // Hop from the first search hit to the title's library page: for
        // movies the general-info page listing every encode, for series the
        // aggregate of all episode torrents. When the hop dead-ends, the
        // search page itself is the listing.
        let mut links = Vec::new();
        if let Some(first) = first_torrent_href(&search_html) {
            let torrent_html = self.get_text(&format!("{}{}", self.base_url, first)).await?;
            if let Some(library) = library_href(&torrent_html, id.is_episode()) {
                let library_html =
                    self.get_text(&format!("{}{}", self.base_url, library)).await?;
                links = filter_links(quality_torrent_links(&library_html));
            }
        }
        if links.is_empty() {
            links = filter_links(quality_torrent_links(&search_html));
        }

        let fetches = links
            .into_iter()
            .take(MAX_DETAIL_PAGES)
            .map(|(href, text)| async move {
                let url = format!("{}{}", self.base_url, href);
                match self.get_text(&url).await {
                    Ok(html) => extract_magnet(&html)
                        .map(|magnet| (magnet, text))
                        .or_else(|| {
                            debug!(%url, "no magnet on page");
                            None
                        }),
                    Err(e) => {
                        warn!(%url, "error fetching detail page: {e:#}");
                        None
                    }
                }
            });
        let pages = futures::future::join_all(fetches).await;

        let mut records = Vec::new();
        for (magnet, text) in pages.into_iter().flatten() {
            match record_from_magnet_uri(&magnet, &text) {
                Ok(record) => {
                    records.push(record.with_quality_suffix(quality::ANNOTATION_GUESSED))
                }
                Err(e) => warn!("dropping scraped result: {e:#}"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl TorrentSource for LeetxClient {
    fn name(&self) -> &'static str {
        "leetx"
    }

    async fn find(&self, id: &StreamId) -> anyhow::Result<Vec<TorrentRecord>> {
        let key = id.cache_key(self.name());
        if let Some(cached) = self.cache.get(&key).await? {
            debug!(id = %id, count = cached.len(), "leetx cache hit");
            return Ok(cached);
        }
        let records = self.search(id).await?;
        self.cache.insert(&key, &records).await?;
        Ok(records)
    }
}

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use debrix_core::{InfoHash, StreamId, TorrentRecord, quality};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use super::{
    SourceHttpOptions, TorrentSource, btih_regex, episode_tag, magnet_regex,
    record_from_magnet_uri,
};
use crate::cache::{KvStore, TypedCache};
use crate::meta::MetaFetcher;

const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(150);
const MAX_DETAIL_PAGES: usize = 5;
const QUALITY_TOKENS: [&str; 3] = ["720p", "1080p", "2160p"];

// The site announces to the usual public trackers; used when a detail page
// only exposes a bare info hash.
const TRACKERS: &[&str] = &[
    "udp://tracker.opentrackr.org:1337",
    "udp://tracker.torrent.eu.org:451/announce",
    "udp://open.demonii.com:1337/announce",
    "udp://explodie.org:6969",
];

/// Rate-limited HTML indexer. The site bans clients that issue parallel
/// requests, so everything goes through a serial gate with a minimum spacing.
/// Reports slow, since even the best case blows the global search budget.
pub struct IbitClient {
    opts: SourceHttpOptions,
    client: reqwest::Client,
    base_url: String,
    cache: TypedCache<Vec<TorrentRecord>>,
    meta: Arc<dyn MetaFetcher>,
    gate: tokio::sync::Mutex<Option<Instant>>,
}

fn first_torrent_href(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(r#"a[href*="/torrent/"]"#).unwrap();
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

fn quality_torrent_links(html: &str) -> Vec<(String, String)> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse(r#"a[href*="/torrent/"]"#).unwrap();
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

/// The magnet is usually assembled by a script rather than present as a
/// plain link; fall back to a bare info hash when the full URI is absent,
/// pairing it with the site's trackers so the magnet stays usable.
fn extract_magnet_or_hash(html: &str, fallback_title: &str) -> Option<String> {
    if let Some(m) = magnet_regex().find(html) {
        return Some(m.as_str().to_string());
    }
    let captures = btih_regex().captures(html)?;
    let hash = InfoHash::from_str(&captures[1]).ok()?;
    Some(
        debrix_core::Magnet::new(
            hash,
            Some(fallback_title.to_string()),
            TRACKERS.iter().map(|t| t.to_string()).collect(),
        )
        .to_string(),
    )
}

impl IbitClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://ibit.am";

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
            gate: tokio::sync::Mutex::new(None),
        })
    }

    /// All outbound requests serialize here, spaced at least
    /// `MIN_REQUEST_INTERVAL` apart.
    async fn serial_get_text(&self, url: &str) -> anyhow::Result<String> {
        let mut last = self.gate.lock().await;
        if let Some(at) = *last {
            let since = at.elapsed();
            if since < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - since).await;
            }
        }
        *last = Some(Instant::now());

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
            "{}/torrent-search/{}",
            self.base_url,
            urlencoding::encode(&query)
        );
        let search_html = self.serial_get_text(&search_url).await?;

        let episode_filter = id
            .episode
            .map(|e| episode_tag(e.season, e.episode).to_lowercase());
        let filter_links = |mut links: Vec<(String, String)>| {
            if let Some(tag) = &episode_filter {
                links.retain(|(_, text)| text.to_lowercase().contains(tag));
            }
            links
        };

        // Same traversal as the other scrape client, just serialized: first
        // search hit, up to the movie general-info page or the series
        // aggregate, then the quality rows there. The search page is the
        // fallback listing when the hop dead-ends.
        let mut links = Vec::new();
        if let Some(first) = first_torrent_href(&search_html) {
            let torrent_html = self
                .serial_get_text(&format!("{}{}", self.base_url, first))
                .await?;
            if let Some(library) = library_href(&torrent_html, id.is_episode()) {
                let library_html = self
                    .serial_get_text(&format!("{}{}", self.base_url, library))
                    .await?;
                links = filter_links(quality_torrent_links(&library_html));
            }
        }
        if links.is_empty() {
            links = filter_links(quality_torrent_links(&search_html));
        }

        let mut records = Vec::new();
        for (href, text) in links.into_iter().take(MAX_DETAIL_PAGES) {
            let url = format!("{}{}", self.base_url, href);
            let html = match self.serial_get_text(&url).await {
                Ok(html) => html,
                Err(e) => {
                    warn!(%url, "error fetching detail page: {e:#}");
                    continue;
                }
            };
            let Some(magnet) = extract_magnet_or_hash(&html, &text) else {
                debug!(%url, "no magnet on page");
                continue;
            };
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
impl TorrentSource for IbitClient {
    fn name(&self) -> &'static str {
        "ibit"
    }

    fn is_slow(&self) -> bool {
        true
    }

    async fn find(&self, id: &StreamId) -> anyhow::Result<Vec<TorrentRecord>> {
        let key = id.cache_key(self.name());
        if let Some(cached) = self.cache.get(&key).await? {
            debug!(id = %id, count = cached.len(), "ibit cache hit");
            return Ok(cached);
        }
        let records = self.search(id).await?;
        self.cache.insert(&key, &records).await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_torrent_links() {
        let html = r#"
            <a href="/torrent/1/big-buck-bunny-1080p/">Big Buck Bunny 1080p x264</a>
            <a href="/torrent/2/big-buck-bunny-xvid/">Big Buck Bunny XviD</a>
            <a href="/help/">help</a>"#;
        let links = quality_torrent_links(html);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].0, "/torrent/1/big-buck-bunny-1080p/");
    }

    #[test]
    fn test_first_torrent_and_library_hrefs() {
        let search = r#"
            <a href="/user/uploader/">uploader</a>
            <a href="/torrent/1/big-buck-bunny-1080p/">Big Buck Bunny 1080p</a>"#;
        assert_eq!(
            first_torrent_href(search).as_deref(),
            Some("/torrent/1/big-buck-bunny-1080p/")
        );

        let torrent_page = r#"
            <a href="/movie/99/big-buck-bunny/">Big Buck Bunny</a>
            <a href="/tv/42/some-show/">Some Show</a>"#;
        assert_eq!(
            library_href(torrent_page, false).as_deref(),
            Some("/movie/99/big-buck-bunny/")
        );
        assert_eq!(
            library_href(torrent_page, true).as_deref(),
            Some("/tv/42/some-show/")
        );
        assert_eq!(library_href("<html></html>", false), None);
    }

    #[test]
    fn test_extract_magnet_from_script() {
        let html = r#"<script>var magnetLink = "magnet:?xt=urn:btih:dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c&dn=Big.Buck.Bunny.1080p";</script>"#;
        let magnet = extract_magnet_or_hash(html, "x").unwrap();
        assert!(magnet.contains("dn=Big.Buck.Bunny.1080p"));
    }

    #[test]
    fn test_extract_bare_hash_builds_magnet_with_trackers() {
        let html = r#"<script>var parts = ["btih:dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c"];</script>"#;
        let magnet = extract_magnet_or_hash(html, "Big Buck Bunny 720p").unwrap();
        assert!(magnet.starts_with(
            "magnet:?xt=urn:btih:DD8255ECDC7CA55FB0BBF81323D87062DB1F6D1C"
        ));
        assert!(magnet.contains("&tr=udp://tracker.opentrackr.org:1337"));
        let record = record_from_magnet_uri(&magnet, "Big Buck Bunny 720p").unwrap();
        assert_eq!(record.quality(), "720p");
        assert!(record.magnet().contains("&tr="));
    }

    #[test]
    fn test_extract_nothing() {
        assert_eq!(extract_magnet_or_hash("<html>nope</html>", "x"), None);
    }
}

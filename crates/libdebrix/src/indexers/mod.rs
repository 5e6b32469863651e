//! Torrent discovery: one client per indexer site, all normalized to
//! [`TorrentRecord`], fanned out by the [`Aggregator`].

pub mod aggregator;
pub mod apibay;
pub mod ibit;
pub mod leetx;
pub mod rarbg;

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use debrix_core::{StreamId, TorrentRecord};
use regex::Regex;

pub use aggregator::Aggregator;

/// One searchable torrent site.
#[async_trait]
pub trait TorrentSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rate-limited sources whose best-case latency exceeds the global search
    /// budget; the aggregator gives these a short quick-skip timeout instead.
    fn is_slow(&self) -> bool {
        false
    }

    async fn find(&self, id: &StreamId) -> anyhow::Result<Vec<TorrentRecord>>;
}

/// Outbound HTTP settings shared by all indexer clients.
#[derive(Clone, Debug, Default)]
pub struct SourceHttpOptions {
    pub timeout: Duration,
    /// `socks5://[user:pass@]host:port`; gives the client its own proxied
    /// connection pool and cookie jar.
    pub socks_proxy_url: Option<String>,
    pub extra_headers: Vec<(String, String)>,
}

impl SourceHttpOptions {
    pub(crate) fn build_client(&self) -> anyhow::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .cookie_store(true);
        if let Some(proxy_url) = &self.socks_proxy_url {
            let parsed = url::Url::parse(proxy_url).context("invalid proxy URL")?;
            if parsed.scheme() != "socks5" {
                anyhow::bail!("proxy URL should have socks5 scheme");
            }
            builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str()).context("invalid proxy")?);
        }
        builder.build().context("error building indexer HTTP client")
    }

    pub(crate) fn apply_headers(&self, mut rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb = rb.header(http::header::USER_AGENT, crate::user_agent::random_desktop());
        for (name, value) in &self.extra_headers {
            rb = rb.header(name.as_str(), value.as_str());
        }
        rb
    }
}

/// Matches a whole magnet URI embedded in HTML or scripts.
pub(crate) fn magnet_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"magnet:\?xt=urn:btih:[a-fA-F0-9]{40}[^"'\s<]*"#).unwrap()
    })
}

/// Matches a bare info hash, for sites that hide the magnet behind scripts.
pub(crate) fn btih_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"btih:([a-fA-F0-9]{40})").unwrap())
}

/// Build a record from a scraped magnet URI. The quality is parsed from the
/// magnet's own display name when it has one, falling back to the link text
/// the caller scraped.
pub(crate) fn record_from_magnet_uri(
    uri: &str,
    fallback_title: &str,
) -> anyhow::Result<TorrentRecord> {
    let magnet = debrix_core::Magnet::parse(uri)?;
    let title = magnet
        .display_name
        .clone()
        .filter(|dn| !dn.is_empty())
        .unwrap_or_else(|| fallback_title.to_string());
    let quality = debrix_core::quality::parse_quality(&title)
        .with_context(|| format!("no quality in {title:?}"))?;
    Ok(TorrentRecord::new(
        title,
        quality,
        magnet.info_hash,
        magnet.trackers,
    ))
}

/// The `S01E02` token scrape queries and episode filters use.
pub(crate) fn episode_tag(season: u32, episode: u32) -> String {
    format!("S{season:02}E{episode:02}")
}

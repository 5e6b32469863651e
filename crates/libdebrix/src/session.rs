use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::auth::OAuth2Refresher;
use crate::cache::{BoundedStore, KvStore, MemoryStore, RedisStore, Snapshotter, TypedCache};
use crate::debrid::{
    AllDebridClient, DebridClient, PremiumizeClient, ProviderTag, RealDebridClient,
};
use crate::indexers::{
    Aggregator, SourceHttpOptions, TorrentSource, apibay::ApibayClient, ibit::IbitClient,
    leetx::LeetxClient, rarbg::RarbgClient,
};
use crate::meta::{CinemetaClient, MetaFetcher};
use crate::streams::HandoffEntry;
use crate::{Error, Result};

#[derive(Clone)]
pub struct OAuth2Config {
    /// AES-256 key the user-data OAuth2 blobs are encrypted with.
    pub encryption_key: [u8; 32],
    pub rd_client_id: String,
    pub rd_client_secret: String,
    pub rd_token_url: String,
    pub pm_client_id: String,
    pub pm_client_secret: String,
    pub pm_token_url: String,
}

impl OAuth2Config {
    pub const DEFAULT_RD_TOKEN_URL: &'static str = "https://api.real-debrid.com/oauth/v2/token";
    pub const DEFAULT_PM_TOKEN_URL: &'static str = "https://www.premiumize.me/token";
}

#[cfg(test)]
impl OAuth2Config {
    pub(crate) fn for_tests() -> Self {
        Self {
            encryption_key: [0u8; 32],
            rd_client_id: "rd-client".to_string(),
            rd_client_secret: "rd-secret".to_string(),
            rd_token_url: Self::DEFAULT_RD_TOKEN_URL.to_string(),
            pm_client_id: "pm-client".to_string(),
            pm_client_secret: "pm-secret".to_string(),
            pm_token_url: Self::DEFAULT_PM_TOKEN_URL.to_string(),
        }
    }
}

pub struct SessionOptions {
    /// Externally reachable base URL, used to build placeholder stream URLs.
    pub base_url: String,
    /// Snapshot directory; `None` disables persistence.
    pub cache_dir: Option<PathBuf>,
    pub persist_interval: Duration,
    /// Per-request timeout for all outbound HTTP.
    pub request_timeout: Duration,
    pub search_timeout: Duration,
    pub slow_search_timeout: Duration,
    pub wait_for_download: Duration,
    pub max_age_torrents: Duration,
    pub max_age_meta: Duration,
    pub max_age_availability: Duration,
    pub token_expiration: Duration,
    pub handoff_ttl: Duration,
    pub stream_ttl: Duration,
    pub indexer_cache_capacity: usize,
    pub socks_proxy_url: Option<String>,
    pub extra_headers: Vec<(String, String)>,
    pub redis_url: Option<String>,
    pub oauth2: Option<OAuth2Config>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            cache_dir: None,
            persist_interval: Duration::from_secs(60 * 60),
            request_timeout: Duration::from_secs(5),
            search_timeout: Duration::from_secs(5),
            slow_search_timeout: Duration::from_secs(2),
            wait_for_download: Duration::from_secs(5),
            max_age_torrents: Duration::from_secs(7 * 24 * 60 * 60),
            max_age_meta: Duration::from_secs(30 * 24 * 60 * 60),
            max_age_availability: Duration::from_secs(24 * 60 * 60),
            token_expiration: Duration::from_secs(24 * 60 * 60),
            handoff_ttl: Duration::from_secs(24 * 60 * 60),
            stream_ttl: Duration::from_secs(10 * 24 * 60 * 60),
            indexer_cache_capacity: 16 * 1024,
            socks_proxy_url: None,
            extra_headers: Vec::new(),
            redis_url: None,
            oauth2: None,
        }
    }
}

/// The process-wide aggregate handlers work against: torrent sources, debrid
/// clients, every cache, and the per-fingerprint lock map.
pub struct Session {
    opts: SessionOptions,
    aggregator: Aggregator,
    debrid_clients: Vec<Arc<dyn DebridClient>>,
    handoff: TypedCache<HandoffEntry>,
    stream_urls: TypedCache<String>,
    // Grows monotonically; bounded in practice by distinct
    // (id, provider, quality) tuples.
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    oauth: Option<OAuth2Refresher>,
    snapshotter: Option<Arc<Snapshotter>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl Session {
    pub async fn new(opts: SessionOptions) -> anyhow::Result<Arc<Self>> {
        // One long-lived store for service state, one evictable store for
        // per-indexer results. With redis both concerns live remotely.
        let (state_store, results_store): (Arc<dyn KvStore>, Arc<dyn KvStore>) =
            match &opts.redis_url {
                Some(url) => {
                    let store: Arc<dyn KvStore> =
                        Arc::new(RedisStore::connect(url, "debrix").await?);
                    info!("using redis cache backend");
                    (store.clone(), store)
                }
                None => {
                    let capacity = NonZeroUsize::new(opts.indexer_cache_capacity)
                        .context("indexer cache capacity must be non-zero")?;
                    (
                        Arc::new(MemoryStore::new()),
                        Arc::new(BoundedStore::new(capacity)),
                    )
                }
            };

        let snapshotter = match (&opts.cache_dir, opts.redis_url.is_none()) {
            (Some(dir), true) => {
                let mut snapshotter = Snapshotter::new(dir.clone());
                snapshotter.register("state", state_store.clone());
                snapshotter.register("torrents", results_store.clone());
                let snapshotter = Arc::new(snapshotter);
                snapshotter.restore_all().await?;
                Some(snapshotter)
            }
            _ => None,
        };

        let source_opts = SourceHttpOptions {
            timeout: opts.request_timeout,
            socks_proxy_url: opts.socks_proxy_url.clone(),
            extra_headers: opts.extra_headers.clone(),
        };
        let meta: Arc<dyn MetaFetcher> = Arc::new(CinemetaClient::new(
            CinemetaClient::DEFAULT_BASE_URL.to_string(),
            opts.request_timeout,
            state_store.clone(),
            opts.max_age_meta,
        )?);

        let sources: Vec<Arc<dyn TorrentSource>> = vec![
            Arc::new(ApibayClient::new(
                ApibayClient::DEFAULT_BASE_URL.to_string(),
                source_opts.clone(),
                results_store.clone(),
                opts.max_age_torrents,
            )?),
            Arc::new(RarbgClient::new(
                RarbgClient::DEFAULT_BASE_URL.to_string(),
                source_opts.clone(),
                results_store.clone(),
                opts.max_age_torrents,
            )?),
            Arc::new(LeetxClient::new(
                LeetxClient::DEFAULT_BASE_URL.to_string(),
                source_opts.clone(),
                results_store.clone(),
                opts.max_age_torrents,
                meta.clone(),
            )?),
            Arc::new(IbitClient::new(
                IbitClient::DEFAULT_BASE_URL.to_string(),
                source_opts.clone(),
                results_store.clone(),
                opts.max_age_torrents,
                meta.clone(),
            )?),
        ];
        let aggregator = Aggregator::new(sources, opts.search_timeout, opts.slow_search_timeout);

        let debrid_clients: Vec<Arc<dyn DebridClient>> = vec![
            Arc::new(RealDebridClient::new(
                RealDebridClient::DEFAULT_BASE_URL.to_string(),
                opts.request_timeout,
                opts.extra_headers.clone(),
                state_store.clone(),
                opts.token_expiration,
                opts.max_age_availability,
                opts.wait_for_download,
            )?),
            Arc::new(AllDebridClient::new(
                AllDebridClient::DEFAULT_BASE_URL.to_string(),
                opts.request_timeout,
                opts.extra_headers.clone(),
                state_store.clone(),
                opts.token_expiration,
                opts.max_age_availability,
            )?),
            Arc::new(PremiumizeClient::new(
                PremiumizeClient::DEFAULT_BASE_URL.to_string(),
                opts.request_timeout,
                opts.extra_headers.clone(),
                state_store.clone(),
                opts.token_expiration,
                opts.max_age_availability,
            )?),
        ];

        let oauth = match opts.oauth2.clone() {
            Some(cfg) => Some(OAuth2Refresher::new(cfg, opts.request_timeout)?),
            None => None,
        };

        // The handoff cache must never evict; it rides the non-evicting
        // state store.
        let handoff = TypedCache::new("handoff", state_store.clone(), opts.handoff_ttl);
        let stream_urls = TypedCache::new("streams", state_store, opts.stream_ttl);

        let persist_interval = opts.persist_interval;
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let session = Arc::new(Session {
            opts,
            aggregator,
            debrid_clients,
            handoff,
            stream_urls,
            locks: DashMap::new(),
            oauth,
            snapshotter,
            shutdown_tx,
        });

        if let Some(snapshotter) = session.snapshotter.clone() {
            tokio::spawn(snapshotter.run(persist_interval, shutdown_rx));
        }
        Ok(session)
    }

    pub fn base_url(&self) -> &str {
        &self.opts.base_url
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn debrid_clients(&self) -> &[Arc<dyn DebridClient>] {
        &self.debrid_clients
    }

    pub fn debrid(&self, tag: ProviderTag) -> Result<Arc<dyn DebridClient>> {
        self.debrid_clients
            .iter()
            .find(|c| c.tag() == tag)
            .cloned()
            .ok_or_else(|| Error::Infra(anyhow::anyhow!("no debrid client for {tag}")))
    }

    pub fn oauth(&self) -> Option<&OAuth2Refresher> {
        self.oauth.as_ref()
    }

    pub(crate) fn handoff(&self) -> &TypedCache<HandoffEntry> {
        &self.handoff
    }

    pub(crate) fn stream_urls(&self) -> &TypedCache<String> {
        &self.stream_urls
    }

    /// The per-fingerprint mutex, created lazily by whichever handler gets
    /// there first (the redirect handler can be first after a restart).
    pub(crate) fn fingerprint_lock(&self, fingerprint: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(fingerprint.to_owned())
            .or_default()
            .value()
            .clone()
    }

    /// Signal shutdown and run the final snapshot persist.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(snapshotter) = &self.snapshotter {
            if let Err(e) = snapshotter.persist_all().await {
                warn!("error persisting caches on shutdown: {e:#}");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        sources: Vec<Arc<dyn TorrentSource>>,
        debrid_clients: Vec<Arc<dyn DebridClient>>,
        opts: SessionOptions,
    ) -> Arc<Self> {
        let state_store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);
        Arc::new(Session {
            aggregator: Aggregator::new(sources, opts.search_timeout, opts.slow_search_timeout),
            handoff: TypedCache::new("handoff", state_store.clone(), opts.handoff_ttl),
            stream_urls: TypedCache::new("streams", state_store, opts.stream_ttl),
            locks: DashMap::new(),
            oauth: None,
            snapshotter: None,
            shutdown_tx,
            debrid_clients,
            opts,
        })
    }
}

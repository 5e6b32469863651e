use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use debrix_core::{StreamId, TorrentRecord};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{SourceHttpOptions, TorrentSource, episode_tag};
use crate::cache::{KvStore, TypedCache};

const APP_ID: &str = "debrix";
const TOKEN_TTL: Duration = Duration::from_secs(14 * 60);
const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(2);
const ERR_NO_RESULTS: i64 = 20;

/// Token-authenticated JSON indexer. The API hands out short-lived tokens and
/// enforces one request per two seconds, so every call goes through a client
/// mutex that also owns the token.
pub struct RarbgClient {
    opts: SourceHttpOptions,
    client: reqwest::Client,
    base_url: String,
    cache: TypedCache<Vec<TorrentRecord>>,
    state: tokio::sync::Mutex<ClientState>,
}

#[derive(Default)]
struct ClientState {
    token: Option<(String, Instant)>,
    last_request: Option<Instant>,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    torrent_results: Vec<SearchRow>,
    error: Option<String>,
    error_code: Option<i64>,
}

#[derive(Deserialize)]
struct SearchRow {
    title: String,
    download: String,
}

impl RarbgClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://torrentapi.org";

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
            state: Default::default(),
        })
    }

    /// Sleep off `now - last_request`, then GET. Must run under the client
    /// mutex held by the caller.
    async fn throttled_get<T: serde::de::DeserializeOwned>(
        &self,
        state: &mut ClientState,
        query: &[(&str, &str)],
    ) -> anyhow::Result<T> {
        if let Some(last) = state.last_request {
            let since = last.elapsed();
            if since < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - since).await;
            }
        }
        state.last_request = Some(Instant::now());

        let url = format!("{}/pubapi_v2.php", self.base_url);
        let response = self
            .opts
            .apply_headers(self.client.get(&url).query(query))
            .send()
            .await
            .with_context(|| format!("error fetching {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("torrentapi responded with {}", response.status());
        }
        response.json().await.context("error decoding torrentapi response")
    }

    async fn fresh_token(&self, state: &mut ClientState) -> anyhow::Result<String> {
        if let Some((token, at)) = &state.token
            && at.elapsed() < TOKEN_TTL
        {
            return Ok(token.clone());
        }
        let response: TokenResponse = self
            .throttled_get(state, &[("get_token", "get_token"), ("app_id", APP_ID)])
            .await
            .context("error obtaining token")?;
        debug!("obtained fresh torrentapi token");
        state.token = Some((response.token.clone(), Instant::now()));
        Ok(response.token)
    }

    async fn search(&self, id: &StreamId) -> anyhow::Result<Vec<TorrentRecord>> {
        let mut state = self.state.lock().await;
        let token = self.fresh_token(&mut state).await?;

        let episode_query = id.episode.map(|e| episode_tag(e.season, e.episode));
        let mut query: Vec<(&str, &str)> = vec![
            ("mode", "search"),
            ("search_imdb", id.imdb_id.as_str()),
            ("format", "json_extended"),
            ("app_id", APP_ID),
            ("token", token.as_str()),
        ];
        if let Some(tag) = &episode_query {
            query.push(("search_string", tag.as_str()));
        }

        let response: SearchResponse = self.throttled_get(&mut state, &query).await?;
        drop(state);

        if let Some(error) = response.error {
            if response.error_code == Some(ERR_NO_RESULTS) {
                return Ok(Vec::new());
            }
            anyhow::bail!("torrentapi error: {error}");
        }

        let mut records = Vec::new();
        for row in response.torrent_results {
            match TorrentRecord::from_magnet(row.title, &row.download) {
                Ok(record) => records.push(record),
                Err(e) => warn!("dropping torrentapi row: {e}"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl TorrentSource for RarbgClient {
    fn name(&self) -> &'static str {
        "rarbg"
    }

    fn is_slow(&self) -> bool {
        true
    }

    async fn find(&self, id: &StreamId) -> anyhow::Result<Vec<TorrentRecord>> {
        let key = id.cache_key(self.name());
        if let Some(cached) = self.cache.get(&key).await? {
            debug!(id = %id, count = cached.len(), "rarbg cache hit");
            return Ok(cached);
        }
        let records = self.search(id).await?;
        self.cache.insert(&key, &records).await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::Query;
    use axum::{Router, routing::get};

    use super::*;
    use crate::cache::MemoryStore;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> RarbgClient {
        RarbgClient::new(
            base_url,
            SourceHttpOptions {
                timeout: Duration::from_secs(5),
                ..Default::default()
            },
            Arc::new(MemoryStore::new()),
            Duration::from_secs(3600),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_token_then_search() {
        static TOKEN_CALLS: AtomicUsize = AtomicUsize::new(0);
        let handler = |Query(params): Query<std::collections::HashMap<String, String>>| async move {
            if params.contains_key("get_token") {
                TOKEN_CALLS.fetch_add(1, Ordering::SeqCst);
                return r#"{"token":"abc123"}"#;
            }
            assert_eq!(params.get("token").map(String::as_str), Some("abc123"));
            r#"{"torrent_results":[
                {"title":"Big.Buck.Bunny.1080p.BluRay","download":"magnet:?xt=urn:btih:dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c&tr=udp://tracker.opentrackr.org:1337"},
                {"title":"Big.Buck.Bunny.NoQuality","download":"magnet:?xt=urn:btih:a621779b5e3d486e127c3efbca9b6f8d135f52e5"}
            ]}"#
        };
        let base = serve(Router::new().route("/pubapi_v2.php", get(handler))).await;
        let c = client(base);
        let id: StreamId = "tt1254207".parse().unwrap();
        let records = c.find(&id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].quality(), "1080p");
        assert_eq!(TOKEN_CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_results_error_code_is_empty() {
        let handler = |Query(params): Query<std::collections::HashMap<String, String>>| async move {
            if params.contains_key("get_token") {
                return r#"{"token":"abc123"}"#;
            }
            r#"{"error":"No results found","error_code":20}"#
        };
        let base = serve(Router::new().route("/pubapi_v2.php", get(handler))).await;
        let c = client(base);
        let id: StreamId = "tt0000002".parse().unwrap();
        assert!(c.find(&id).await.unwrap().is_empty());
    }
}

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use debrix_core::InfoHash;
use serde::Deserialize;
use tracing::{debug, warn};

use super::http::DebridHttp;
use super::{Credential, DebridClient, ProviderCaches, ProviderTag};
use crate::Error;
use crate::cache::KvStore;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// RealDebrid client. Streaming a magnet is a little dance: submit it, pick
/// the largest file, wait for the torrent to flip to `downloaded`, then
/// unrestrict the resulting link.
pub struct RealDebridClient {
    http: DebridHttp,
    base_url: String,
    caches: ProviderCaches,
    /// How long a submitted magnet may stay in `downloading`/`queued` before
    /// this attempt is abandoned. Instantly-available torrents flip almost
    /// immediately.
    wait_for_download: Duration,
}

#[derive(Deserialize)]
struct AddMagnetResponse {
    id: String,
}

#[derive(Deserialize)]
struct TorrentInfo {
    status: String,
    #[serde(default)]
    files: Vec<TorrentFile>,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Deserialize)]
struct TorrentFile {
    id: u64,
    bytes: u64,
}

#[derive(Deserialize)]
struct UnrestrictResponse {
    download: String,
}

impl RealDebridClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.real-debrid.com/rest/1.0";

    pub fn new(
        base_url: String,
        timeout: Duration,
        extra_headers: Vec<(String, String)>,
        store: Arc<dyn KvStore>,
        token_expiration: Duration,
        availability_max_age: Duration,
        wait_for_download: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: DebridHttp::new(timeout, extra_headers)?,
            base_url,
            caches: ProviderCaches::new(
                ProviderTag::RealDebrid,
                store,
                token_expiration,
                availability_max_age,
            ),
            wait_for_download,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl DebridClient for RealDebridClient {
    fn tag(&self) -> ProviderTag {
        ProviderTag::RealDebrid
    }

    async fn test_credential(&self, cred: &Credential) -> Result<(), Error> {
        if self.caches.credential_tested(&cred.secret).await {
            return Ok(());
        }
        let url = self.url("/user");
        self.http
            .send(self.http.get(&url).bearer_auth(&cred.secret), &url)
            .await?;
        self.caches.mark_credential(&cred.secret).await;
        Ok(())
    }

    async fn check_instant_availability(
        &self,
        cred: &Credential,
        hashes: &[InfoHash],
    ) -> Result<Vec<InfoHash>, Error> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let (cached, missing) = self.caches.partition_hashes(hashes).await;
        let mut confirmed: std::collections::HashSet<InfoHash> = cached.into_iter().collect();

        if !missing.is_empty() {
            // One call for the whole batch, hashes appended to the path.
            let joined = missing
                .iter()
                .map(|h| h.as_string())
                .collect::<Vec<_>>()
                .join("/");
            let url = self.url(&format!("/torrents/instantAvailability/{joined}"));
            let response: HashMap<String, serde_json::Value> = self
                .http
                .send_json(self.http.get(&url).bearer_auth(&cred.secret), &url)
                .await?;
            for (hash, hosters) in response {
                // Available hashes map to {"rd": [variants…]}; unavailable
                // ones come back as an empty array.
                let available = hosters
                    .get("rd")
                    .and_then(|v| v.as_array())
                    .is_some_and(|a| !a.is_empty());
                if !available {
                    continue;
                }
                match InfoHash::from_str(&hash) {
                    Ok(hash) => {
                        self.caches.mark_available(hash).await;
                        confirmed.insert(hash);
                    }
                    Err(e) => warn!("unparseable hash in availability response: {e}"),
                }
            }
        }

        Ok(hashes
            .iter()
            .copied()
            .filter(|h| confirmed.contains(h))
            .collect())
    }

    async fn get_stream_url(
        &self,
        cred: &Credential,
        magnet: &str,
        _origin_ip: Option<IpAddr>,
    ) -> Result<String, Error> {
        let url = self.url("/torrents/addMagnet");
        let added: AddMagnetResponse = self
            .http
            .send_json(
                self.http
                    .post(&url)
                    .bearer_auth(&cred.secret)
                    .form(&[("magnet", magnet)]),
                &url,
            )
            .await?;
        debug!(torrent_id = %added.id, "magnet submitted");

        let info_url = self.url(&format!("/torrents/info/{}", added.id));
        let info: TorrentInfo = self
            .http
            .send_json(self.http.get(&info_url).bearer_auth(&cred.secret), &info_url)
            .await?;
        let largest = info
            .files
            .iter()
            .max_by_key(|f| f.bytes)
            .ok_or_else(|| Error::upstream(&info_url, "torrent has no files"))?;

        let select_url = self.url(&format!("/torrents/selectFiles/{}", added.id));
        self.http
            .send(
                self.http
                    .post(&select_url)
                    .bearer_auth(&cred.secret)
                    .form(&[("files", largest.id.to_string())]),
                &select_url,
            )
            .await?;

        let deadline = Instant::now() + self.wait_for_download;
        let info = loop {
            let info: TorrentInfo = self
                .http
                .send_json(self.http.get(&info_url).bearer_auth(&cred.secret), &info_url)
                .await?;
            match info.status.as_str() {
                "downloaded" => break info,
                "magnet_error" | "error" | "virus" | "dead" => {
                    return Err(Error::upstream(
                        &info_url,
                        format!("terminal torrent status {:?}", info.status),
                    ));
                }
                status => {
                    if Instant::now() >= deadline {
                        return Err(Error::TimedOut(format!(
                            "waiting for download (stuck in {status:?})"
                        )));
                    }
                    debug!(%status, "torrent not ready, polling");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        };

        let link = info
            .links
            .first()
            .ok_or_else(|| Error::upstream(&info_url, "downloaded torrent has no links"))?;

        let unrestrict_url = self.url("/unrestrict/link");
        let mut form = vec![("link", link.clone())];
        if cred.remote {
            form.push(("remote", "1".to_string()));
        }
        let unrestricted: UnrestrictResponse = self
            .http
            .send_json(
                self.http
                    .post(&unrestrict_url)
                    .bearer_auth(&cred.secret)
                    .form(&form),
                &unrestrict_url,
            )
            .await?;
        Ok(unrestricted.download)
    }
}

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use debrix_core::InfoHash;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::http::DebridHttp;
use super::{Credential, DebridClient, ProviderCaches, ProviderTag};
use crate::Error;
use crate::cache::KvStore;

const AGENT: &str = "debrix";

/// AllDebrid client. The API always answers 200 and wraps everything in a
/// `{status, data|error}` envelope, so the interesting status mapping happens
/// on the envelope's error codes rather than on HTTP statuses.
pub struct AllDebridClient {
    http: DebridHttp,
    base_url: String,
    caches: ProviderCaches,
}

#[derive(Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    error: Option<EnvelopeError>,
}

#[derive(Deserialize)]
struct EnvelopeError {
    code: String,
    message: String,
}

#[derive(Deserialize)]
struct InstantData {
    #[serde(default)]
    magnets: Vec<InstantMagnet>,
}

#[derive(Deserialize)]
struct InstantMagnet {
    magnet: String,
    #[serde(default)]
    instant: bool,
}

#[derive(Deserialize)]
struct UploadData {
    #[serde(default)]
    magnets: Vec<UploadedMagnet>,
}

#[derive(Deserialize)]
struct UploadedMagnet {
    id: u64,
}

#[derive(Deserialize)]
struct StatusData {
    magnets: MagnetStatus,
}

#[derive(Deserialize)]
struct MagnetStatus {
    #[serde(default)]
    links: Vec<MagnetLink>,
}

#[derive(Deserialize)]
struct MagnetLink {
    link: String,
    #[serde(default)]
    size: u64,
}

#[derive(Deserialize)]
struct UnlockData {
    link: String,
}

fn unwrap_envelope<T>(envelope: Envelope<T>, endpoint: &str) -> Result<T, Error> {
    if envelope.status == "success"
        && let Some(data) = envelope.data
    {
        return Ok(data);
    }
    match envelope.error {
        Some(error) => match error.code.as_str() {
            "AUTH_BAD_APIKEY" | "AUTH_MISSING_APIKEY" => Err(Error::InvalidCredential),
            "AUTH_BLOCKED" | "AUTH_USER_BANNED" => Err(Error::AccountLocked),
            _ => Err(Error::upstream(
                endpoint,
                format!("{}: {}", error.code, error.message),
            )),
        },
        None => Err(Error::upstream(endpoint, "envelope with neither data nor error")),
    }
}

impl AllDebridClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.alldebrid.com/v4";

    pub fn new(
        base_url: String,
        timeout: Duration,
        extra_headers: Vec<(String, String)>,
        store: Arc<dyn KvStore>,
        token_expiration: Duration,
        availability_max_age: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: DebridHttp::new(timeout, extra_headers)?,
            base_url,
            caches: ProviderCaches::new(
                ProviderTag::AllDebrid,
                store,
                token_expiration,
                availability_max_age,
            ),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        cred: &Credential,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, Error> {
        let url = self.url(path);
        let rb = self
            .http
            .get(&url)
            .query(&[("agent", AGENT), ("apikey", cred.secret.as_str())])
            .query(query);
        let envelope: Envelope<T> = self.http.send_json(rb, &url).await?;
        unwrap_envelope(envelope, &url)
    }
}

#[async_trait]
impl DebridClient for AllDebridClient {
    fn tag(&self) -> ProviderTag {
        ProviderTag::AllDebrid
    }

    async fn test_credential(&self, cred: &Credential) -> Result<(), Error> {
        if self.caches.credential_tested(&cred.secret).await {
            return Ok(());
        }
        self.get_data::<serde_json::Value>(cred, "/user", &[])
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
            let url = self.url("/magnet/instant");
            let form: Vec<(&str, String)> = missing
                .iter()
                .map(|h| ("magnets[]", h.as_string()))
                .collect();
            let rb = self
                .http
                .post(&url)
                .query(&[("agent", AGENT), ("apikey", cred.secret.as_str())])
                .form(&form);
            let envelope: Envelope<InstantData> = self.http.send_json(rb, &url).await?;
            let data = unwrap_envelope(envelope, &url)?;
            for magnet in data.magnets {
                if !magnet.instant {
                    continue;
                }
                match InfoHash::from_str(&magnet.magnet) {
                    Ok(hash) => {
                        self.caches.mark_available(hash).await;
                        confirmed.insert(hash);
                    }
                    Err(e) => warn!("unparseable hash in instant response: {e}"),
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
        let uploaded: UploadData = self
            .get_data(cred, "/magnet/upload", &[("magnets[]", magnet)])
            .await?;
        let id = uploaded
            .magnets
            .first()
            .ok_or_else(|| Error::upstream(self.url("/magnet/upload"), "no magnet in response"))?
            .id
            .to_string();

        let status: StatusData = self
            .get_data(cred, "/magnet/status", &[("id", id.as_str())])
            .await?;
        let largest = status
            .magnets
            .links
            .iter()
            .max_by_key(|l| l.size)
            .ok_or_else(|| Error::upstream(self.url("/magnet/status"), "magnet has no links"))?;

        let unlocked: UnlockData = self
            .get_data(cred, "/link/unlock", &[("link", largest.link.as_str())])
            .await?;
        Ok(unlocked.link)
    }
}

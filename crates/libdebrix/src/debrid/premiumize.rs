use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use debrix_core::InfoHash;
use serde::Deserialize;

use super::http::DebridHttp;
use super::{Credential, DebridClient, ProviderCaches, ProviderTag};
use crate::Error;
use crate::cache::KvStore;

/// Premiumize client. The simplest of the three: a single `directdl` call
/// returns presigned download links for every file in the torrent.
pub struct PremiumizeClient {
    http: DebridHttp,
    base_url: String,
    caches: ProviderCaches,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Deserialize)]
struct CacheCheckResponse {
    status: String,
    #[serde(default)]
    response: Vec<bool>,
}

#[derive(Deserialize)]
struct DirectDlResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    content: Vec<DirectDlFile>,
}

#[derive(Deserialize)]
struct DirectDlFile {
    link: String,
    #[serde(default)]
    size: u64,
}

impl PremiumizeClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://www.premiumize.me/api";

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
                ProviderTag::Premiumize,
                store,
                token_expiration,
                availability_max_age,
            ),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl DebridClient for PremiumizeClient {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Premiumize
    }

    // Premiumize serves the download from its own CDN and throttles by the
    // requesting IP, so the user's IP is forwarded with directdl.
    fn forwards_origin_ip(&self) -> bool {
        true
    }

    async fn test_credential(&self, cred: &Credential) -> Result<(), Error> {
        if self.caches.credential_tested(&cred.secret).await {
            return Ok(());
        }
        let url = self.url("/account/info");
        let response: StatusResponse = self
            .http
            .send_json(
                self.http
                    .get(&url)
                    .query(&[("apikey", cred.secret.as_str())]),
                &url,
            )
            .await?;
        if response.status != "success" {
            return Err(Error::InvalidCredential);
        }
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
            let url = self.url("/cache/check");
            let form: Vec<(&str, String)> =
                missing.iter().map(|h| ("items[]", h.as_string())).collect();
            let response: CacheCheckResponse = self
                .http
                .send_json(
                    self.http
                        .post(&url)
                        .query(&[("apikey", cred.secret.as_str())])
                        .form(&form),
                    &url,
                )
                .await?;
            if response.status != "success" {
                return Err(Error::upstream(&url, "cache check reported failure"));
            }
            // The response array lines up with the submitted items.
            for (hash, available) in missing.iter().zip(response.response) {
                if available {
                    self.caches.mark_available(*hash).await;
                    confirmed.insert(*hash);
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
        origin_ip: Option<IpAddr>,
    ) -> Result<String, Error> {
        let url = self.url("/transfer/directdl");
        let mut form = vec![("src", magnet.to_string())];
        if let Some(ip) = origin_ip {
            form.push(("download_ip", ip.to_string()));
        }
        let response: DirectDlResponse = self
            .http
            .send_json(
                self.http
                    .post(&url)
                    .query(&[("apikey", cred.secret.as_str())])
                    .form(&form),
                &url,
            )
            .await?;
        if response.status != "success" {
            return Err(Error::upstream(
                &url,
                response.message.unwrap_or_else(|| "directdl failed".to_string()),
            ));
        }
        let largest = response
            .content
            .iter()
            .max_by_key(|f| f.size)
            .ok_or_else(|| Error::upstream(&url, "directdl returned no content"))?;
        Ok(largest.link.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use axum::routing::{get, post};
    use axum::{Form, Router};

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

    fn client(base_url: String) -> PremiumizeClient {
        PremiumizeClient::new(
            base_url,
            Duration::from_secs(5),
            Vec::new(),
            Arc::new(MemoryStore::new()),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_cache_check_positional_response() {
        let base = serve(Router::new().route(
            "/cache/check",
            post(|| async { r#"{"status":"success","response":[false,true]}"# }),
        ))
        .await;
        let c = client(base);
        let a = InfoHash::from_str("DD8255ECDC7CA55FB0BBF81323D87062DB1F6D1C").unwrap();
        let b = InfoHash::from_str("A621779B5E3D486E127C3EFBCA9B6F8D135F52E5").unwrap();
        let result = c
            .check_instant_availability(&Credential::new("key"), &[a, b])
            .await
            .unwrap();
        assert_eq!(result, vec![b]);
    }

    #[tokio::test]
    async fn test_directdl_picks_largest_and_forwards_ip() {
        #[derive(serde::Deserialize)]
        struct DlForm {
            src: String,
            download_ip: Option<String>,
        }
        let base = serve(Router::new().route(
            "/transfer/directdl",
            post(|Form(form): Form<DlForm>| async move {
                assert!(form.src.starts_with("magnet:"));
                assert_eq!(form.download_ip.as_deref(), Some("203.0.113.9"));
                r#"{"status":"success","content":[
                    {"path":"/sample.mkv","size":10,"link":"https://pm.example/small"},
                    {"path":"/movie.mkv","size":9000,"link":"https://pm.example/big"}
                ]}"#
            }),
        ))
        .await;
        let c = client(base);
        assert!(c.forwards_origin_ip());
        let url = c
            .get_stream_url(
                &Credential::new("key"),
                "magnet:?xt=urn:btih:dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c",
                Some("203.0.113.9".parse().unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(url, "https://pm.example/big");
    }

    #[tokio::test]
    async fn test_error_status_surfaces_message() {
        let base = serve(Router::new().route(
            "/account/info",
            get(|| async { r#"{"status":"error","message":"Invalid API key."}"# }),
        ))
        .await;
        let c = client(base);
        assert!(matches!(
            c.test_credential(&Credential::new("bad")).await,
            Err(Error::InvalidCredential)
        ));
    }
}

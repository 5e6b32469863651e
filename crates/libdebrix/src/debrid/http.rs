use std::time::Duration;

use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use http::StatusCode;
use tracing::debug;

use crate::Error;
use crate::user_agent;

const TRANSIENT_MARKER: &str = "transient upstream error";

/// Thin wrapper around a per-provider reqwest client: randomized desktop
/// User-Agent, operator-configured extra headers, a short retry for 429/5xx,
/// and the shared status mapping (401 is a bad credential, 403 a locked
/// account).
pub(crate) struct DebridHttp {
    client: reqwest::Client,
    extra_headers: Vec<(String, String)>,
}

impl DebridHttp {
    pub fn new(timeout: Duration, extra_headers: Vec<(String, String)>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("error building debrid HTTP client")?;
        Ok(Self {
            client,
            extra_headers,
        })
    }

    fn apply_headers(&self, mut rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb = rb.header(http::header::USER_AGENT, user_agent::random_desktop());
        for (name, value) in &self.extra_headers {
            rb = rb.header(name.as_str(), value.as_str());
        }
        rb
    }

    pub fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.apply_headers(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.apply_headers(self.client.post(url))
    }

    /// Send the request and surface the provider's verdict as a typed error.
    /// 429 and 5xx are retried twice with backoff before giving up.
    pub async fn send(
        &self,
        rb: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<reqwest::Response, Error> {
        let attempt = || async {
            // Form and JSON bodies are always cloneable; only streams are not.
            let rb = rb
                .try_clone()
                .context("request body is not retryable")?;
            let response = rb.send().await?;
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                anyhow::bail!("{TRANSIENT_MARKER} {status}");
            }
            Ok(response)
        };
        let result = attempt
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(250))
                    .with_max_times(2),
            )
            .when(|e: &anyhow::Error| e.to_string().starts_with(TRANSIENT_MARKER))
            .notify(|err, retry_in| debug!(?retry_in, "retrying {endpoint}: {err:#}"))
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if let Some(re) = e.downcast_ref::<reqwest::Error>() {
                    if re.is_timeout() {
                        return Err(Error::TimedOut(endpoint.to_string()));
                    }
                    return Err(Error::Infra(e.context(format!("error calling {endpoint}"))));
                }
                // Retries exhausted on 429/5xx.
                return Err(Error::upstream(endpoint, format!("{e:#}")));
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::InvalidCredential);
        }
        if status == StatusCode::FORBIDDEN {
            return Err(Error::AccountLocked);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(endpoint, format!("{status}: {body}")));
        }
        Ok(response)
    }

    /// `send` plus JSON decoding.
    pub async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        rb: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<T, Error> {
        let response = self.send(rb, endpoint).await?;
        response
            .json()
            .await
            .map_err(|e| Error::upstream(endpoint, format!("undecodable body: {e}")))
    }
}

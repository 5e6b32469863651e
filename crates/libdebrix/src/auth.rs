//! Credential middleware: decodes the user-data path blob, refreshes OAuth2
//! access tokens when needed, verifies the credential against the provider,
//! and attaches the result to the request for the handlers downstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Path, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;
use tracing::debug;

use crate::debrid::{Credential, ProviderTag};
use crate::session::{OAuth2Config, Session};
use crate::userdata::{self, OAuth2Token, UserData};
use crate::{ApiError, Error};

/// What the middleware attaches to authenticated requests.
#[derive(Clone, Debug)]
pub struct AuthInfo {
    pub provider: ProviderTag,
    pub credential: Credential,
    /// The raw path blob, reused verbatim in placeholder URLs and hashed
    /// into the stream-cache key.
    pub user_data_raw: String,
}

/// Exchanges refresh tokens for fresh access tokens.
pub struct OAuth2Refresher {
    http: reqwest::Client,
    cfg: OAuth2Config,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
}

// RealDebrid keeps open-source apps on the device-code flow, where the
// refresh uses the device grant with the refresh token passed as `code`.
const DEVICE_GRANT_TYPE: &str = "http://oauth.net/grant_type/device/1.0";

impl OAuth2Refresher {
    pub fn new(cfg: OAuth2Config, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("error building OAuth2 HTTP client")?;
        Ok(Self { http, cfg })
    }

    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.cfg.encryption_key
    }

    async fn refresh(&self, token_url: &str, form: &[(&str, &str)]) -> Result<String, Error> {
        let response = self
            .http
            .post(token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Infra(anyhow::Error::new(e).context("error refreshing token")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(token_url, format!("{status}: {body}")));
        }
        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| Error::upstream(token_url, format!("undecodable token response: {e}")))?;
        Ok(refreshed.access_token)
    }

    pub async fn refresh_realdebrid(&self, token: &OAuth2Token) -> Result<String, Error> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::BadRequest("OAuth2 token has no refresh token".to_string()))?;
        self.refresh(
            &self.cfg.rd_token_url,
            &[
                ("client_id", self.cfg.rd_client_id.as_str()),
                ("client_secret", self.cfg.rd_client_secret.as_str()),
                ("code", refresh_token),
                ("grant_type", DEVICE_GRANT_TYPE),
            ],
        )
        .await
    }

    pub async fn refresh_premiumize(&self, token: &OAuth2Token) -> Result<String, Error> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::BadRequest("OAuth2 token has no refresh token".to_string()))?;
        self.refresh(
            &self.cfg.pm_token_url,
            &[
                ("client_id", self.cfg.pm_client_id.as_str()),
                ("client_secret", self.cfg.pm_client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ],
        )
        .await
    }
}

enum OAuth2Provider {
    RealDebrid,
    Premiumize,
}

async fn oauth2_credential(
    oauth: Option<&OAuth2Refresher>,
    blob: &str,
    provider: OAuth2Provider,
) -> Result<String, Error> {
    let oauth = oauth
        .ok_or_else(|| Error::BadRequest("OAuth2 user data but OAuth2 is not configured".to_string()))?;
    let token = userdata::decrypt_oauth2_blob(oauth.encryption_key(), blob)?;
    if token.needs_refresh() {
        debug!("OAuth2 access token expired, refreshing");
        return match provider {
            OAuth2Provider::RealDebrid => oauth.refresh_realdebrid(&token).await,
            OAuth2Provider::Premiumize => oauth.refresh_premiumize(&token).await,
        };
    }
    Ok(token.access_token)
}

/// Turn a decoded blob into the provider choice plus a bearer credential.
pub async fn resolve_credential(
    user_data: &UserData,
    oauth: Option<&OAuth2Refresher>,
) -> Result<(ProviderTag, Credential), Error> {
    if let Some(token) = &user_data.rd_token {
        return Ok((
            ProviderTag::RealDebrid,
            Credential {
                secret: token.clone(),
                remote: user_data.rd_remote,
            },
        ));
    }
    if let Some(blob) = &user_data.rd_oauth2 {
        let access = oauth2_credential(oauth, blob, OAuth2Provider::RealDebrid).await?;
        return Ok((
            ProviderTag::RealDebrid,
            Credential {
                secret: access,
                remote: user_data.rd_remote,
            },
        ));
    }
    if let Some(key) = &user_data.ad_key {
        return Ok((ProviderTag::AllDebrid, Credential::new(key.clone())));
    }
    if let Some(key) = &user_data.pm_key {
        return Ok((ProviderTag::Premiumize, Credential::new(key.clone())));
    }
    if let Some(blob) = &user_data.pm_oauth2 {
        let access = oauth2_credential(oauth, blob, OAuth2Provider::Premiumize).await?;
        return Ok((ProviderTag::Premiumize, Credential::new(access)));
    }
    Err(Error::BadRequest(
        "user data names no debrid credential".to_string(),
    ))
}

/// Axum middleware guarding the stream and redirect routes.
pub async fn middleware(
    State(session): State<Arc<Session>>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let raw = params
        .get("user_data")
        .map(String::as_str)
        .unwrap_or_default();
    if raw.is_empty() {
        return Err(Error::Unauthorized.into());
    }

    let user_data = userdata::decode(raw)?;
    let (provider, credential) = resolve_credential(&user_data, session.oauth()).await?;
    session
        .debrid(provider)?
        .test_credential(&credential)
        .await?;

    request.extensions_mut().insert(AuthInfo {
        provider,
        credential,
        user_data_raw: raw.to_string(),
    });
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use axum::routing::post;
    use axum::{Form, Router};
    use base64::Engine;

    use super::*;

    #[tokio::test]
    async fn test_resolve_plain_tokens() {
        let rd = UserData {
            rd_token: Some("T".to_string()),
            rd_remote: true,
            ..Default::default()
        };
        let (provider, cred) = resolve_credential(&rd, None).await.unwrap();
        assert_eq!(provider, ProviderTag::RealDebrid);
        assert_eq!(cred.secret, "T");
        assert!(cred.remote);

        let ad = UserData {
            ad_key: Some("K".to_string()),
            ..Default::default()
        };
        let (provider, cred) = resolve_credential(&ad, None).await.unwrap();
        assert_eq!(provider, ProviderTag::AllDebrid);
        assert_eq!(cred.secret, "K");

        let pm = UserData {
            pm_key: Some("P".to_string()),
            ..Default::default()
        };
        let (provider, _) = resolve_credential(&pm, None).await.unwrap();
        assert_eq!(provider, ProviderTag::Premiumize);
    }

    #[tokio::test]
    async fn test_resolve_empty_is_bad_request() {
        assert!(matches!(
            resolve_credential(&UserData::default(), None).await,
            Err(Error::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_oauth2_without_config_is_bad_request() {
        let user_data = UserData {
            rd_oauth2: Some("whatever".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            resolve_credential(&user_data, None).await,
            Err(Error::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_realdebrid_refresh_uses_device_grant() {
        #[derive(serde::Deserialize)]
        struct TokenForm {
            code: String,
            grant_type: String,
        }
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let router = Router::new().route(
                "/oauth/v2/token",
                post(|Form(form): Form<TokenForm>| async move {
                    assert_eq!(form.grant_type, "http://oauth.net/grant_type/device/1.0");
                    assert_eq!(form.code, "REFRESH");
                    r#"{"access_token":"FRESH","expires_in":3600,"token_type":"Bearer"}"#
                }),
            );
            axum::serve(listener, router).await.unwrap();
        });

        let key = [3u8; 32];
        let cfg = OAuth2Config {
            encryption_key: key,
            rd_token_url: format!("http://{addr}/oauth/v2/token"),
            ..OAuth2Config::for_tests()
        };
        let refresher = OAuth2Refresher::new(cfg, Duration::from_secs(5)).unwrap();

        // An expired token inside a well-formed encrypted blob.
        let token = OAuth2Token {
            access_token: "STALE".to_string(),
            refresh_token: Some("REFRESH".to_string()),
            expires_at: Some(1),
        };
        let blob = {
            use aes_gcm::aead::{Aead, KeyInit, OsRng};
            use aes_gcm::{AeadCore, Aes256Gcm};
            let cipher = Aes256Gcm::new_from_slice(&key).unwrap();
            let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
            let mut out = nonce.to_vec();
            out.extend(
                cipher
                    .encrypt(&nonce, serde_json::to_vec(&token).unwrap().as_slice())
                    .unwrap(),
            );
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(out)
        };

        let user_data = UserData {
            rd_oauth2: Some(blob),
            ..Default::default()
        };
        let (provider, cred) = resolve_credential(&user_data, Some(&refresher))
            .await
            .unwrap();
        assert_eq!(provider, ProviderTag::RealDebrid);
        assert_eq!(cred.secret, "FRESH");
    }
}

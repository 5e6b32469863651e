//! The opaque user-data blob every addon URL carries: a URL-safe base64 JSON
//! object naming the user's debrid credential, with two legacy shapes kept
//! for installs that predate the JSON format.

use std::time::SystemTime;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::debrid::ProviderTag;

const NONCE_LEN: usize = 12;
const LEGACY_TOKEN_LEN: usize = 52;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserData {
    pub rd_token: Option<String>,
    /// Encrypted RealDebrid OAuth2 token blob; see [`decrypt_oauth2_blob`].
    pub rd_oauth2: Option<String>,
    pub rd_remote: bool,
    pub ad_key: Option<String>,
    pub pm_key: Option<String>,
    pub pm_oauth2: Option<String>,
}

impl UserData {
    /// Which provider this blob selects. RealDebrid wins when several are
    /// configured, matching the order the fields were introduced in.
    pub fn provider(&self) -> Option<ProviderTag> {
        if self.rd_token.is_some() || self.rd_oauth2.is_some() {
            Some(ProviderTag::RealDebrid)
        } else if self.ad_key.is_some() {
            Some(ProviderTag::AllDebrid)
        } else if self.pm_key.is_some() || self.pm_oauth2.is_some() {
            Some(ProviderTag::Premiumize)
        } else {
            None
        }
    }
}

fn is_legacy_token(s: &str) -> bool {
    s.len() == LEGACY_TOKEN_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn decode_base64_loose(s: &str) -> Option<Vec<u8>> {
    // URL-safe, padding optional; older clients still send standard base64.
    let trimmed = s.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .ok()
}

/// Decode the path blob. Three accepted shapes: a bare legacy RealDebrid
/// token (with optional `-remote` suffix), base64 of the JSON object, or an
/// opaque OAuth2 ciphertext (handled downstream as an encrypted RealDebrid
/// token).
pub fn decode(raw: &str) -> Result<UserData, Error> {
    if is_legacy_token(raw) {
        return Ok(UserData {
            rd_token: Some(raw.to_string()),
            ..Default::default()
        });
    }
    if let Some(token) = raw.strip_suffix("-remote")
        && is_legacy_token(token)
    {
        return Ok(UserData {
            rd_token: Some(token.to_string()),
            rd_remote: true,
            ..Default::default()
        });
    }

    let bytes = decode_base64_loose(raw)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| Error::BadRequest("user data is not base64".to_string()))?;
    match serde_json::from_slice::<UserData>(&bytes) {
        Ok(user_data) => Ok(user_data),
        // Not JSON: whole-blob OAuth2 ciphertext.
        Err(_) => Ok(UserData {
            rd_oauth2: Some(raw.to_string()),
            ..Default::default()
        }),
    }
}

/// An OAuth2 token as stored inside encrypted blobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds; `None` means the token never expires.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl OAuth2Token {
    /// Expired, or close enough to expiry that a refresh is due.
    pub fn needs_refresh(&self) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        now + 30 >= expires_at
    }
}

/// Decrypt an OAuth2 blob: base64 of `nonce || AES-256-GCM ciphertext` over
/// the serialized token.
pub fn decrypt_oauth2_blob(key: &[u8; 32], blob: &str) -> Result<OAuth2Token, Error> {
    let bytes = decode_base64_loose(blob)
        .ok_or_else(|| Error::BadRequest("OAuth2 blob is not base64".to_string()))?;
    if bytes.len() <= NONCE_LEN {
        return Err(Error::BadRequest("OAuth2 blob is too short".to_string()));
    }
    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| Error::BadRequest("bad OAuth2 key length".to_string()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::BadRequest("undecryptable OAuth2 blob".to_string()))?;
    serde_json::from_slice(&plaintext)
        .map_err(|_| Error::BadRequest("OAuth2 blob decrypts to garbage".to_string()))
}

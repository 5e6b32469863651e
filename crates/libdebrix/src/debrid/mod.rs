//! Debrid provider clients. Each provider turns an instantly-available
//! torrent into an ordinary HTTPS download; the three clients share one
//! trait plus the presence-only credential and availability caches.

pub mod alldebrid;
mod http;
pub mod premiumize;
pub mod realdebrid;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use debrix_core::InfoHash;
use serde::{Deserialize, Serialize};

pub use alldebrid::AllDebridClient;
pub use premiumize::PremiumizeClient;
pub use realdebrid::RealDebridClient;

use crate::Error;
use crate::cache::{KvStore, TypedCache};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderTag {
    RealDebrid,
    AllDebrid,
    Premiumize,
}

impl ProviderTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTag::RealDebrid => "rd",
            ProviderTag::AllDebrid => "ad",
            ProviderTag::Premiumize => "pm",
        }
    }
}

impl std::fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved debrid credential: API token, key, or OAuth2 access token.
#[derive(Clone)]
pub struct Credential {
    pub secret: String,
    /// RealDebrid remote-traffic flag; forwarded as `remote=1` on unrestrict.
    pub remote: bool,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            remote: false,
        }
    }
}

// Credentials end up in debug logs via request context; never print the
// secret itself.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential(<{} chars>, remote={})", self.secret.len(), self.remote)
    }
}

#[async_trait]
pub trait DebridClient: Send + Sync {
    fn tag(&self) -> ProviderTag;

    /// True when the provider wants the caller's originating IP forwarded
    /// with download requests.
    fn forwards_origin_ip(&self) -> bool {
        false
    }

    async fn test_credential(&self, cred: &Credential) -> Result<(), Error>;

    /// The subset of `hashes` the provider can serve instantly, in input
    /// order. Negative answers are never cached.
    async fn check_instant_availability(
        &self,
        cred: &Credential,
        hashes: &[InfoHash],
    ) -> Result<Vec<InfoHash>, Error>;

    async fn get_stream_url(
        &self,
        cred: &Credential,
        magnet: &str,
        origin_ip: Option<IpAddr>,
    ) -> Result<String, Error>;
}

/// Presence-only caches shared by the three clients. Absence only ever means
/// "untested" / "not confirmed", so deleting entries is always safe.
pub(crate) struct ProviderCaches {
    tag: ProviderTag,
    credentials: TypedCache<()>,
    availability: TypedCache<()>,
}

impl ProviderCaches {
    pub fn new(
        tag: ProviderTag,
        store: Arc<dyn KvStore>,
        token_expiration: Duration,
        availability_max_age: Duration,
    ) -> Self {
        Self {
            tag,
            credentials: TypedCache::new("credentials", store.clone(), token_expiration),
            availability: TypedCache::new("availability", store, availability_max_age),
        }
    }

    fn credential_key(&self, secret: &str) -> String {
        format!("{}-{}", self.tag, secret)
    }

    fn availability_key(&self, hash: InfoHash) -> String {
        format!("{}-{}", self.tag, hash)
    }

    pub async fn credential_tested(&self, secret: &str) -> bool {
        self.credentials
            .contains(&self.credential_key(secret))
            .await
            .unwrap_or(false)
    }

    /// Only successful validations are recorded. An invalid token may become
    /// valid within hours (the user pays), so the negative is never stored.
    pub async fn mark_credential(&self, secret: &str) {
        let _ = self.credentials.mark(&self.credential_key(secret)).await;
    }

    /// Split into (already-confirmed, needs-a-provider-call).
    pub async fn partition_hashes(&self, hashes: &[InfoHash]) -> (Vec<InfoHash>, Vec<InfoHash>) {
        let mut cached = Vec::new();
        let mut missing = Vec::new();
        for &hash in hashes {
            if self
                .availability
                .contains(&self.availability_key(hash))
                .await
                .unwrap_or(false)
            {
                cached.push(hash);
            } else {
                missing.push(hash);
            }
        }
        (cached, missing)
    }

    pub async fn mark_available(&self, hash: InfoHash) {
        let _ = self.availability.mark(&self.availability_key(hash)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::cache::MemoryStore;

    #[test]
    fn test_tags() {
        assert_eq!(ProviderTag::RealDebrid.to_string(), "rd");
        assert_eq!(ProviderTag::AllDebrid.to_string(), "ad");
        assert_eq!(ProviderTag::Premiumize.to_string(), "pm");
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let cred = Credential::new("SUPERSECRETTOKEN");
        assert!(!format!("{cred:?}").contains("SUPERSECRET"));
    }

    #[tokio::test]
    async fn test_availability_partition_is_per_provider() {
        let store = Arc::new(MemoryStore::new());
        let rd = ProviderCaches::new(
            ProviderTag::RealDebrid,
            store.clone(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        let ad = ProviderCaches::new(
            ProviderTag::AllDebrid,
            store,
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        let hash = InfoHash::from_str("DD8255ECDC7CA55FB0BBF81323D87062DB1F6D1C").unwrap();
        rd.mark_available(hash).await;

        let (cached, missing) = rd.partition_hashes(&[hash]).await;
        assert_eq!((cached.len(), missing.len()), (1, 0));
        // The same hash on another provider is still unconfirmed.
        let (cached, missing) = ad.partition_hashes(&[hash]).await;
        assert_eq!((cached.len(), missing.len()), (0, 1));
    }
}

//! The two halves of a playback: stream discovery (fan-out, availability
//! filter, quality bucketing, handoff write) and redirect resolution (lock,
//! cache, candidate-by-candidate conversion, 301).

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use debrix_core::{InfoHash, QualityBucket, StreamId, TorrentRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::auth::AuthInfo;
use crate::session::Session;
use crate::{Error, Result};

/// A cached empty result older than this no longer short-circuits; the next
/// click retries the candidates.
const EMPTY_RETRY_AFTER: Duration = Duration::from_secs(60);

/// One entry of a stream-discovery response.
#[derive(Clone, Debug, Serialize)]
pub struct StreamEntry {
    pub url: String,
    pub title: String,
}

/// What discovery hands to the redirect handler, keyed by fingerprint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandoffEntry {
    pub quality: String,
    pub candidates: Vec<TorrentRecord>,
}

fn user_hash(user_data_raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(user_data_raw.as_bytes()))
}

impl Session {
    /// Find torrents, keep what the user's provider can serve instantly,
    /// bucket by quality, and emit one placeholder URL per non-empty bucket.
    pub async fn discover_streams(
        &self,
        id: &StreamId,
        auth: &AuthInfo,
    ) -> Result<Vec<StreamEntry>> {
        let mut records = self.aggregator().find(id).await?;
        if records.is_empty() {
            return Err(Error::NotFound);
        }

        let client = self.debrid(auth.provider)?;
        let hashes: Vec<InfoHash> = records.iter().map(|r| r.info_hash()).collect();
        let available = match client
            .check_instant_availability(&auth.credential, &hashes)
            .await
        {
            Ok(available) => available,
            // A provider hiccup here is not fatal; the user just sees no
            // streams for now.
            Err(e) => {
                warn!("availability check failed, treating all as unavailable: {e:#}");
                Vec::new()
            }
        };
        if available.is_empty() {
            return Err(Error::NotFound);
        }
        let available: HashSet<InfoHash> = available.into_iter().collect();
        records.retain(|r| available.contains(&r.info_hash()));

        let mut entries = Vec::new();
        for bucket in QualityBucket::ALL {
            let candidates: Vec<TorrentRecord> = records
                .iter()
                .filter(|r| QualityBucket::of(r.quality()) == Some(bucket))
                .cloned()
                .collect();
            if candidates.is_empty() {
                continue;
            }
            // With a single candidate the exact quality (annotations and
            // all) is more useful than the bucket tag.
            let title = if candidates.len() == 1 {
                candidates[0].quality().to_string()
            } else {
                bucket.tag().to_string()
            };
            let fingerprint =
                format!("{}-{}-{}", id, auth.provider, bucket.fingerprint_tag());
            self.handoff()
                .insert(
                    &fingerprint,
                    &HandoffEntry {
                        quality: bucket.tag().to_string(),
                        candidates,
                    },
                )
                .await?;
            self.fingerprint_lock(&fingerprint);
            debug!(%fingerprint, "wrote handoff entry");

            entries.push(StreamEntry {
                url: format!(
                    "{}/{}/redirect/{}",
                    self.base_url(),
                    auth.user_data_raw,
                    urlencoding::encode(&fingerprint)
                ),
                title,
            });
        }
        Ok(entries)
    }

    /// Resolve a previously offered fingerprint to a direct stream URL.
    /// Serialized per fingerprint: the media player fires several of these
    /// concurrently for one click, and only the first may do provider work.
    pub async fn resolve_redirect(
        &self,
        fingerprint: &str,
        auth: &AuthInfo,
        origin_ip: Option<IpAddr>,
    ) -> Result<String> {
        let lock = self.fingerprint_lock(fingerprint);
        let _guard = lock.lock().await;

        let stream_key = format!("{}-{}", user_hash(&auth.user_data_raw), fingerprint);
        match self.stream_urls().get_with_age(&stream_key).await? {
            Some((url, _)) if !url.is_empty() => {
                debug!(%fingerprint, "resolved stream cache hit");
                return Ok(url);
            }
            Some((_, age)) if age <= EMPTY_RETRY_AFTER => {
                // All candidates failed moments ago; don't redo the work for
                // the player's rapid retries.
                return Err(Error::NotFound);
            }
            Some((_, age)) => {
                warn!(%fingerprint, ?age, "cached failure is stale, retrying");
            }
            None => {}
        }

        let Some(entry) = self.handoff().get(fingerprint).await? else {
            debug!(%fingerprint, "handoff entry missing or expired");
            return Err(Error::NotFound);
        };

        let client = self.debrid(auth.provider)?;
        let origin_ip = client.forwards_origin_ip().then_some(origin_ip).flatten();
        let mut resolved = String::new();
        for candidate in &entry.candidates {
            match client
                .get_stream_url(&auth.credential, candidate.magnet(), origin_ip)
                .await
            {
                Ok(url) => {
                    resolved = url;
                    break;
                }
                Err(e) => {
                    warn!(title = candidate.title(), "candidate failed, trying next: {e:#}")
                }
            }
        }

        // An empty result is cached too; see the age check above.
        self.stream_urls().insert(&stream_key, &resolved).await?;
        if resolved.is_empty() {
            return Err(Error::NotFound);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::SessionOptions;
    use crate::debrid::{Credential, DebridClient, ProviderTag};
    use crate::indexers::TorrentSource;

    struct FixedSource(Vec<TorrentRecord>);

    #[async_trait]
    impl TorrentSource for FixedSource {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn find(&self, _id: &StreamId) -> anyhow::Result<Vec<TorrentRecord>> {
            Ok(self.0.clone())
        }
    }

    /// Scriptable provider: every hash is available; stream URLs come from a
    /// queue of canned answers.
    struct ScriptedDebrid {
        stream_results: Mutex<Vec<Result<String>>>,
        stream_calls: AtomicUsize,
        stream_delay: Duration,
    }

    impl ScriptedDebrid {
        fn new(stream_results: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                stream_results: Mutex::new(stream_results),
                stream_calls: AtomicUsize::new(0),
                stream_delay: Duration::ZERO,
            })
        }
    }

    #[async_trait]
    impl DebridClient for ScriptedDebrid {
        fn tag(&self) -> ProviderTag {
            ProviderTag::RealDebrid
        }

        async fn test_credential(&self, _cred: &Credential) -> Result<()> {
            Ok(())
        }

        async fn check_instant_availability(
            &self,
            _cred: &Credential,
            hashes: &[InfoHash],
        ) -> Result<Vec<InfoHash>> {
            Ok(hashes.to_vec())
        }

        async fn get_stream_url(
            &self,
            _cred: &Credential,
            _magnet: &str,
            _origin_ip: Option<IpAddr>,
        ) -> Result<String> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            if !self.stream_delay.is_zero() {
                tokio::time::sleep(self.stream_delay).await;
            }
            let mut results = self.stream_results.lock();
            if results.is_empty() {
                return Err(Error::upstream("mock", "no scripted result left"));
            }
            results.remove(0)
        }
    }

    fn record(title: &str, quality: &str, hash: &str) -> TorrentRecord {
        TorrentRecord::new(
            title.to_string(),
            quality.to_string(),
            InfoHash::from_str(hash).unwrap(),
            Vec::new(),
        )
    }

    fn auth() -> AuthInfo {
        AuthInfo {
            provider: ProviderTag::RealDebrid,
            credential: Credential::new("AAA"),
            user_data_raw: "eyJyZFRva2VuIjoiQUFBIn0".to_string(),
        }
    }

    fn session(records: Vec<TorrentRecord>, debrid: Arc<ScriptedDebrid>) -> Arc<Session> {
        Session::for_tests(
            vec![Arc::new(FixedSource(records))],
            vec![debrid],
            SessionOptions {
                base_url: "http://addon.example".to_string(),
                ..Default::default()
            },
        )
    }

    const H1: &str = "DD8255ECDC7CA55FB0BBF81323D87062DB1F6D1C";
    const H2: &str = "A621779B5E3D486E127C3EFBCA9B6F8D135F52E5";
    const H3: &str = "CFE1119F124881CA70F7306F32E292194C88C195";
    const H4: &str = "0102030405060708090A0B0C0D0E0F1011121314";

    #[tokio::test]
    async fn test_happy_movie_path() {
        let debrid = ScriptedDebrid::new(vec![Ok("https://rd1.example/dl/xyz".to_string())]);
        let s = session(
            vec![record("Big Buck Bunny", "1080p", H1)],
            debrid.clone(),
        );
        let id: StreamId = "tt1254207".parse().unwrap();
        let auth = auth();

        let entries = s.discover_streams(&id, &auth).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "1080p");
        assert_eq!(
            entries[0].url,
            format!(
                "http://addon.example/{}/redirect/tt1254207-rd-1080p",
                auth.user_data_raw
            )
        );

        let url = s
            .resolve_redirect("tt1254207-rd-1080p", &auth, None)
            .await
            .unwrap();
        assert_eq!(url, "https://rd1.example/dl/xyz");

        // The resolved URL is now cached; another click costs no provider
        // call.
        let again = s
            .resolve_redirect("tt1254207-rd-1080p", &auth, None)
            .await
            .unwrap();
        assert_eq!(again, url);
        assert_eq!(debrid.stream_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_quality_bucketing_order_and_titles() {
        let debrid = ScriptedDebrid::new(vec![]);
        let s = session(
            vec![
                record("M 2160p HDR 10bit", "2160p 10bit", H4),
                record("M 720p WEB", "720p", H1),
                record("M 1080p 10bit BluRay", "1080p 10bit", H3),
                record("M 1080p BluRay", "1080p", H2),
            ],
            debrid,
        );
        let id: StreamId = "tt1234567".parse().unwrap();
        let entries = s.discover_streams(&id, &auth()).await.unwrap();
        let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["720p", "1080p", "1080p 10bit", "2160p 10bit"]);
    }

    #[tokio::test]
    async fn test_episode_fingerprint_is_path_escaped() {
        let debrid = ScriptedDebrid::new(vec![]);
        let s = session(vec![record("Show S05E14 1080p", "1080p", H1)], debrid);
        let id: StreamId = "tt0903747:5:14".parse().unwrap();
        let entries = s.discover_streams(&id, &auth()).await.unwrap();
        assert_eq!(entries.len(), 1);
        // Colons in episode ids must be escaped in the URL path.
        assert!(entries[0].url.ends_with("/redirect/tt0903747%3A5%3A14-rd-1080p"));
        // The handoff key is the unescaped fingerprint.
        assert!(
            s.handoff()
                .get("tt0903747:5:14-rd-1080p")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_no_streams_when_nothing_available() {
        struct NothingAvailable;

        #[async_trait]
        impl DebridClient for NothingAvailable {
            fn tag(&self) -> ProviderTag {
                ProviderTag::RealDebrid
            }
            async fn test_credential(&self, _cred: &Credential) -> Result<()> {
                Ok(())
            }
            async fn check_instant_availability(
                &self,
                _cred: &Credential,
                _hashes: &[InfoHash],
            ) -> Result<Vec<InfoHash>> {
                Ok(Vec::new())
            }
            async fn get_stream_url(
                &self,
                _cred: &Credential,
                _magnet: &str,
                _origin_ip: Option<IpAddr>,
            ) -> Result<String> {
                unreachable!("nothing is available")
            }
        }

        let s = Session::for_tests(
            vec![Arc::new(FixedSource(vec![record("M 1080p", "1080p", H1)]))],
            vec![Arc::new(NothingAvailable)],
            SessionOptions::default(),
        );
        let id: StreamId = "tt1254207".parse().unwrap();
        assert!(matches!(
            s.discover_streams(&id, &auth()).await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_missing_handoff_is_not_found_and_not_cached() {
        let debrid = ScriptedDebrid::new(vec![]);
        let s = session(vec![], debrid);
        let auth = auth();
        assert!(matches!(
            s.resolve_redirect("tt0000001-rd-1080p", &auth, None).await,
            Err(Error::NotFound)
        ));
        let key = format!("{}-tt0000001-rd-1080p", user_hash(&auth.user_data_raw));
        assert!(s.stream_urls().get_with_age(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_clicks_serialize_on_fingerprint() {
        let debrid = Arc::new(ScriptedDebrid {
            stream_results: Mutex::new(vec![Ok("https://rd1.example/dl/u".to_string())]),
            stream_calls: AtomicUsize::new(0),
            stream_delay: Duration::from_millis(200),
        });
        let s = session(vec![record("M 1080p", "1080p", H1)], debrid.clone());
        let id: StreamId = "tt1254207".parse().unwrap();
        let auth = auth();
        s.discover_streams(&id, &auth).await.unwrap();

        let (s1, s2) = (s.clone(), s.clone());
        let (a1, a2) = (auth.clone(), auth.clone());
        let first =
            tokio::spawn(async move { s1.resolve_redirect("tt1254207-rd-1080p", &a1, None).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second =
            tokio::spawn(async move { s2.resolve_redirect("tt1254207-rd-1080p", &a2, None).await });

        let u1 = first.await.unwrap().unwrap();
        let u2 = second.await.unwrap().unwrap();
        assert_eq!(u1, u2);
        // The second request observed the cache written by the first; one
        // provider call total.
        assert_eq!(debrid.stream_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_candidates_fall_through_to_next() {
        let debrid = ScriptedDebrid::new(vec![
            Err(Error::upstream("rd", "dead torrent")),
            Ok("https://rd1.example/dl/second".to_string()),
        ]);
        let s = session(
            vec![
                record("M 1080p first", "1080p", H1),
                record("M 1080p second", "1080p", H2),
            ],
            debrid.clone(),
        );
        let id: StreamId = "tt1254207".parse().unwrap();
        let auth = auth();
        s.discover_streams(&id, &auth).await.unwrap();
        let url = s
            .resolve_redirect("tt1254207-rd-1080p", &auth, None)
            .await
            .unwrap();
        assert_eq!(url, "https://rd1.example/dl/second");
        assert_eq!(debrid.stream_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_candidates_fail_caches_empty_then_short_circuits() {
        let debrid = ScriptedDebrid::new(vec![Err(Error::upstream("rd", "nope"))]);
        let s = session(vec![record("M 1080p", "1080p", H1)], debrid.clone());
        let id: StreamId = "tt1254207".parse().unwrap();
        let auth = auth();
        s.discover_streams(&id, &auth).await.unwrap();

        // First click: the candidate fails, the empty result is cached.
        assert!(matches!(
            s.resolve_redirect("tt1254207-rd-1080p", &auth, None).await,
            Err(Error::NotFound)
        ));
        assert_eq!(debrid.stream_calls.load(Ordering::SeqCst), 1);

        // Second click right after: short-circuits on the young empty entry
        // without touching the provider again.
        assert!(matches!(
            s.resolve_redirect("tt1254207-rd-1080p", &auth, None).await,
            Err(Error::NotFound)
        ));
        assert_eq!(debrid.stream_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_cache_is_per_user() {
        let debrid = ScriptedDebrid::new(vec![
            Ok("https://rd1.example/dl/user-a".to_string()),
            Ok("https://rd1.example/dl/user-b".to_string()),
        ]);
        let s = session(vec![record("M 1080p", "1080p", H1)], debrid.clone());
        let id: StreamId = "tt1254207".parse().unwrap();
        let auth_a = auth();
        let mut auth_b = auth();
        auth_b.user_data_raw = "eyJyZFRva2VuIjoiQkJCIn0".to_string();

        s.discover_streams(&id, &auth_a).await.unwrap();
        let u_a = s
            .resolve_redirect("tt1254207-rd-1080p", &auth_a, None)
            .await
            .unwrap();
        let u_b = s
            .resolve_redirect("tt1254207-rd-1080p", &auth_b, None)
            .await
            .unwrap();
        assert_ne!(u_a, u_b);
        assert_eq!(debrid.stream_calls.load(Ordering::SeqCst), 2);
    }
}

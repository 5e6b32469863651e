use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::KvStore;

#[derive(Serialize, serde::Deserialize)]
struct Item<T> {
    value: T,
    created: SystemTime,
}

/// Serde + TTL layer over a [`KvStore`]. Each cache owns a name that scopes
/// its keys, so several caches can share one backend.
pub struct TypedCache<T> {
    name: &'static str,
    store: Arc<dyn KvStore>,
    max_age: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for TypedCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypedCache({})", self.name)
    }
}

impl<T> TypedCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(name: &'static str, store: Arc<dyn KvStore>, max_age: Duration) -> Self {
        Self {
            name,
            store,
            max_age,
            _marker: PhantomData,
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.name, key)
    }

    /// A fresh value, or `None` on miss or expiry.
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<T>> {
        Ok(self.get_with_age(key).await?.map(|(value, _)| value))
    }

    /// A fresh value together with its age. Expired entries are dropped from
    /// the backend and reported as a miss.
    pub async fn get_with_age(&self, key: &str) -> anyhow::Result<Option<(T, Duration)>> {
        let full_key = self.key(key);
        let bytes = match self.store.get(&full_key).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let (item, _): (Item<T>, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .with_context(|| format!("corrupt cache entry {full_key}"))?;
        // Clock went backwards => treat as just created.
        let age = item.created.elapsed().unwrap_or_default();
        if age > self.max_age {
            let _ = self.store.del(&full_key).await;
            return Ok(None);
        }
        Ok(Some((item.value, age)))
    }

    pub async fn insert(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let item = Item {
            value,
            created: SystemTime::now(),
        };
        let bytes = bincode::serde::encode_to_vec(&item, bincode::config::standard())
            .context("error encoding cache entry")?;
        self.store
            .set(&self.key(key), bytes, Some(self.max_age))
            .await
    }

    pub async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.store.del(&self.key(key)).await
    }
}

/// Presence-only helpers used by the availability and credential caches.
/// There is deliberately no way to store a negative result.
impl TypedCache<()> {
    pub async fn mark(&self, key: &str) -> anyhow::Result<()> {
        self.insert(key, &()).await
    }

    pub async fn contains(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    fn cache<T>(max_age: Duration) -> TypedCache<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        TypedCache::new("test", Arc::new(MemoryStore::new()), max_age)
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let c: TypedCache<Vec<String>> = cache(Duration::from_secs(60));
        assert!(c.get("k").await.unwrap().is_none());
        c.insert("k", &vec!["a".to_string()]).await.unwrap();
        assert_eq!(c.get("k").await.unwrap(), Some(vec!["a".to_string()]));
    }

    #[tokio::test]
    async fn test_expiry_is_a_miss() {
        let c: TypedCache<u32> = cache(Duration::ZERO);
        c.insert("k", &7).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(c.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_presence_only_marks() {
        let c: TypedCache<()> = cache(Duration::from_secs(60));
        assert!(!c.contains("AAA").await.unwrap());
        c.mark("AAA").await.unwrap();
        assert!(c.contains("AAA").await.unwrap());
        // Removing a mark is always safe: it only forces revalidation.
        c.remove("AAA").await.unwrap();
        assert!(!c.contains("AAA").await.unwrap());
    }

    #[tokio::test]
    async fn test_name_scopes_keys() {
        let store = Arc::new(MemoryStore::new());
        let a: TypedCache<u32> =
            TypedCache::new("a", store.clone(), Duration::from_secs(60));
        let b: TypedCache<u32> = TypedCache::new("b", store, Duration::from_secs(60));
        a.insert("k", &1).await.unwrap();
        assert!(b.get("k").await.unwrap().is_none());
    }
}

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use super::KvStore;

/// Bounded in-memory store with LRU eviction. Used where losing an entry only
/// costs a repeat upstream call (per-indexer result caches); never for the
/// handoff cache.
pub struct BoundedStore {
    map: Mutex<LruCache<String, Vec<u8>>>,
}

impl BoundedStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            map: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl std::fmt::Debug for BoundedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.map.lock();
        write!(f, "BoundedStore({}/{} entries)", map.len(), map.cap())
    }
}

#[async_trait]
impl KvStore for BoundedStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.map.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>, _ttl: Option<Duration>) -> anyhow::Result<()> {
        self.map.lock().put(key.to_owned(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.map.lock().pop(key);
        Ok(())
    }

    async fn dump(&self) -> anyhow::Result<Option<Vec<(String, Vec<u8>)>>> {
        // Most-recently-used first; restore() re-inserts in reverse so the
        // recency order survives the round-trip.
        Ok(Some(
            self.map
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ))
    }

    async fn restore(&self, entries: Vec<(String, Vec<u8>)>) -> anyhow::Result<()> {
        let mut map = self.map.lock();
        map.clear();
        for (k, v) in entries.into_iter().rev() {
            map.put(k, v);
        }
        Ok(())
    }
}

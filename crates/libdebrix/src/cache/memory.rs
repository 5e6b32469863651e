use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::KvStore;

/// Unbounded in-memory store. Never evicts, which makes it the only backend
/// allowed to carry handoff entries: the redirect handler must find what the
/// stream handler wrote, memory pressure or not.
#[derive(Default)]
pub struct MemoryStore {
    map: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryStore({} entries)", self.map.len())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, _ttl: Option<Duration>) -> anyhow::Result<()> {
        self.map.insert(key.to_owned(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn dump(&self) -> anyhow::Result<Option<Vec<(String, Vec<u8>)>>> {
        Ok(Some(
            self.map
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        ))
    }

    async fn restore(&self, entries: Vec<(String, Vec<u8>)>) -> anyhow::Result<()> {
        self.map.clear();
        for (k, v) in entries {
            self.map.insert(k, v);
        }
        Ok(())
    }
}

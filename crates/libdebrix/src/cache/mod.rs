//! Unified key-value cache used for every piece of cached state: indexer
//! results, metadata, availability and credential marks, handoff entries and
//! resolved streams.
//!
//! Backends are byte-oriented; [`TypedCache`] layers serde + TTL on top.
//! TTLs are enforced on read, so an in-memory backend never needs a timer
//! wheel, and snapshots can persist entries together with their creation
//! times.

pub mod bounded;
pub mod memory;
pub mod redis;
pub mod snapshot;
mod typed;

use std::time::Duration;

use async_trait::async_trait;

pub use bounded::BoundedStore;
pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use snapshot::Snapshotter;
pub use typed::TypedCache;

/// A concurrent byte-oriented key-value store.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Insert a value. `ttl` is advisory: remote backends use it to bound
    /// their own growth, in-memory backends rely on read-side expiry plus
    /// eviction (where the backend evicts at all).
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()>;

    async fn del(&self, key: &str) -> anyhow::Result<()>;

    /// Dump every entry for snapshot persistence. Remote stores return
    /// `None`: their state already survives the process.
    async fn dump(&self) -> anyhow::Result<Option<Vec<(String, Vec<u8>)>>>;

    /// Replace the store contents from a snapshot.
    async fn restore(&self, entries: Vec<(String, Vec<u8>)>) -> anyhow::Result<()>;
}

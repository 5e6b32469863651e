use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::AsyncCommands;

use super::KvStore;

/// Remote key-value backend. Lets several addon instances share availability
/// marks, handoff entries and resolved streams. The connection manager
/// reconnects by itself, so a blip only fails the requests in flight.
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
    prefix: String,
}

impl RedisStore {
    pub async fn connect(url: &str, prefix: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid redis URL")?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .context("error connecting to redis")?;
        Ok(Self {
            conn,
            prefix: prefix.to_owned(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RedisStore(prefix={})", self.prefix)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn
            .get(self.key(key))
            .await
            .context("redis GET failed")?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            // Double the advisory TTL so read-side expiry still decides
            // freshness; redis only bounds growth.
            Some(ttl) => {
                let secs = ttl.as_secs().saturating_mul(2).max(1);
                conn.set_ex::<_, _, ()>(self.key(key), value, secs)
                    .await
                    .context("redis SETEX failed")?
            }
            None => conn
                .set::<_, _, ()>(self.key(key), value)
                .await
                .context("redis SET failed")?,
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(key))
            .await
            .context("redis DEL failed")?;
        Ok(())
    }

    async fn dump(&self) -> anyhow::Result<Option<Vec<(String, Vec<u8>)>>> {
        Ok(None)
    }

    async fn restore(&self, _entries: Vec<(String, Vec<u8>)>) -> anyhow::Result<()> {
        Ok(())
    }
}

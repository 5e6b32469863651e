use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::KvStore;

/// Persists in-memory stores to disk on a fixed cadence and restores them on
/// start. One file per registered store; a missing or corrupt file is
/// silently replaced by an empty cache.
pub struct Snapshotter {
    dir: PathBuf,
    stores: Vec<(&'static str, Arc<dyn KvStore>)>,
}

impl Snapshotter {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            stores: Vec::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, store: Arc<dyn KvStore>) {
        self.stores.push((name, store));
    }

    fn filename(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.snapshot"))
    }

    pub async fn restore_all(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("couldn't create snapshot directory {:?}", self.dir))?;
        for (name, store) in &self.stores {
            let filename = self.filename(name);
            let bytes = match tokio::fs::read(&filename).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(?filename, error=?e, "error reading snapshot, starting empty");
                    continue;
                }
            };
            let entries: Vec<(String, Vec<u8>)> =
                match bincode::decode_from_slice(&bytes, bincode::config::standard()) {
                    Ok((entries, _)) => entries,
                    Err(e) => {
                        warn!(?filename, error=?e, "corrupt snapshot, starting empty");
                        continue;
                    }
                };
            let count = entries.len();
            store.restore(entries).await?;
            info!(cache = name, count, "restored cache snapshot");
        }
        Ok(())
    }

    pub async fn persist_all(&self) -> anyhow::Result<()> {
        for (name, store) in &self.stores {
            let entries = match store.dump().await? {
                Some(entries) => entries,
                // Remote store; nothing to snapshot.
                None => continue,
            };
            let count = entries.len();
            let bytes = bincode::encode_to_vec(&entries, bincode::config::standard())
                .context("error encoding snapshot")?;
            let filename = self.filename(name);
            let tmp_filename = self.dir.join(format!("{name}.snapshot.tmp"));
            let mut tmp = tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&tmp_filename)
                .await
                .with_context(|| format!("error opening {tmp_filename:?}"))?;
            tmp.write_all(&bytes)
                .await
                .with_context(|| format!("error writing {tmp_filename:?}"))?;
            tokio::fs::rename(&tmp_filename, &filename)
                .await
                .context("error renaming snapshot file")?;
            debug!(cache = name, count, "persisted cache snapshot");
        }
        Ok(())
    }

    /// Persist on a fixed cadence until shutdown is signalled. The tick that
    /// races with shutdown is skipped; the caller does one final persist.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would re-write what we just restored.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    if let Err(e) = self.persist_all().await {
                        warn!("error persisting cache snapshots: {e:#}");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }
}

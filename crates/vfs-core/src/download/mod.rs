//! Download cache (spec §4.5): a long-lived, shared temp file for
//! providers whose download URLs forbid HTTP Range.
//!
//! The first [`DownloadCache::open_for_read`] call for a given media key
//! starts a background writer streaming the remote response into a temp
//! file; later openers share that same file. Readers wait on a
//! [`tokio::sync::Notify`] rather than spin (spec §9 open question,
//! resolved in favor of a notification primitive).

mod entry;
mod reader;

pub use entry::SeekFrom;
pub use reader::DownloadReader;

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use entry::DownloadEntry;

pub type BoxByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Opens a byte stream for a media key. Adapters implement this against
/// whatever transport they use (spec §1: the concrete HTTP client is
/// injected).
#[async_trait]
pub trait MediaSource: Send + Sync + 'static {
    async fn open(&self, media_key: &str) -> Result<BoxByteStream>;
}

#[derive(Debug, Clone)]
pub struct DownloadCacheConfig {
    pub temp_dir: PathBuf,
    /// Grace period after the last reader closes before the temp file is
    /// deleted (spec §4.5: 30s).
    pub grace_period: Duration,
    /// [ADDED, spec §9 open question] optional on-disk footprint cap;
    /// idle (refCount == 0) entries are evicted LRU-first once exceeded.
    pub max_total_bytes: Option<u64>,
}

impl Default for DownloadCacheConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            grace_period: Duration::from_secs(30),
            max_total_bytes: None,
        }
    }
}

pub struct DownloadCache<S: MediaSource> {
    source: Arc<S>,
    config: DownloadCacheConfig,
    entries: Mutex<HashMap<String, Arc<DownloadEntry>>>,
    self_weak: Weak<Self>,
}

impl<S: MediaSource> DownloadCache<S> {
    pub fn new(source: S, config: DownloadCacheConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            source: Arc::new(source),
            config,
            entries: Mutex::new(HashMap::new()),
            self_weak: weak.clone(),
        })
    }

    /// Opens `media_key` for reading. At most one background download runs
    /// per key; concurrent openers share it (spec §8 testable property).
    pub async fn open_for_read(
        &self,
        media_key: &str,
        total_size: Option<u64>,
    ) -> Result<DownloadReader> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(media_key) {
            existing.acquire();
            debug!(media_key, "download cache: joining in-flight download");
            let entry = existing.clone();
            drop(entries);
            return DownloadReader::open(entry, self.release_hook(media_key)).await;
        }

        self.evict_for_capacity(&mut entries, total_size).await;

        let tmp_path = self
            .config
            .temp_dir
            .join(format!("vfs-dl-{}", sanitize(media_key)));
        fs::File::create(&tmp_path).await?;

        let entry = Arc::new(DownloadEntry::new(media_key.to_string(), tmp_path.clone(), total_size));
        entries.insert(media_key.to_string(), entry.clone());
        drop(entries);

        self.spawn_writer(entry.clone());
        info!(media_key, path = %tmp_path.display(), "download cache: started background download");
        DownloadReader::open(entry, self.release_hook(media_key)).await
    }

    /// Closure invoked once a reader drops the last reference to an entry;
    /// the entry itself holds no back-reference to the cache.
    fn release_hook(&self, media_key: &str) -> Arc<dyn Fn() + Send + Sync> {
        let weak = self.self_weak.clone();
        let key = media_key.to_string();
        Arc::new(move || {
            if let Some(this) = weak.upgrade() {
                this.schedule_eviction(key.clone());
            }
        })
    }

    fn spawn_writer(&self, entry: Arc<DownloadEntry>) {
        let Some(this) = self.self_weak.upgrade() else { return };
        tokio::spawn(async move {
            let result = this.run_writer(&entry).await;
            if let Err(e) = &result {
                warn!(media_key = %entry.media_key, error = %e, "download cache: writer failed");
            }
            entry.finish(result.err().map(|e| e.to_string()));
        });
    }

    async fn run_writer(&self, entry: &Arc<DownloadEntry>) -> Result<()> {
        use futures_util::StreamExt;
        let mut stream = self.source.open(&entry.media_key).await?;
        let mut file = fs::OpenOptions::new().write(true).open(&entry.tmp_path).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            entry.advance(chunk.len() as u64);
        }
        file.flush().await?;
        Ok(())
    }

    /// Called once the last reader of an entry closes. Schedules eviction
    /// after the grace period unless a new opener arrives first.
    fn schedule_eviction(&self, media_key: String) {
        let Some(this) = self.self_weak.upgrade() else { return };
        let grace = self.config.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut entries = this.entries.lock().await;
            if let Some(entry) = entries.get(&media_key) {
                if entry.ref_count() == 0 {
                    debug!(media_key, "download cache: evicting idle entry after grace period");
                    let entry = entries.remove(&media_key).unwrap();
                    drop(entries);
                    let _ = fs::remove_file(&entry.tmp_path).await;
                }
            }
        });
    }

    async fn evict_for_capacity(
        &self,
        entries: &mut HashMap<String, Arc<DownloadEntry>>,
        incoming_size: Option<u64>,
    ) {
        let Some(cap) = self.config.max_total_bytes else { return };
        let incoming = incoming_size.unwrap_or(0);
        let mut idle: Vec<_> = entries
            .values()
            .filter(|e| e.ref_count() == 0)
            .cloned()
            .collect();
        idle.sort_by_key(|e| e.start_time);
        let mut total: u64 = entries.values().map(|e| e.written()).sum::<u64>() + incoming;
        let mut idle = idle.into_iter();
        while total > cap {
            let Some(victim) = idle.next() else { break };
            total = total.saturating_sub(victim.written());
            entries.remove(&victim.media_key);
            let path = victim.tmp_path.clone();
            tokio::spawn(async move {
                let _ = fs::remove_file(&path).await;
            });
        }
    }

    /// Unconditionally closes and deletes every temp file (spec §4.5, §5).
    pub async fn shutdown(&self) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            let _ = fs::remove_file(&entry.tmp_path).await;
        }
    }
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

//! Disk-backed media cache.
//!
//! Maps a [`MediaKey`] to a cached binary blob stored as
//! `"{key}.{format}"` under a single cache directory, so the whole index is
//! reconstructible from disk alone after a restart. The cache is softly
//! bounded: [`MediaCache::put`] makes room by evicting TTL-expired entries
//! first and then the least-recently-used survivors, but a single payload
//! larger than the cap is still accepted.
//!
//! An index entry exists iff its backing file exists on disk and has not
//! exceeded its TTL; lookups that find a stale or externally-deleted file
//! drop the entry as a side effect.

mod eviction;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::{CoreError, Result},
    media::{AudioFormat, MediaKey},
};
use eviction::{CandidateEntry, plan_evictions};

/// One cached media item. `size_bytes` is read back from the filesystem
/// after every write, never trusted from the caller.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: MediaKey,
    pub storage_path: PathBuf,
    pub display_name: String,
    pub size_bytes: u64,
    pub format: AudioFormat,
    pub cached_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MediaCacheLimits {
    pub max_total_bytes: u64,
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl MediaCacheLimits {
    pub const fn defaults() -> Self {
        Self {
            max_total_bytes: 100 * 1024 * 1024,
            ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for MediaCacheLimits {
    fn default() -> Self {
        Self::defaults()
    }
}

#[derive(Debug)]
pub struct MediaCache {
    root: PathBuf,
    limits: MediaCacheLimits,
    index: Mutex<HashMap<MediaKey, CacheEntry>>,
}

impl MediaCache {
    /// Open (or create) the cache directory and rebuild the index from the
    /// files already present. Files that do not match `"{key}.{format}"`
    /// are left alone.
    pub async fn open(root: impl Into<PathBuf>, limits: MediaCacheLimits) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let index = rebuild_index(&root).await?;
        info!(
            entries = index.len(),
            root = %root.display(),
            "media cache opened"
        );

        Ok(Self {
            root,
            limits,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True iff an index entry exists, its backing file is still on disk,
    /// and it has not outlived the TTL. Stale entries are dropped here so
    /// the index self-heals on lookup.
    pub async fn is_cached(&self, key: MediaKey) -> bool {
        let mut index = self.index.lock().await;

        let Some(entry) = index.get(&key) else {
            return false;
        };

        if Utc::now() - entry.cached_at > chrono_ttl(self.limits.ttl) {
            if let Some(entry) = index.remove(&key) {
                drop(index);
                remove_backing_file(&entry).await;
            }
            debug!(%key, "cache entry expired on lookup");
            return false;
        }

        if tokio::fs::metadata(&entry.storage_path).await.is_err() {
            index.remove(&key);
            debug!(%key, "cache entry vanished from disk, index healed");
            return false;
        }

        true
    }

    /// Return the entry and refresh its access time. Does not populate on a
    /// miss; population is an explicit [`MediaCache::put`] owned by the
    /// caller, so an expensive origin fetch is never implied by a read.
    pub async fn get(&self, key: MediaKey) -> Option<CacheEntry> {
        let mut index = self.index.lock().await;
        let entry = index.get_mut(&key)?;
        entry.last_accessed_at = Utc::now();
        Some(entry.clone())
    }

    /// Write a payload, evicting as needed beforehand. Replaces any existing
    /// entry for the key with fresh timestamps.
    pub async fn put(
        &self,
        key: MediaKey,
        format: AudioFormat,
        payload: &[u8],
    ) -> Result<CacheEntry> {
        self.ensure_space(payload.len() as u64).await;

        let display_name = format!("{key}.{format}");
        let storage_path = self.root.join(&display_name);

        tokio::fs::write(&storage_path, payload)
            .await
            .map_err(|e| {
                CoreError::CacheWrite(format!("write {} failed: {e}", storage_path.display()))
            })?;

        // Re-stat for the authoritative size.
        let size_bytes = tokio::fs::metadata(&storage_path)
            .await
            .map_err(|e| {
                CoreError::CacheWrite(format!("stat {} failed: {e}", storage_path.display()))
            })?
            .len();

        let now = Utc::now();
        let entry = CacheEntry {
            key,
            storage_path,
            display_name,
            size_bytes,
            format,
            cached_at: now,
            last_accessed_at: now,
        };

        let mut index = self.index.lock().await;
        index.insert(key, entry.clone());
        debug!(%key, size_bytes, "cache entry written");
        Ok(entry)
    }

    /// Make room for `required_bytes`. No-op while the write would fit;
    /// otherwise evicts per the plan in [`eviction`]. Delete failures are
    /// logged and the index entry dropped anyway so nothing gets stuck.
    pub async fn ensure_space(&self, required_bytes: u64) {
        let mut index = self.index.lock().await;

        let total: u64 = index.values().map(|e| e.size_bytes).sum();
        if total.saturating_add(required_bytes) <= self.limits.max_total_bytes {
            return;
        }

        let candidates: Vec<CandidateEntry> = index
            .values()
            .map(|e| CandidateEntry {
                key: e.key,
                size_bytes: e.size_bytes,
                cached_at: e.cached_at,
                last_accessed_at: e.last_accessed_at,
            })
            .collect();

        let plan = plan_evictions(
            candidates,
            Utc::now(),
            chrono_ttl(self.limits.ttl),
            self.limits.max_total_bytes,
            required_bytes,
        );

        let mut evicted = Vec::with_capacity(plan.planned.len());
        for planned in &plan.planned {
            if let Some(entry) = index.remove(&planned.key) {
                evicted.push(entry);
            }
        }
        drop(index);

        for entry in &evicted {
            remove_backing_file(entry).await;
        }

        if !evicted.is_empty() {
            info!(
                evicted = evicted.len(),
                freed_bytes = plan.total_bytes_before - plan.total_bytes_after,
                "cache evicted entries to make room"
            );
        }
    }

    /// Drop every entry older than the TTL. Run periodically by
    /// [`MediaCache::spawn_sweeper`].
    pub async fn sweep(&self) {
        let ttl = chrono_ttl(self.limits.ttl);
        let now = Utc::now();

        let expired: Vec<CacheEntry> = {
            let mut index = self.index.lock().await;
            let keys: Vec<MediaKey> = index
                .values()
                .filter(|e| now - e.cached_at > ttl)
                .map(|e| e.key)
                .collect();
            keys.iter().filter_map(|k| index.remove(k)).collect()
        };

        for entry in &expired {
            remove_backing_file(entry).await;
        }

        if !expired.is_empty() {
            info!(removed = expired.len(), "cache sweep removed expired entries");
        }
    }

    /// Spawn the periodic TTL sweep loop.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.limits.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it, the constructor
            // already saw a fresh directory scan.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        })
    }

    /// Sum of indexed entry sizes.
    pub async fn total_bytes(&self) -> u64 {
        self.index.lock().await.values().map(|e| e.size_bytes).sum()
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.lock().await.is_empty()
    }
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::MAX)
}

async fn remove_backing_file(entry: &CacheEntry) {
    if let Err(e) = tokio::fs::remove_file(&entry.storage_path).await {
        warn!(
            key = %entry.key,
            path = %entry.storage_path.display(),
            error = %e,
            "failed to delete cached file, index entry dropped anyway"
        );
    }
}

async fn rebuild_index(root: &Path) -> Result<HashMap<MediaKey, CacheEntry>> {
    let mut index = HashMap::new();
    let mut dir = tokio::fs::read_dir(root).await?;

    while let Some(dirent) = dir.next_entry().await? {
        let path = dirent.path();
        let Some((key, format)) = parse_cache_file_name(&path) else {
            continue;
        };

        let meta = match dirent.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };

        let cached_at = meta
            .modified()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);
        let last_accessed_at = meta
            .accessed()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or(cached_at);

        index.insert(
            key,
            CacheEntry {
                key,
                storage_path: path,
                display_name: format!("{key}.{format}"),
                size_bytes: meta.len(),
                format,
                cached_at,
                last_accessed_at,
            },
        );
    }

    Ok(index)
}

fn parse_cache_file_name(path: &Path) -> Option<(MediaKey, AudioFormat)> {
    let stem = path.file_stem()?.to_str()?;
    let ext = path.extension()?.to_str()?;
    let key: i64 = stem.parse().ok()?;
    // Only accept extensions we would have written ourselves.
    if !matches!(
        ext.to_ascii_lowercase().as_str(),
        "wav" | "mp3" | "ogg" | "m4a" | "flac" | "aac"
    ) {
        return None;
    }
    Some((MediaKey(key), AudioFormat::parse(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn limits(max_bytes: u64, ttl: Duration) -> MediaCacheLimits {
        MediaCacheLimits {
            max_total_bytes: max_bytes,
            ttl,
            sweep_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips_metadata() {
        let dir = tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), MediaCacheLimits::defaults())
            .await
            .unwrap();

        let entry = cache
            .put(MediaKey(7), AudioFormat::Mp3, &[0u8; 256])
            .await
            .unwrap();
        assert_eq!(entry.size_bytes, 256);
        assert_eq!(entry.display_name, "7.mp3");
        assert!(cache.is_cached(MediaKey(7)).await);

        let got = cache.get(MediaKey(7)).await.unwrap();
        assert_eq!(got.storage_path, dir.path().join("7.mp3"));
    }

    #[tokio::test]
    async fn eviction_keeps_most_recently_accessed_entries() {
        let dir = tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), limits(1024, Duration::from_secs(3600)))
            .await
            .unwrap();

        cache.put(MediaKey(1), AudioFormat::Wav, &[0u8; 400]).await.unwrap();
        cache.put(MediaKey(2), AudioFormat::Wav, &[0u8; 400]).await.unwrap();

        // Touch key 1 so key 2 becomes the LRU victim.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = cache.get(MediaKey(1)).await;

        cache.put(MediaKey(3), AudioFormat::Wav, &[0u8; 400]).await.unwrap();

        assert!(cache.is_cached(MediaKey(1)).await);
        assert!(!cache.is_cached(MediaKey(2)).await);
        assert!(cache.is_cached(MediaKey(3)).await);
        assert!(cache.total_bytes().await <= 1024);
        assert!(!dir.path().join("2.wav").exists());
    }

    #[tokio::test]
    async fn oversized_payload_is_accepted_after_emptying_cache() {
        let dir = tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), limits(512, Duration::from_secs(3600)))
            .await
            .unwrap();

        cache.put(MediaKey(1), AudioFormat::Wav, &[0u8; 300]).await.unwrap();
        let entry = cache
            .put(MediaKey(2), AudioFormat::Wav, &[0u8; 4096])
            .await
            .unwrap();

        assert_eq!(entry.size_bytes, 4096);
        assert!(!cache.is_cached(MediaKey(1)).await);
        assert!(cache.is_cached(MediaKey(2)).await);
    }

    #[tokio::test]
    async fn ttl_expiry_is_reported_and_swept() {
        let dir = tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), limits(1 << 20, Duration::from_millis(10)))
            .await
            .unwrap();

        cache.put(MediaKey(5), AudioFormat::Ogg, &[0u8; 64]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(!cache.is_cached(MediaKey(5)).await);

        // A second expired entry is reaped by the sweep path.
        cache.put(MediaKey(6), AudioFormat::Ogg, &[0u8; 64]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        cache.sweep().await;

        assert_eq!(cache.len().await, 0);
        assert!(!dir.path().join("6.ogg").exists());
    }

    #[tokio::test]
    async fn index_rebuilds_from_disk_after_restart() {
        let dir = tempdir().unwrap();
        {
            let cache = MediaCache::open(dir.path(), MediaCacheLimits::defaults())
                .await
                .unwrap();
            cache.put(MediaKey(9), AudioFormat::Flac, &[0u8; 128]).await.unwrap();
        }

        // Unrelated files in the directory are ignored.
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let cache = MediaCache::open(dir.path(), MediaCacheLimits::defaults())
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);

        let entry = cache.get(MediaKey(9)).await.unwrap();
        assert_eq!(entry.format, AudioFormat::Flac);
        assert_eq!(entry.size_bytes, 128);
    }

    #[tokio::test]
    async fn externally_deleted_file_heals_the_index() {
        let dir = tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), MediaCacheLimits::defaults())
            .await
            .unwrap();

        cache.put(MediaKey(4), AudioFormat::Aac, &[0u8; 32]).await.unwrap();
        std::fs::remove_file(dir.path().join("4.aac")).unwrap();

        assert!(!cache.is_cached(MediaKey(4)).await);
        assert_eq!(cache.len().await, 0);
    }
}

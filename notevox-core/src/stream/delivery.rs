//! Cache-or-fetch delivery path behind the streaming edge.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    cache::{CacheEntry, MediaCache},
    error::Result,
    fetch::OriginFetcher,
    media::{MediaKey, MediaReference},
};

/// Ensures a media item is cached before it is streamed, fetching from the
/// origin service on a miss.
///
/// Population is guarded per key: concurrent misses for the same key
/// collapse into one origin fetch, with the losers of the race finding the
/// winner's entry in the cache once the guard is released.
pub struct AudioDelivery {
    cache: Arc<MediaCache>,
    fetcher: Arc<dyn OriginFetcher>,
    inflight: DashMap<MediaKey, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for AudioDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioDelivery")
            .field("inflight_keys", &self.inflight.len())
            .finish_non_exhaustive()
    }
}

impl AudioDelivery {
    pub fn new(cache: Arc<MediaCache>, fetcher: Arc<dyn OriginFetcher>) -> Self {
        Self {
            cache,
            fetcher,
            inflight: DashMap::new(),
        }
    }

    pub fn cache(&self) -> &Arc<MediaCache> {
        &self.cache
    }

    /// Return the cache entry for `key`, populating the cache from the
    /// origin if needed. Fetch failures surface as
    /// [`CoreError::UpstreamUnavailable`](crate::CoreError::UpstreamUnavailable);
    /// they are not retried here.
    pub async fn ensure_cached(
        &self,
        key: MediaKey,
        reference: &MediaReference,
    ) -> Result<CacheEntry> {
        // Fast path outside the guard.
        if self.cache.is_cached(key).await {
            if let Some(entry) = self.cache.get(key).await {
                return Ok(entry);
            }
        }

        let guard = self
            .inflight
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _held = guard.lock().await;

        // Re-check under the guard; a concurrent caller may have populated.
        if self.cache.is_cached(key).await {
            if let Some(entry) = self.cache.get(key).await {
                debug!(%key, "coalesced onto an in-flight population");
                return Ok(entry);
            }
        }

        info!(%key, remote_path = %reference.remote_path, "cache miss, fetching from origin");
        let result = self.populate(key, reference).await;

        drop(_held);
        // Drop the guard entry once idle so the table does not grow with
        // every key ever streamed.
        self.inflight.remove_if(&key, |_, v| Arc::strong_count(v) <= 2);

        result
    }

    async fn populate(&self, key: MediaKey, reference: &MediaReference) -> Result<CacheEntry> {
        let payload = self.fetcher.fetch_by_path(&reference.remote_path).await?;
        self.cache.put(key, reference.format, &payload.bytes).await
    }
}

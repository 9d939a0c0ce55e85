//! Origin media service client.
//!
//! The origin is the external system that produces and stores audio
//! (text-to-speech output or user-uploaded recordings). It is reached over
//! plain HTTP and consumed through the [`OriginFetcher`] trait so the
//! delivery path can be exercised without a network.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Binary payload fetched from the origin, with the content type the origin
/// reported (if any).
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// Fetch the full binary payload behind an opaque remote path.
    async fn fetch_by_path(&self, remote_path: &str) -> Result<FetchedPayload>;

    /// Alternate lookup used for on-demand (non-cached) downloads.
    async fn fetch_by_asset_id(&self, user_id: Uuid, asset_id: &str) -> Result<FetchedPayload>;
}

/// HTTP implementation against the origin service's base URL.
#[derive(Debug, Clone)]
pub struct HttpOriginFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOriginFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_binary(&self, url: &str) -> Result<FetchedPayload> {
        debug!(url, "fetching payload from origin");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable(format!("origin request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::UpstreamUnavailable(format!(
                "origin returned {} for {url}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable(format!("origin body read failed: {e}")))?;

        Ok(FetchedPayload {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[async_trait]
impl OriginFetcher for HttpOriginFetcher {
    async fn fetch_by_path(&self, remote_path: &str) -> Result<FetchedPayload> {
        let url = format!("{}/{}", self.base_url, remote_path.trim_start_matches('/'));
        self.get_binary(&url).await
    }

    async fn fetch_by_asset_id(&self, user_id: Uuid, asset_id: &str) -> Result<FetchedPayload> {
        let url = format!("{}/assets/{user_id}/{asset_id}", self.base_url);
        self.get_binary(&url).await
    }
}

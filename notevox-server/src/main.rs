//! # Notevox Server
//!
//! Audio delivery edge for a personal note-taking service.
//!
//! - **Audio streaming**: range-aware playback from a disk-backed cache,
//!   populated on demand from the origin media service
//! - **Downloads**: on-demand full-file fetches proxied from the origin
//! - **Live transcription**: WebSocket sessions multiplexed onto one
//!   shared upstream speech-to-text connection

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use notevox_core::{
    cache::MediaCache,
    fetch::HttpOriginFetcher,
    relay::{TranscriptionRelay, WsTranscriber},
    stream::AudioDelivery,
};
use notevox_server::{
    AppState,
    auth::{AuthUser, StaticTokenVerifier},
    infra::config::Config,
    routes,
    store::JsonMediaStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let env_file_loaded = dotenvy::dotenv().is_ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if env_file_loaded {
        info!("loaded .env file");
    }

    let config = Arc::new(Config::from_env()?);

    let cache = Arc::new(
        MediaCache::open(&config.cache_dir, config.cache_limits.clone())
            .await
            .context("failed to open media cache")?,
    );
    cache.spawn_sweeper();
    info!(
        dir = %config.cache_dir.display(),
        entries = cache.len().await,
        "media cache ready"
    );

    let fetcher = Arc::new(
        HttpOriginFetcher::new(config.origin_base_url.clone(), config.origin_timeout)
            .context("failed to build origin client")?,
    );
    let delivery = Arc::new(AudioDelivery::new(Arc::clone(&cache), fetcher.clone()));

    let upstream = Arc::new(WsTranscriber::new(config.transcribe_url.clone()));
    let relay = Arc::new(TranscriptionRelay::new(upstream, config.relay.clone()));

    let token = std::env::var("NOTEVOX_API_TOKEN").unwrap_or_default();
    if token.is_empty() {
        tracing::warn!("NOTEVOX_API_TOKEN is not set, all requests will be rejected");
    }
    let owner = AuthUser {
        id: owner_id()?,
        username: std::env::var("NOTEVOX_OWNER_NAME").unwrap_or_else(|_| "owner".to_string()),
    };
    let token_verifier = Arc::new(StaticTokenVerifier::new(token, owner));

    let manifest_path = std::env::var("NOTEVOX_MANIFEST")
        .map(Into::into)
        .unwrap_or_else(|_| config.cache_dir.join("../manifest.json"));
    let media_store = Arc::new(JsonMediaStore::load(&manifest_path).await?);

    let state = AppState {
        config: Arc::clone(&config),
        cache,
        delivery,
        relay,
        media_store,
        fetcher,
        token_verifier,
    };

    let router = routes::create_router(state);

    info!("starting notevox server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("failed to bind listen address")?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn owner_id() -> Result<Uuid> {
    match std::env::var("NOTEVOX_OWNER_ID") {
        Ok(raw) => raw.parse().context("invalid NOTEVOX_OWNER_ID"),
        Err(_) => Ok(Uuid::nil()),
    }
}

//! Router-level tests for the audio endpoints, exercised through
//! `tower::ServiceExt::oneshot` against mock collaborators.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use notevox_core::{
    AudioFormat, MediaKey, MediaReference, MediaReferenceStore,
    cache::{MediaCache, MediaCacheLimits},
    error::{CoreError, Result as CoreResult},
    fetch::{FetchedPayload, OriginFetcher},
    relay::{RelayConfig, TranscriptionRelay, UpstreamChannels, UpstreamTranscriber},
    stream::AudioDelivery,
};
use notevox_server::{
    AppState,
    auth::{AuthUser, StaticTokenVerifier},
    infra::config::Config,
    routes,
};

const TOKEN: &str = "test-token";
const PAYLOAD_LEN: usize = 1024;

fn owner() -> Uuid {
    Uuid::from_u128(0x4f3a_2b1c)
}

struct MockStore {
    by_id: HashMap<MediaKey, (MediaReference, Uuid)>,
}

impl MockStore {
    /// Audio 7 on note 3 (1024 bytes at the origin), audio 8 on note 4
    /// (zero bytes at the origin), both owned by `owner()`.
    fn seeded() -> Self {
        let mut by_id = HashMap::new();
        by_id.insert(
            MediaKey(7),
            (
                MediaReference {
                    id: MediaKey(7),
                    note_id: 3,
                    remote_path: "recordings/7.mp3".into(),
                    display_name: "standup".into(),
                    format: AudioFormat::Mp3,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
                owner(),
            ),
        );
        by_id.insert(
            MediaKey(8),
            (
                MediaReference {
                    id: MediaKey(8),
                    note_id: 4,
                    remote_path: "recordings/8-empty.wav".into(),
                    display_name: "silence".into(),
                    format: AudioFormat::Wav,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
                owner(),
            ),
        );
        Self { by_id }
    }
}

#[async_trait]
impl MediaReferenceStore for MockStore {
    async fn find_by_id(&self, key: MediaKey) -> CoreResult<Option<MediaReference>> {
        Ok(self.by_id.get(&key).map(|(r, _)| r.clone()))
    }

    async fn find_by_note(&self, note_id: i64) -> CoreResult<Vec<MediaReference>> {
        Ok(self
            .by_id
            .values()
            .filter(|(r, _)| r.note_id == note_id)
            .map(|(r, _)| r.clone())
            .collect())
    }

    async fn verify_ownership(&self, key: MediaKey, user_id: Uuid) -> CoreResult<bool> {
        Ok(self
            .by_id
            .get(&key)
            .is_some_and(|(_, owner)| *owner == user_id))
    }
}

struct MockFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl OriginFetcher for MockFetcher {
    async fn fetch_by_path(&self, remote_path: &str) -> CoreResult<FetchedPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = if remote_path.contains("empty") {
            Vec::new()
        } else {
            vec![0xA5; PAYLOAD_LEN]
        };
        Ok(FetchedPayload {
            bytes,
            content_type: Some("audio/mpeg".into()),
        })
    }

    async fn fetch_by_asset_id(
        &self,
        _user_id: Uuid,
        _asset_id: &str,
    ) -> CoreResult<FetchedPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FetchedPayload {
            bytes: vec![0x5A; 96],
            content_type: Some("audio/wav".into()),
        })
    }
}

/// HTTP tests never dial the transcription upstream.
struct NeverDial;

#[async_trait]
impl UpstreamTranscriber for NeverDial {
    async fn dial(&self) -> CoreResult<UpstreamChannels> {
        Err(CoreError::UpstreamUnavailable("not under test".into()))
    }
}

/// Router whose token resolves to `user`; the seeded references belong to
/// `owner()`.
async fn test_router_as(dir: &tempfile::TempDir, user: AuthUser) -> (Router, Arc<MockFetcher>) {
    let config = Arc::new(Config {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        cache_dir: dir.path().to_path_buf(),
        cache_limits: MediaCacheLimits::defaults(),
        origin_base_url: "http://origin.invalid".into(),
        origin_timeout: Duration::from_secs(5),
        transcribe_url: "ws://stt.invalid/stream".into(),
        relay: RelayConfig::defaults(),
    });

    let cache = Arc::new(
        MediaCache::open(dir.path(), MediaCacheLimits::defaults())
            .await
            .unwrap(),
    );
    let fetcher = Arc::new(MockFetcher {
        calls: AtomicUsize::new(0),
    });
    let delivery = Arc::new(AudioDelivery::new(Arc::clone(&cache), fetcher.clone()));
    let relay = Arc::new(TranscriptionRelay::new(
        Arc::new(NeverDial),
        RelayConfig::defaults(),
    ));
    let token_verifier = Arc::new(StaticTokenVerifier::new(TOKEN, user));

    let state = AppState {
        config,
        cache,
        delivery,
        relay,
        media_store: Arc::new(MockStore::seeded()),
        fetcher: fetcher.clone(),
        token_verifier,
    };

    (routes::create_router(state), fetcher)
}

async fn test_router(dir: &tempfile::TempDir) -> (Router, Arc<MockFetcher>) {
    test_router_as(
        dir,
        AuthUser {
            id: owner(),
            username: "owner".into(),
        },
    )
    .await
}

fn intruder() -> AuthUser {
    AuthUser {
        id: Uuid::from_u128(0xdead),
        username: "intruder".into(),
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

fn get_with_range(uri: &str, range: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::RANGE, range)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let (router, fetcher) = test_router(&dir).await;

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/v1/audio/stream/7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn wrong_token_is_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = test_router(&dir).await;

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/v1/audio/stream/7")
                .header(header::AUTHORIZATION, "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn full_stream_populates_cache_once() {
    let dir = tempfile::tempdir().unwrap();
    let (router, fetcher) = test_router(&dir).await;

    let response = router
        .clone()
        .oneshot(get("/api/v1/audio/stream/7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCEPT_RANGES].to_str().unwrap(),
        "bytes"
    );
    assert_eq!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "audio/mpeg"
    );
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN]
            .to_str()
            .unwrap(),
        "*"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), PAYLOAD_LEN);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    // Second request is served from the cache.
    let response = router.oneshot(get("/api/v1/audio/stream/7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_audio_streams_zero_content_length() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = test_router(&dir).await;

    let response = router.oneshot(get("/api/v1/audio/stream/8")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH].to_str().unwrap(),
        "0"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}

#[tokio::test]
async fn explicit_full_range_is_partial_content() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = test_router(&dir).await;

    let response = router
        .oneshot(get_with_range("/api/v1/audio/stream/7", "bytes=0-1023"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE].to_str().unwrap(),
        "bytes 0-1023/1024"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), PAYLOAD_LEN);
}

#[tokio::test]
async fn open_ended_range_streams_the_tail() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = test_router(&dir).await;

    let response = router
        .oneshot(get_with_range("/api/v1/audio/stream/7", "bytes=512-"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE].to_str().unwrap(),
        "bytes 512-1023/1024"
    );
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH].to_str().unwrap(),
        "512"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), 512);
}

#[tokio::test]
async fn unsatisfiable_range_falls_back_to_full_content() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = test_router(&dir).await;

    let response = router
        .oneshot(get_with_range("/api/v1/audio/stream/7", "bytes=5000-6000"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key(header::CONTENT_RANGE));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), PAYLOAD_LEN);
}

#[tokio::test]
async fn unknown_audio_is_not_found_before_any_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let (router, fetcher) = test_router(&dir).await;

    let response = router
        .oneshot(get("/api/v1/audio/stream/999"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn foreign_owner_is_forbidden_before_any_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let (router, fetcher) = test_router_as(&dir, intruder()).await;

    let response = router.oneshot(get("/api/v1/audio/stream/7")).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn note_listing_returns_references() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = test_router(&dir).await;

    let response = router.oneshot(get("/api/v1/audio/note/3")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let references: Vec<MediaReference> = serde_json::from_slice(&body).unwrap();
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].id, MediaKey(7));
}

#[tokio::test]
async fn note_without_audio_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = test_router(&dir).await;

    let response = router.oneshot(get("/api/v1/audio/note/42")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn foreign_owner_cannot_list_note_audio() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = test_router_as(&dir, intruder()).await;

    // Someone else's note looks like a note with no audio.
    let response = router.oneshot(get("/api/v1/audio/note/3")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_sets_attachment_disposition() {
    let dir = tempfile::tempdir().unwrap();
    let (router, fetcher) = test_router(&dir).await;

    let response = router
        .oneshot(get("/api/v1/audio/download/rec-2026-01-10"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap(),
        "attachment; filename=\"rec-2026-01-10\""
    );
    assert_eq!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "audio/wav"
    );
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), 96);
}

//! Audio streaming and download handlers.

use std::io::SeekFrom;

use axum::{
    Extension, Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;
use tracing::debug;

use notevox_core::{
    MediaKey, MediaReference,
    stream::resolve_range,
};

use crate::{
    auth::AuthUser,
    infra::errors::{AppError, AppResult},
};

use crate::AppState;

/// Stream a cached audio asset, honoring the `Range` request header.
///
/// Authorization and existence are settled before any cache or network
/// work; a miss then costs exactly one origin fetch thanks to the
/// single-flight guard in `AudioDelivery`.
pub async fn stream_audio_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(audio_id): Path<i64>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let key = MediaKey(audio_id);

    let reference = state
        .media_store
        .find_by_id(key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("audio {key} not found")))?;

    if !state.media_store.verify_ownership(key, user.id).await? {
        return Err(AppError::forbidden("not the owner of this audio"));
    }

    let entry = state.delivery.ensure_cached(key, &reference).await?;

    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    let resolution = resolve_range(range_header, entry.size_bytes);
    let range = resolution.range();

    debug!(
        %key,
        start = range.start,
        len = range.len,
        partial = resolution.is_partial(),
        "serving audio"
    );

    let mut file = File::open(&entry.storage_path)
        .await
        .map_err(|e| AppError::internal(format!("failed to open cached audio: {e}")))?;
    if range.start > 0 {
        file.seek(SeekFrom::Start(range.start))
            .await
            .map_err(|e| AppError::internal(format!("failed to seek cached audio: {e}")))?;
    }
    let stream = ReaderStream::new(file.take(range.len));

    let mut response_headers = audio_response_headers(reference.format.mime());
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.len));

    let status = if resolution.is_partial() {
        let content_range = format!("bytes {}-{}/{}", range.start, range.end(), entry.size_bytes);
        response_headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&content_range)
                .map_err(|e| AppError::internal(format!("invalid Content-Range: {e}")))?,
        );
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    Ok((status, response_headers, Body::from_stream(stream)).into_response())
}

/// On-demand full-file download straight from the origin; not range-aware
/// and never cached.
pub async fn download_audio_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(asset_id): Path<String>,
) -> AppResult<Response> {
    let payload = state.fetcher.fetch_by_asset_id(user.id, &asset_id).await?;

    let content_type = payload
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("audio/wav"));

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, content_type);
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{asset_id}\""))
            .map_err(|e| AppError::bad_request(format!("invalid asset id: {e}")))?,
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(payload.bytes.len() as u64),
    );

    Ok((StatusCode::OK, response_headers, Body::from(payload.bytes)).into_response())
}

/// List the audio references attached to a note. Only references the caller
/// owns are returned; someone else's note looks identical to one with no
/// audio at all.
pub async fn note_audio_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(note_id): Path<i64>,
) -> AppResult<Json<Vec<MediaReference>>> {
    let mut references = Vec::new();
    for reference in state.media_store.find_by_note(note_id).await? {
        if state
            .media_store
            .verify_ownership(reference.id, user.id)
            .await?
        {
            references.push(reference);
        }
    }
    if references.is_empty() {
        return Err(AppError::not_found(format!("note {note_id} has no audio")));
    }
    Ok(Json(references))
}

/// Headers common to every streamed audio response, including the
/// permissive cross-origin set browser audio players depend on.
fn audio_response_headers(mime: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, HEAD, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Range"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Range, Accept-Ranges"),
    );
    headers
}

use axum::{Router, middleware, routing::{any, get}};
use tower_http::trace::TraceLayer;

use crate::{
    AppState, auth,
    handlers::{stream_handlers, transcribe_ws},
};

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    let audio = Router::new()
        .route(
            "/audio/stream/{audio_id}",
            get(stream_handlers::stream_audio_handler),
        )
        .route(
            "/audio/download/{asset_id}",
            get(stream_handlers::download_audio_handler),
        )
        .route(
            "/audio/note/{note_id}",
            get(stream_handlers::note_audio_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::auth_middleware,
        ));

    // The realtime endpoint authenticates in-handler: the token arrives as
    // a query parameter and failures close with 4001 post-upgrade.
    let realtime = Router::new().route(
        "/transcribe/live",
        any(transcribe_ws::live_transcribe_handler),
    );

    Router::new()
        .nest("/api/v1", audio.merge(realtime))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! Live transcription session gateway.
//!
//! One WebSocket per local session. The token travels as a query parameter
//! because browsers cannot set headers on WebSocket upgrades; a failed
//! verification closes with code 4001 after the upgrade completes. Inbound
//! binary frames are raw audio forwarded to the shared relay; relay text
//! comes back as `{"type": "transcription", ...}` frames.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use notevox_core::relay::TextSink;

use crate::AppState;

/// Close code for a failed token verification.
const CLOSE_AUTH_FAILURE: u16 = 4001;

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    token: Option<String>,
}

pub async fn live_transcribe_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<LiveQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_session(socket, state, query.token))
}

/// Relay sink backed by the session's outbound channel. `try_send` keeps
/// the relay's broadcast non-blocking; a backed-up session drops text
/// rather than stalling its siblings.
struct SessionSink {
    session_id: Uuid,
    tx: mpsc::Sender<String>,
}

impl TextSink for SessionSink {
    fn deliver_text(&self, text: &str) {
        if self.tx.try_send(text.to_string()).is_err() {
            debug!(session_id = %self.session_id, "transcription frame dropped, session backed up");
        }
    }
}

async fn handle_session(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let verified = match token {
        Some(token) => state.token_verifier.verify(&token).await,
        None => None,
    };
    let Some(user) = verified else {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_AUTH_FAILURE,
                reason: "authentication failed".into(),
            })))
            .await;
        return;
    };

    let session_id = Uuid::now_v7();
    debug!(%session_id, user = %user.username, "live transcription session opened");

    let (text_tx, mut text_rx) = mpsc::channel::<String>(64);
    let sink = Arc::new(SessionSink {
        session_id,
        tx: text_tx,
    });
    state.relay.register(session_id, sink).await;

    if let Err(e) = state.relay.ensure_connected().await {
        warn!(%session_id, error = %e, "upstream transcription unavailable");
        let frame = serde_json::json!({
            "type": "error",
            "code": "upstream_unavailable",
            "message": e.to_string(),
        });
        let _ = socket.send(Message::Text(frame.to_string().into())).await;
        state.relay.unregister(session_id).await;
        let _ = socket.close().await;
        return;
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Outbound pump: relay text to the client, one frame per utterance.
    let writer = tokio::spawn(async move {
        while let Some(text) = text_rx.recv().await {
            let frame = serde_json::json!({
                "type": "transcription",
                "data": text,
                "timestamp": Utc::now().timestamp_millis(),
            });
            if ws_sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(chunk)) => {
                state.relay.send_audio_chunk(&chunk).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!(%session_id, error = %e, "session socket error");
                break;
            }
            // Text frames and ping/pong housekeeping are not part of the
            // session protocol; axum answers pings itself.
            Ok(_) => {}
        }
    }

    state.relay.unregister(session_id).await;
    writer.abort();
    debug!(%session_id, "live transcription session closed");
}

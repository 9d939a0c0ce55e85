//! Upstream streaming speech-to-text transport.
//!
//! The relay never touches a socket directly; it dials through
//! [`UpstreamTranscriber`] and talks over a pair of channels. The real
//! implementation pumps a tokio-tungstenite WebSocket: outbound frames are
//! raw audio bytes, inbound frames are JSON text carrying a transcription
//! field. Protocol pings are answered here, not in the relay.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};

/// One event from the upstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Raw text frame, expected to be a JSON transcription message.
    Message(String),
    /// The socket closed or errored; no further events follow.
    Closed,
}

/// Channel pair representing one live upstream connection. Dropping
/// `outbound` closes the connection.
#[derive(Debug)]
pub struct UpstreamChannels {
    pub outbound: mpsc::Sender<Vec<u8>>,
    pub inbound: mpsc::Receiver<UpstreamEvent>,
}

#[async_trait]
pub trait UpstreamTranscriber: Send + Sync {
    async fn dial(&self) -> Result<UpstreamChannels>;
}

/// tokio-tungstenite implementation against the remote transcription
/// service.
#[derive(Debug, Clone)]
pub struct WsTranscriber {
    url: String,
}

impl WsTranscriber {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl UpstreamTranscriber for WsTranscriber {
    async fn dial(&self) -> Result<UpstreamChannels> {
        let (ws, _) = connect_async(&self.url).await.map_err(|e| {
            CoreError::UpstreamUnavailable(format!("transcription dial failed: {e}"))
        })?;
        debug!(url = %self.url, "upstream transcription socket established");

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<UpstreamEvent>(256);

        tokio::spawn(async move {
            let (mut sink, mut stream) = ws.split();

            loop {
                tokio::select! {
                    chunk = outbound_rx.recv() => match chunk {
                        Some(bytes) => {
                            if let Err(e) = sink.send(Message::Binary(bytes)).await {
                                warn!(error = %e, "upstream send failed");
                                break;
                            }
                        }
                        // Relay dropped its sender: deliberate disconnect.
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_tx
                                .send(UpstreamEvent::Message(text.to_string()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if let Err(e) = sink.send(Message::Pong(payload)).await {
                                warn!(error = %e, "upstream pong failed");
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!(error = %e, "upstream socket error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                }
            }

            let _ = inbound_tx.send(UpstreamEvent::Closed).await;
        });

        Ok(UpstreamChannels {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

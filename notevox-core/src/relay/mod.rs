//! Shared live-transcription relay.
//!
//! Many local sessions get the illusion of a private connection to the
//! upstream speech-to-text service while physically sharing exactly one
//! socket. The relay owns the session registry, a ref-counted connection
//! lifecycle (the connection exists iff at least one session does), a
//! coalescing connect path, and reconnect-with-backoff for unexpected
//! closes.

mod upstream;

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
pub use upstream::{UpstreamChannels, UpstreamEvent, UpstreamTranscriber, WsTranscriber};

/// One registered listener. Implementations must not block: the relay's
/// reader task broadcasts on its own thread of execution, and a slow sink
/// must not starve its siblings. Channel-backed sinks should `try_send` and
/// drop on overflow.
pub trait TextSink: Send + Sync {
    fn deliver_text(&self, text: &str);
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub dial_timeout: Duration,
    pub max_connect_attempts: u32,
    pub base_backoff: Duration,
}

impl RelayConfig {
    pub const fn defaults() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            max_connect_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Upstream connection state. Independent of the ref count, which is the
/// source of truth for whether a connection should exist at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
enum ConnectOutcome {
    Pending,
    Established,
    Failed(String),
    Exhausted(u32),
}

#[derive(Debug)]
struct LinkInner {
    state: LinkState,
    outbound: Option<mpsc::Sender<Vec<u8>>>,
    outcome_rx: Option<watch::Receiver<ConnectOutcome>>,
    ref_count: usize,
    /// Bumped on every deliberate disconnect so stale reader tasks and
    /// in-flight dials recognize they have been superseded.
    epoch: u64,
}

/// Inbound frame from the upstream service. Anything without a
/// transcription field is protocol chatter and ignored.
#[derive(Debug, Deserialize)]
struct TranscriptFrame {
    #[serde(default)]
    transcription: String,
}

pub struct TranscriptionRelay {
    config: RelayConfig,
    upstream: Arc<dyn UpstreamTranscriber>,
    sessions: DashMap<Uuid, Arc<dyn TextSink>>,
    link: Mutex<LinkInner>,
}

impl std::fmt::Debug for TranscriptionRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionRelay")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl TranscriptionRelay {
    pub fn new(upstream: Arc<dyn UpstreamTranscriber>, config: RelayConfig) -> Self {
        Self {
            config,
            upstream,
            sessions: DashMap::new(),
            link: Mutex::new(LinkInner {
                state: LinkState::Disconnected,
                outbound: None,
                outcome_rx: None,
                ref_count: 0,
                epoch: 0,
            }),
        }
    }

    /// Register a listener. Does not connect; callers follow up with
    /// [`TranscriptionRelay::ensure_connected`].
    pub async fn register(&self, session_id: Uuid, sink: Arc<dyn TextSink>) {
        self.sessions.insert(session_id, sink);
        let mut link = self.link.lock().await;
        link.ref_count += 1;
        debug!(%session_id, ref_count = link.ref_count, "relay session registered");
    }

    /// Remove a listener; the last one out tears the connection down.
    /// A second disconnect with no socket is a no-op.
    pub async fn unregister(&self, session_id: Uuid) {
        if self.sessions.remove(&session_id).is_none() {
            return;
        }
        let mut link = self.link.lock().await;
        link.ref_count = link.ref_count.saturating_sub(1);
        debug!(%session_id, ref_count = link.ref_count, "relay session unregistered");
        if link.ref_count == 0 {
            disconnect_locked(&mut link);
            info!("last relay session left, upstream disconnected");
        }
    }

    /// Idempotent connect. Already connected → immediate Ok. A dial in
    /// flight → wait (bounded) for its outcome instead of starting a second
    /// one. Disconnected → become the dialer and run the backoff loop.
    pub async fn ensure_connected(self: &Arc<Self>) -> Result<()> {
        let mut link = self.link.lock().await;
        match link.state {
            LinkState::Connected => Ok(()),
            LinkState::Connecting => {
                let rx = link.outcome_rx.clone().ok_or_else(|| {
                    CoreError::Internal("connecting with no pending outcome".into())
                })?;
                drop(link);
                self.await_outcome(rx).await
            }
            LinkState::Disconnected => {
                let (tx, rx) = watch::channel(ConnectOutcome::Pending);
                link.state = LinkState::Connecting;
                link.outcome_rx = Some(rx);
                let epoch = link.epoch;
                drop(link);
                self.drive_connect(tx, epoch).await
            }
        }
    }

    /// Forward a binary audio frame upstream. Silent no-op unless connected;
    /// a full outbound queue drops the frame rather than blocking.
    pub async fn send_audio_chunk(&self, chunk: &[u8]) {
        let link = self.link.lock().await;
        if link.state != LinkState::Connected {
            return;
        }
        if let Some(outbound) = &link.outbound {
            if outbound.try_send(chunk.to_vec()).is_err() {
                debug!(len = chunk.len(), "audio frame dropped, upstream queue full");
            }
        }
    }

    pub async fn state(&self) -> LinkState {
        self.link.lock().await.state
    }

    pub async fn ref_count(&self) -> usize {
        self.link.lock().await.ref_count
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    async fn await_outcome(
        &self,
        mut rx: watch::Receiver<ConnectOutcome>,
    ) -> Result<()> {
        let waited = tokio::time::timeout(
            self.config.dial_timeout,
            rx.wait_for(|o| !matches!(o, ConnectOutcome::Pending)),
        )
        .await;

        match waited {
            Ok(Ok(outcome)) => match &*outcome {
                ConnectOutcome::Established => Ok(()),
                ConnectOutcome::Failed(msg) => Err(CoreError::UpstreamUnavailable(msg.clone())),
                ConnectOutcome::Exhausted(attempts) => Err(CoreError::ConnectExhausted {
                    attempts: *attempts,
                }),
                ConnectOutcome::Pending => unreachable!("wait_for filtered Pending"),
            },
            // Dialer vanished or took too long; report as unavailable.
            Ok(Err(_)) | Err(_) => Err(CoreError::UpstreamUnavailable(
                "timed out waiting for in-flight connect".into(),
            )),
        }
    }

    /// Run the dial/backoff loop as the single active dialer, publishing the
    /// outcome for coalesced waiters.
    ///
    /// Returns a boxed future: `read_loop` awaits `drive_connect`, which
    /// spawns `read_loop`, and the type erasure breaks that recursion so the
    /// compiler can prove the futures are `Send`.
    fn drive_connect<'a>(
        self: &'a Arc<Self>,
        outcome_tx: watch::Sender<ConnectOutcome>,
        epoch: u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            // Bail out if every session left while we were backing off.
            {
                let mut link = self.link.lock().await;
                if link.epoch != epoch || link.ref_count == 0 {
                    disconnect_locked(&mut link);
                    drop(link);
                    let _ = outcome_tx.send(ConnectOutcome::Failed(
                        "no sessions remain, dial abandoned".into(),
                    ));
                    return Err(CoreError::UpstreamUnavailable(
                        "no sessions remain, dial abandoned".into(),
                    ));
                }
            }

            let dialed =
                tokio::time::timeout(self.config.dial_timeout, self.upstream.dial()).await;

            match dialed {
                Ok(Ok(channels)) => {
                    let mut link = self.link.lock().await;
                    if link.epoch != epoch || link.ref_count == 0 {
                        // Deliberate disconnect raced the dial; drop the
                        // fresh socket on the floor.
                        disconnect_locked(&mut link);
                        drop(link);
                        let _ = outcome_tx.send(ConnectOutcome::Failed(
                            "disconnected during dial".into(),
                        ));
                        return Err(CoreError::UpstreamUnavailable(
                            "disconnected during dial".into(),
                        ));
                    }

                    link.state = LinkState::Connected;
                    link.outbound = Some(channels.outbound);
                    link.outcome_rx = None;
                    drop(link);

                    let relay = Arc::clone(self);
                    tokio::spawn(async move {
                        relay.read_loop(channels.inbound, epoch).await;
                    });

                    let _ = outcome_tx.send(ConnectOutcome::Established);
                    info!(attempt, "upstream transcription connected");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "upstream dial failed");
                }
                Err(_) => {
                    warn!(attempt, "upstream dial timed out");
                }
            }

            if attempt >= self.config.max_connect_attempts {
                let mut link = self.link.lock().await;
                if link.epoch == epoch {
                    link.state = LinkState::Disconnected;
                    link.outcome_rx = None;
                }
                drop(link);
                let _ = outcome_tx.send(ConnectOutcome::Exhausted(attempt));
                return Err(CoreError::ConnectExhausted { attempts: attempt });
            }

            let backoff = self.config.base_backoff * 2u32.pow(attempt - 1);
            debug!(attempt, backoff_ms = backoff.as_millis() as u64, "retrying upstream dial");
            tokio::time::sleep(backoff).await;
        }
        })
    }

    /// Pump inbound events to every registered sink. Runs until the
    /// connection closes; an unexpected close re-enters the backoff loop,
    /// but only while listeners remain.
    async fn read_loop(self: Arc<Self>, mut inbound: mpsc::Receiver<UpstreamEvent>, epoch: u64) {
        loop {
            match inbound.recv().await {
                Some(UpstreamEvent::Message(text)) => self.broadcast(&text),
                Some(UpstreamEvent::Closed) | None => break,
            }
        }

        let mut link = self.link.lock().await;
        if link.epoch != epoch {
            // Deliberate disconnect already handled this connection.
            return;
        }
        link.state = LinkState::Disconnected;
        link.outbound = None;

        if link.ref_count == 0 {
            return;
        }

        warn!("upstream transcription closed unexpectedly, reconnecting");
        let (tx, rx) = watch::channel(ConnectOutcome::Pending);
        link.state = LinkState::Connecting;
        link.outcome_rx = Some(rx);
        drop(link);

        if let Err(e) = self.drive_connect(tx, epoch).await {
            warn!(error = %e, "upstream reconnect gave up");
        }
    }

    fn broadcast(&self, raw: &str) {
        let frame: TranscriptFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "ignoring unparseable upstream frame");
                return;
            }
        };

        let text = frame.transcription.trim();
        if text.is_empty() {
            return;
        }

        // Each sink is isolated by construction: deliver_text cannot block
        // or fail the loop, so one dead session never starves the rest.
        for entry in self.sessions.iter() {
            entry.value().deliver_text(text);
        }
    }
}

fn disconnect_locked(link: &mut LinkInner) {
    link.state = LinkState::Disconnected;
    link.outbound = None;
    link.outcome_rx = None;
    link.epoch += 1;
}

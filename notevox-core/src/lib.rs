//! Core library for the Notevox audio delivery subsystem.
//!
//! Three pieces live here:
//!
//! - [`cache::MediaCache`] — a disk-backed store of generated audio with
//!   size- and age-bounded eviction, reconstructible from disk alone.
//! - [`stream`] — byte-range resolution and the cache-or-fetch delivery
//!   path that backs the HTTP streaming edge.
//! - [`relay::TranscriptionRelay`] — a ref-counted bridge multiplexing many
//!   local live-transcription sessions onto one upstream socket.
//!
//! The HTTP/WebSocket edge itself lives in `notevox-server`; persistence of
//! note metadata and the remote media services are consumed through the
//! boundary traits in [`media`] and [`fetch`].

pub mod cache;
pub mod error;
pub mod fetch;
pub mod media;
pub mod relay;
pub mod stream;

pub use error::{CoreError, Result};
pub use media::{AudioFormat, MediaKey, MediaReference, MediaReferenceStore};

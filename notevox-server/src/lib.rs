//! Notevox audio delivery server.
//!
//! The HTTP/WebSocket edge over `notevox-core`: bearer-authenticated
//! range-aware audio streaming, on-demand downloads, and the live
//! transcription session gateway. Exposed as a library so integration tests
//! can build the router against mock collaborators.

pub mod auth;
pub mod handlers;
pub mod infra;
pub mod routes;
pub mod store;

pub use infra::app_state::AppState;

pub mod stream_handlers;
pub mod transcribe_ws;

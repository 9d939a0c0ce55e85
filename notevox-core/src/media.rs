//! Shared media types and the persistence boundary.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Opaque identifier of one audio asset, stable across the cache, the
/// streaming edge, and the persisted metadata record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MediaKey(pub i64);

impl fmt::Display for MediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MediaKey {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Codec/container tag of a cached audio blob. Drives the content-type
/// mapping and the on-disk file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
    M4a,
    Flac,
    Aac,
}

impl AudioFormat {
    /// Parse a short format tag, case-insensitively. Unknown tags fall back
    /// to `Wav`, matching the default content type of the streaming edge.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "mp3" => Self::Mp3,
            "ogg" => Self::Ogg,
            "m4a" => Self::M4a,
            "flac" => Self::Flac,
            "aac" => Self::Aac,
            _ => Self::Wav,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::M4a => "m4a",
            Self::Flac => "flac",
            Self::Aac => "aac",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::Ogg => "audio/ogg",
            Self::M4a => "audio/mp4",
            Self::Flac => "audio/flac",
            Self::Aac => "audio/aac",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-visible metadata record identifying a playable asset. Persisted by
/// the notes subsystem; the cache and streamer only ever consume the
/// `id`/`format`/`remote_path` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaReference {
    pub id: MediaKey,
    pub note_id: i64,
    /// Opaque locator at the origin media service.
    pub remote_path: String,
    pub display_name: String,
    pub format: AudioFormat,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lookup and authorization boundary owned by the notes/persistence
/// subsystem. Both checks run before any cache or network I/O.
#[async_trait]
pub trait MediaReferenceStore: Send + Sync {
    async fn find_by_id(&self, key: MediaKey) -> Result<Option<MediaReference>>;

    async fn find_by_note(&self, note_id: i64) -> Result<Vec<MediaReference>>;

    async fn verify_ownership(&self, key: MediaKey, user_id: Uuid) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parse_is_case_insensitive() {
        assert_eq!(AudioFormat::parse("MP3"), AudioFormat::Mp3);
        assert_eq!(AudioFormat::parse(" flac "), AudioFormat::Flac);
    }

    #[test]
    fn unknown_format_falls_back_to_wav() {
        assert_eq!(AudioFormat::parse("opus"), AudioFormat::Wav);
        assert_eq!(AudioFormat::Wav.mime(), "audio/wav");
    }

    #[test]
    fn mime_table_matches_formats() {
        assert_eq!(AudioFormat::Mp3.mime(), "audio/mpeg");
        assert_eq!(AudioFormat::M4a.mime(), "audio/mp4");
        assert_eq!(AudioFormat::Ogg.mime(), "audio/ogg");
        assert_eq!(AudioFormat::Aac.mime(), "audio/aac");
    }
}

//! Manifest-backed media reference store.
//!
//! Personal deployments keep their audio metadata in one JSON manifest next
//! to the cache directory; the notes service rewrites it whenever a
//! recording is attached. Loaded once at startup and held in memory.

use std::{collections::HashMap, path::Path};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use notevox_core::{
    AudioFormat, MediaKey, MediaReference, MediaReferenceStore,
    error::{CoreError, Result},
};

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    id: i64,
    note_id: i64,
    owner_id: Uuid,
    remote_path: String,
    display_name: String,
    #[serde(default)]
    format: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct StoredReference {
    reference: MediaReference,
    owner_id: Uuid,
}

#[derive(Debug, Default)]
pub struct JsonMediaStore {
    by_id: HashMap<MediaKey, StoredReference>,
}

impl JsonMediaStore {
    /// Load the manifest from disk. A missing file is an empty store, not
    /// an error; a fresh install has no recordings yet.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no media manifest, starting empty");
                return Ok(Self::default());
            }
            Err(e) => return Err(CoreError::Io(e)),
        };

        let entries: Vec<ManifestEntry> = serde_json::from_slice(&raw)?;
        let mut by_id = HashMap::with_capacity(entries.len());
        for entry in entries {
            let key = MediaKey(entry.id);
            let reference = MediaReference {
                id: key,
                note_id: entry.note_id,
                remote_path: entry.remote_path,
                display_name: entry.display_name,
                format: AudioFormat::parse(entry.format.as_deref().unwrap_or("wav")),
                created_at: entry.created_at,
                updated_at: entry.updated_at,
            };
            by_id.insert(
                key,
                StoredReference {
                    reference,
                    owner_id: entry.owner_id,
                },
            );
        }
        info!(path = %path.display(), entries = by_id.len(), "media manifest loaded");
        Ok(Self { by_id })
    }
}

#[async_trait]
impl MediaReferenceStore for JsonMediaStore {
    async fn find_by_id(&self, key: MediaKey) -> Result<Option<MediaReference>> {
        Ok(self.by_id.get(&key).map(|stored| stored.reference.clone()))
    }

    async fn find_by_note(&self, note_id: i64) -> Result<Vec<MediaReference>> {
        let mut references: Vec<MediaReference> = self
            .by_id
            .values()
            .filter(|stored| stored.reference.note_id == note_id)
            .map(|stored| stored.reference.clone())
            .collect();
        references.sort_by_key(|reference| reference.id);
        Ok(references)
    }

    async fn verify_ownership(&self, key: MediaKey, user_id: Uuid) -> Result<bool> {
        Ok(self
            .by_id
            .get(&key)
            .is_some_and(|stored| stored.owner_id == user_id))
    }
}

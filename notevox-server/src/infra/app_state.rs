use std::{fmt, sync::Arc};

use notevox_core::{
    MediaReferenceStore,
    cache::MediaCache,
    fetch::OriginFetcher,
    relay::TranscriptionRelay,
    stream::AudioDelivery,
};

use crate::{auth::TokenVerifier, infra::config::Config};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<MediaCache>,
    pub delivery: Arc<AudioDelivery>,
    pub relay: Arc<TranscriptionRelay>,
    pub media_store: Arc<dyn MediaReferenceStore>,
    pub fetcher: Arc<dyn OriginFetcher>,
    pub token_verifier: Arc<dyn TokenVerifier>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

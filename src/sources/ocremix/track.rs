use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    common::{AudioFormat, HttpClient, SourceError, SourceResult},
    protocol::tracks::TrackInfo,
    sources::plugin::{CachedUrl, PlaybackAttempt, PlaybackStrategy},
};

/// Reads the download link from the remix page when playback first starts.
pub struct OcremixPlayback {
    client: HttpClient,
    base_url: String,
    resolved: CachedUrl,
}

impl OcremixPlayback {
    pub fn new(client: HttpClient, base_url: String) -> Self {
        Self {
            client,
            base_url,
            resolved: CachedUrl::new(),
        }
    }

    async fn resolve(&self, info: &TrackInfo) -> SourceResult<String> {
        let url = super::page_url(&self.base_url, &info.identifier);
        let html = super::fetch_page(&self.client, &url)
            .await?
            .ok_or_else(|| SourceError::NotFound { url: url.clone() })?;

        super::extract_mp3_url(&html)
            .map(str::to_string)
            .ok_or_else(|| SourceError::shape("mp3 download link", url))
    }
}

#[async_trait]
impl PlaybackStrategy for OcremixPlayback {
    async fn playback_url(&self, info: &TrackInfo, attempt: PlaybackAttempt) -> SourceResult<String> {
        self.resolved.get_or_resolve(attempt, || self.resolve(info)).await
    }

    fn container(&self, _url: &str) -> AudioFormat {
        AudioFormat::Mp3
    }

    fn fresh(&self) -> Arc<dyn PlaybackStrategy> {
        Arc::new(Self::new(self.client.clone(), self.base_url.clone()))
    }
}

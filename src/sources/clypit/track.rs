use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    common::{AudioFormat, HttpClient, SourceError, SourceResult},
    protocol::tracks::TrackInfo,
    sources::plugin::{CachedUrl, PlaybackAttempt, PlaybackStrategy},
};

/// Asks the API for the MP3 address when playback first starts.
pub struct ClypitPlayback {
    client: HttpClient,
    api_url: String,
    resolved: CachedUrl,
}

impl ClypitPlayback {
    pub fn new(client: HttpClient, api_url: String) -> Self {
        Self {
            client,
            api_url,
            resolved: CachedUrl::new(),
        }
    }

    async fn resolve(&self, info: &TrackInfo) -> SourceResult<String> {
        let url = format!("{}/{}", self.api_url, info.identifier);
        let upload = super::fetch_upload(&self.client, &self.api_url, &info.identifier)
            .await?
            .ok_or_else(|| SourceError::NotFound { url: url.clone() })?;

        upload
            .stream_url()
            .map(str::to_string)
            .ok_or_else(|| SourceError::shape("SecureMp3Url", url))
    }
}

#[async_trait]
impl PlaybackStrategy for ClypitPlayback {
    async fn playback_url(&self, info: &TrackInfo, attempt: PlaybackAttempt) -> SourceResult<String> {
        self.resolved.get_or_resolve(attempt, || self.resolve(info)).await
    }

    fn container(&self, _url: &str) -> AudioFormat {
        AudioFormat::Mp3
    }

    fn fresh(&self) -> Arc<dyn PlaybackStrategy> {
        Arc::new(Self::new(self.client.clone(), self.api_url.clone()))
    }
}

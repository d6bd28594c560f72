use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    common::{HttpClient, SourceError, SourceResult},
    protocol::tracks::TrackInfo,
    sources::plugin::{CachedUrl, PlaybackAttempt, PlaybackStrategy},
};

/// Looks the cloudcast up again on first play and decrypts its stream URL.
pub struct MixcloudPlayback {
    client: HttpClient,
    endpoint: String,
    resolved: CachedUrl,
}

impl MixcloudPlayback {
    pub fn new(client: HttpClient, endpoint: String) -> Self {
        Self {
            client,
            endpoint,
            resolved: CachedUrl::new(),
        }
    }

    async fn resolve(&self, info: &TrackInfo) -> SourceResult<String> {
        let uri = info.uri.as_deref().unwrap_or_default();
        let (username, slug) = super::parse_track_url(uri)
            .ok_or_else(|| SourceError::InvalidInput(format!("not a mixcloud track url: {}", uri)))?;

        let query = super::lookup_query(
            &username,
            &slug,
            "    streamInfo {\n      hlsUrl\n      url\n    }",
        );
        let data = super::graphql_lookup(&self.client, &self.endpoint, &query)
            .await?
            .ok_or_else(|| SourceError::NotFound { url: uri.to_string() })?;

        let stream_info = &data["streamInfo"];
        let encrypted = stream_info["url"]
            .as_str()
            .or_else(|| stream_info["hlsUrl"].as_str())
            .ok_or_else(|| SourceError::shape("streamInfo.url", uri))?;

        super::decrypt(encrypted)
    }
}

#[async_trait]
impl PlaybackStrategy for MixcloudPlayback {
    async fn playback_url(&self, info: &TrackInfo, attempt: PlaybackAttempt) -> SourceResult<String> {
        self.resolved.get_or_resolve(attempt, || self.resolve(info)).await
    }

    fn fresh(&self) -> Arc<dyn PlaybackStrategy> {
        Arc::new(Self::new(self.client.clone(), self.endpoint.clone()))
    }
}

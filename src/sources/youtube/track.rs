use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    common::{AudioFormat, SourceResult},
    protocol::tracks::TrackInfo,
    sources::plugin::{PlaybackAttempt, PlaybackStrategy},
};

use super::api::watch_url;

/// Hands the watch URL to the host's own YouTube pipeline instead of
/// streaming bytes here.
pub struct DelegatedPlayback;

impl DelegatedPlayback {
    pub fn shared() -> Arc<dyn PlaybackStrategy> {
        Arc::new(Self)
    }
}

#[async_trait]
impl PlaybackStrategy for DelegatedPlayback {
    async fn playback_url(&self, info: &TrackInfo, _attempt: PlaybackAttempt) -> SourceResult<String> {
        Ok(watch_url(&info.identifier))
    }

    fn container(&self, _url: &str) -> AudioFormat {
        AudioFormat::Delegated
    }

    fn fresh(&self) -> Arc<dyn PlaybackStrategy> {
        Self::shared()
    }
}

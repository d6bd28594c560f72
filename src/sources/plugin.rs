use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use tokio::sync::OnceCell;
use tracing::warn;

use crate::{
    common::{AudioFormat, CONTENT_LENGTH_UNKNOWN, SourceError, SourceResult},
    protocol::tracks::{LoadResult, TrackInfo},
    sources::stream::{SeekableStream, StreamOpener, StreamRequest},
};

/// Per-call switches for a resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Skips collection size limits (trusted callers).
    pub limit_exempt: bool,
}

/// Which candidate URL a playback attempt should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackAttempt {
    Primary,
    Fallback,
}

/// Trait that all site resolvers implement.
#[async_trait]
pub trait SourcePlugin: Send + Sync {
    /// Unique identifier for this source (e.g., "mixcloud", "tiktok")
    fn name(&self) -> &str;

    /// Cheap syntactic check; returning false means "not mine".
    fn can_handle(&self, identifier: &str) -> bool;

    /// Resolve the identifier into track(s).
    ///
    /// A missing item is `Ok(LoadResult::Empty {})`, never an error.
    async fn load(&self, identifier: &str, options: &LoadOptions) -> SourceResult<LoadResult>;

    fn is_encodable(&self, _track: &AudioTrack) -> bool {
        true
    }

    /// Resolver-specific bytes written after the shared track fields.
    fn encode_track(&self, track: &AudioTrack) -> Vec<u8> {
        track.strategy.encode_state()
    }

    /// Rebuilds a playable track from decoded metadata and its payload.
    fn decode_track(&self, info: TrackInfo, payload: &[u8]) -> SourceResult<AudioTrack>;

    /// Stops background work such as refreshers.
    fn shutdown(&self) {}
}

pub type BoxedSource = Box<dyn SourcePlugin>;

/// Site-specific knowledge needed to play one track.
#[async_trait]
pub trait PlaybackStrategy: Send + Sync {
    /// The URL the host should stream for the given attempt.
    async fn playback_url(&self, info: &TrackInfo, attempt: PlaybackAttempt) -> SourceResult<String>;

    fn container(&self, url: &str) -> AudioFormat {
        match AudioFormat::from_url(url) {
            AudioFormat::Unknown => AudioFormat::Mp4,
            other => other,
        }
    }

    fn length_hint(&self, _info: &TrackInfo) -> u64 {
        CONTENT_LENGTH_UNKNOWN
    }

    /// Whether a second candidate exists for one retry after a failed open.
    fn has_fallback(&self) -> bool {
        false
    }

    /// Statuses treated as success when opening the stream, besides 2xx.
    fn accepted_statuses(&self) -> &[u16] {
        &[]
    }

    /// A site-specific opener (own cookies or headers); `None` uses the host default.
    fn stream_opener(&self) -> Option<&dyn StreamOpener> {
        None
    }

    fn encode_state(&self) -> Vec<u8> {
        Vec::new()
    }

    /// A fresh strategy for a cloned track, without cached state.
    fn fresh(&self) -> Arc<dyn PlaybackStrategy>;
}

/// A playback URL resolved once and kept for the life of the track.
/// The fallback attempt bypasses the cache and resolves again.
#[derive(Debug, Default)]
pub struct CachedUrl(OnceCell<String>);

impl CachedUrl {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_resolve<F, Fut>(&self, attempt: PlaybackAttempt, resolve: F) -> SourceResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SourceResult<String>>,
    {
        match attempt {
            PlaybackAttempt::Primary => self.0.get_or_try_init(resolve).await.cloned(),
            PlaybackAttempt::Fallback => resolve().await,
        }
    }

    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }
}

/// Strategy for sites whose playback URL is a pure function of the track.
pub struct TemplatePlayback {
    render: fn(&TrackInfo) -> String,
    format: AudioFormat,
}

impl TemplatePlayback {
    pub fn new(render: fn(&TrackInfo) -> String, format: AudioFormat) -> Arc<Self> {
        Arc::new(Self { render, format })
    }
}

#[async_trait]
impl PlaybackStrategy for TemplatePlayback {
    async fn playback_url(&self, info: &TrackInfo, _attempt: PlaybackAttempt) -> SourceResult<String> {
        Ok((self.render)(info))
    }

    fn container(&self, _url: &str) -> AudioFormat {
        self.format
    }

    fn fresh(&self) -> Arc<dyn PlaybackStrategy> {
        Arc::new(Self {
            render: self.render,
            format: self.format,
        })
    }
}

/// An opened stream together with the container to demux it with.
pub struct OpenedStream {
    pub stream: Box<dyn SeekableStream>,
    pub format: AudioFormat,
    pub url: String,
}

/// A resolved, playable item.
pub struct AudioTrack {
    pub info: TrackInfo,
    strategy: Arc<dyn PlaybackStrategy>,
    failed_once: AtomicBool,
}

impl AudioTrack {
    pub fn new(info: TrackInfo, strategy: Arc<dyn PlaybackStrategy>) -> Self {
        Self {
            info,
            strategy,
            failed_once: AtomicBool::new(false),
        }
    }

    /// URL for the next playback attempt.
    pub async fn playback_url(&self) -> SourceResult<String> {
        self.strategy.playback_url(&self.info, self.attempt()).await
    }

    pub fn attempt(&self) -> PlaybackAttempt {
        if self.failed_once.load(Ordering::Acquire) {
            PlaybackAttempt::Fallback
        } else {
            PlaybackAttempt::Primary
        }
    }

    pub fn strategy(&self) -> &Arc<dyn PlaybackStrategy> {
        &self.strategy
    }

    /// Opens the byte stream. When the site has a fallback candidate, the
    /// first failure switches to it and retries exactly once.
    pub async fn open_stream(&self, default_opener: &dyn StreamOpener) -> SourceResult<OpenedStream> {
        match self.open_attempt(default_opener).await {
            Ok(stream) => Ok(stream),
            Err(e) if self.strategy.has_fallback() && !self.failed_once.swap(true, Ordering::AcqRel) => {
                warn!(
                    "{} playback of {} failed, switching to fallback: {}",
                    self.info.source_name, self.info.identifier, e
                );
                self.open_attempt(default_opener).await
            }
            Err(e) => Err(e),
        }
    }

    async fn open_attempt(&self, default_opener: &dyn StreamOpener) -> SourceResult<OpenedStream> {
        let url = self.playback_url().await?;
        let format = self.strategy.container(&url);
        if format == AudioFormat::Delegated {
            return Err(SourceError::InvalidInput(format!(
                "{} playback is delegated to the host",
                self.info.source_name
            )));
        }

        let opener = self.strategy.stream_opener().unwrap_or(default_opener);
        let stream = opener
            .open(StreamRequest {
                url: &url,
                content_length: self.strategy.length_hint(&self.info),
                accepted_statuses: self.strategy.accepted_statuses(),
            })
            .await?;

        Ok(OpenedStream {
            stream,
            format,
            url,
        })
    }

    /// A copy with the same metadata and no cached playback state.
    pub fn make_clone(&self) -> Self {
        Self::new(self.info.clone(), self.strategy.fresh())
    }
}

impl fmt::Debug for AudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioTrack")
            .field("info", &self.info)
            .field("attempt", &self.attempt())
            .finish()
    }
}

impl Serialize for AudioTrack {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.info.serialize(serializer)
    }
}

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::{
    common::{SourceError, SourceResult},
    configs::{HttpConfig, YouTubeConfig},
    protocol::tracks::{LoadResult, PlaylistData, TrackInfo},
    sources::{
        context::{ContextRefresher, ContextStore, RefreshSchedule},
        plugin::{AudioTrack, LoadOptions, PlaybackStrategy, SourcePlugin},
    },
};

pub mod api;
pub mod context;
pub mod playlist;
pub mod track;

use api::YouTubeApi;
use context::{YoutubeContextFetcher, YoutubeVersionData};
use track::DelegatedPlayback;

pub const SEARCH_PREFIX: &str = "ytsearch:";

static HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:(?:www|m|music)\.)?(?:youtube\.com|youtu\.be)/").unwrap()
});

static VIDEO_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:(?:(?:www|m|music)\.)?youtube\.com/(?:watch\?(?:.*&)?v=|shorts/|embed/)|youtu\.be/)(?P<id>[a-zA-Z0-9_-]{11})",
    )
    .unwrap()
});

static LIST_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]list=(?P<list>[a-zA-Z0-9_-]+)").unwrap());

/// What a YouTube reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference<'a> {
    Search(&'a str),
    Video(&'a str),
    Playlist {
        id: &'a str,
        selected: Option<&'a str>,
    },
}

pub fn parse_reference(identifier: &str) -> Option<Reference<'_>> {
    if let Some(query) = identifier.strip_prefix(SEARCH_PREFIX) {
        let query = query.trim();
        return (!query.is_empty()).then_some(Reference::Search(query));
    }
    if !HOST_RE.is_match(identifier) {
        return None;
    }

    let video = VIDEO_ID_RE
        .captures(identifier)
        .and_then(|caps| caps.name("id"))
        .map(|m| m.as_str());
    let list = LIST_ID_RE
        .captures(identifier)
        .and_then(|caps| caps.name("list"))
        .map(|m| m.as_str());

    match (list, video) {
        (Some(id), selected) => Some(Reference::Playlist { id, selected }),
        (None, Some(id)) => Some(Reference::Video(id)),
        (None, None) => None,
    }
}

pub struct YouTubeSource {
    api: Arc<YouTubeApi>,
    context: Arc<ContextStore<YoutubeVersionData>>,
    refresher: Option<ContextRefresher<YoutubeContextFetcher>>,
    playlist_page_count: usize,
    playback: Arc<dyn PlaybackStrategy>,
}

impl YouTubeSource {
    /// Builds the API client and, unless a shared context store is passed in,
    /// starts this instance's own context refresher. Must run inside a tokio
    /// runtime.
    pub fn new(
        http: &HttpConfig,
        config: &YouTubeConfig,
        shared_context: Option<Arc<ContextStore<YoutubeVersionData>>>,
    ) -> SourceResult<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| SourceError::Misconfigured("youtube.api_key is not set".into()))?;

        let owns_context = shared_context.is_none();
        let context = shared_context.unwrap_or_else(ContextStore::new);
        let api = Arc::new(YouTubeApi::new(http, api_key, context.clone())?);
        Self::from_api(http, config, api, context, owns_context)
    }

    /// Wraps an API client built elsewhere. `refresh_context` decides whether
    /// this instance refreshes `context` itself.
    pub fn from_api(
        http: &HttpConfig,
        config: &YouTubeConfig,
        api: Arc<YouTubeApi>,
        context: Arc<ContextStore<YoutubeVersionData>>,
        refresh_context: bool,
    ) -> SourceResult<Self> {
        let refresher = if config.update_context && refresh_context {
            let schedule = RefreshSchedule::every(Duration::from_secs(config.context_refresh_interval_secs));
            Some(ContextRefresher::spawn_into(
                YoutubeContextFetcher::new(http)?,
                context.clone(),
                schedule,
            ))
        } else {
            None
        };

        let mut source = Self::with_api(api, config.playlist_page_count, context);
        source.refresher = refresher;
        Ok(source)
    }

    pub fn with_api(
        api: Arc<YouTubeApi>,
        playlist_page_count: usize,
        context: Arc<ContextStore<YoutubeVersionData>>,
    ) -> Self {
        Self {
            api,
            context,
            refresher: None,
            playlist_page_count,
            playback: DelegatedPlayback::shared(),
        }
    }

    pub fn api(&self) -> Arc<YouTubeApi> {
        self.api.clone()
    }

    pub fn context(&self) -> Arc<ContextStore<YoutubeVersionData>> {
        self.context.clone()
    }

    fn track(&self, info: TrackInfo) -> AudioTrack {
        AudioTrack::new(info, self.playback.clone())
    }

    async fn load_video(&self, video_id: &str) -> SourceResult<LoadResult> {
        Ok(match self.api.video(video_id).await? {
            Some(video) => LoadResult::Track(self.track(video.to_track_info("youtube"))),
            None => LoadResult::Empty {},
        })
    }
}

#[async_trait]
impl SourcePlugin for YouTubeSource {
    fn name(&self) -> &str {
        "youtube"
    }

    fn can_handle(&self, identifier: &str) -> bool {
        parse_reference(identifier).is_some()
    }

    async fn load(&self, identifier: &str, _options: &LoadOptions) -> SourceResult<LoadResult> {
        let Some(reference) = parse_reference(identifier) else {
            return Ok(LoadResult::Empty {});
        };

        match reference {
            Reference::Search(query) => {
                let Some(video_id) = self.api.search_first(query).await? else {
                    return Ok(LoadResult::Empty {});
                };
                Ok(match self.api.video(&video_id).await? {
                    Some(video) => LoadResult::Search(vec![self.track(video.to_track_info("youtube"))]),
                    None => LoadResult::Empty {},
                })
            }
            Reference::Video(video_id) => self.load_video(video_id).await,
            Reference::Playlist { id, selected } => {
                let loaded =
                    playlist::load_playlist(&self.api, id, selected, self.playlist_page_count).await?;
                match (loaded, selected) {
                    (Some((info, tracks)), _) => Ok(LoadResult::Playlist(PlaylistData {
                        info,
                        tracks: tracks.into_iter().map(|t| self.track(t)).collect(),
                    })),
                    // Mixes and other generated lists are not visible to the API.
                    (None, Some(video_id)) => {
                        debug!("Playlist {} not found, loading video {}", id, video_id);
                        self.load_video(video_id).await
                    }
                    (None, None) => Ok(LoadResult::Empty {}),
                }
            }
        }
    }

    fn decode_track(&self, info: TrackInfo, _payload: &[u8]) -> SourceResult<AudioTrack> {
        Ok(self.track(info))
    }

    fn shutdown(&self) {
        if let Some(refresher) = &self.refresher {
            refresher.shutdown();
        }
    }
}

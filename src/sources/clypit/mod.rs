use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::{
    common::{HttpClient, SourceResult},
    configs::HttpConfig,
    protocol::tracks::{LoadResult, TrackInfo},
    sources::plugin::{AudioTrack, LoadOptions, SourcePlugin},
};

pub mod track;

use track::ClypitPlayback;

const API_URL: &str = "https://api.clyp.it";

static CLIP_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?clyp\.it/(?P<id>[a-zA-Z0-9]{8})/?(?:[?#].*)?$").unwrap()
});

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClypitUpload {
    pub title: String,
    #[serde(default)]
    pub duration: f64,
    pub secure_mp3_url: Option<String>,
    pub mp3_url: Option<String>,
    pub artwork_picture_url: Option<String>,
    pub user: Option<ClypitUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClypitUser {
    pub first_name: Option<String>,
}

impl ClypitUpload {
    pub fn stream_url(&self) -> Option<&str> {
        self.secure_mp3_url
            .as_deref()
            .or(self.mp3_url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

pub fn parse_clip_id(url: &str) -> Option<&str> {
    CLIP_URL_RE
        .captures(url)
        .and_then(|caps| caps.name("id"))
        .map(|m| m.as_str())
}

/// `Ok(None)` when the upload does not exist.
pub(crate) async fn fetch_upload(
    client: &HttpClient,
    api_url: &str,
    clip_id: &str,
) -> SourceResult<Option<ClypitUpload>> {
    let url = format!("{}/{}", api_url, clip_id);
    client.fetch_json(client.get(&url)).await
}

pub struct ClypitSource {
    client: HttpClient,
    api_url: String,
}

impl ClypitSource {
    pub fn new(http: &HttpConfig) -> SourceResult<Self> {
        Self::with_api_url(http, API_URL)
    }

    pub fn with_api_url(http: &HttpConfig, api_url: &str) -> SourceResult<Self> {
        Ok(Self {
            client: HttpClient::builder().timeouts(http).build()?,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn playback(&self) -> Arc<ClypitPlayback> {
        Arc::new(ClypitPlayback::new(self.client.clone(), self.api_url.clone()))
    }
}

#[async_trait]
impl SourcePlugin for ClypitSource {
    fn name(&self) -> &str {
        "clypit"
    }

    fn can_handle(&self, identifier: &str) -> bool {
        CLIP_URL_RE.is_match(identifier)
    }

    async fn load(&self, identifier: &str, _options: &LoadOptions) -> SourceResult<LoadResult> {
        let Some(clip_id) = parse_clip_id(identifier) else {
            return Ok(LoadResult::Empty {});
        };
        let Some(upload) = fetch_upload(&self.client, &self.api_url, clip_id).await? else {
            return Ok(LoadResult::Empty {});
        };

        let author = upload
            .user
            .as_ref()
            .and_then(|user| user.first_name.clone())
            .unwrap_or_else(|| "Unknown artist".to_string());
        let info = TrackInfo::new(
            "clypit",
            clip_id,
            upload.title,
            author,
            (upload.duration * 1000.0).round() as u64,
            format!("https://clyp.it/{}", clip_id),
        )
        .with_artwork(upload.artwork_picture_url);

        Ok(LoadResult::Track(AudioTrack::new(info, self.playback())))
    }

    fn decode_track(&self, info: TrackInfo, _payload: &[u8]) -> SourceResult<AudioTrack> {
        Ok(AudioTrack::new(info, self.playback()))
    }
}

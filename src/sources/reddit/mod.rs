use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::{
    common::{AudioFormat, HttpClient, SourceError, SourceResult, text::is_url},
    configs::HttpConfig,
    protocol::tracks::{LoadResult, TrackInfo},
    sources::plugin::{AudioTrack, LoadOptions, PlaybackStrategy, SourcePlugin, TemplatePlayback},
};

const BASE_URL: &str = "https://www.reddit.com";

static POST_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:(?:www|old|new|np)\.)?reddit\.com/r/[a-zA-Z0-9_]+/comments/(?P<id>[a-z0-9]+)(?:/[^?#]*)?(?:[?#].*)?$",
    )
    .unwrap()
});

static SHORT_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://redd\.it/(?P<id>[a-z0-9]+)/?$").unwrap());

static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v\.redd\.it/(?P<id>[a-zA-Z0-9]+)").unwrap());

pub fn parse_post_id(url: &str) -> Option<&str> {
    POST_URL_RE
        .captures(url)
        .or_else(|| SHORT_URL_RE.captures(url))
        .and_then(|caps| caps.name("id"))
        .map(|m| m.as_str())
}

fn playback_url(info: &TrackInfo) -> String {
    format!("https://v.redd.it/{}/audio?source=fallback", info.identifier)
}

/// Reads the post out of a `comments/<id>.json` listing. `Ok(None)` when the
/// post has no hosted video.
pub fn parse_post(listing: &Value, url: &str) -> SourceResult<Option<TrackInfo>> {
    let post = &listing[0]["data"]["children"][0]["data"];
    if post.is_null() {
        return Err(SourceError::shape("listing post data", url));
    }

    let video = post["secure_media"]["reddit_video"]
        .as_object()
        .or_else(|| post["media"]["reddit_video"].as_object());
    let Some(video) = video else {
        return Ok(None);
    };

    let fallback = video
        .get("fallback_url")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::shape("reddit_video.fallback_url", url))?;
    let video_id = VIDEO_ID_RE
        .captures(fallback)
        .and_then(|caps| caps.name("id"))
        .ok_or_else(|| SourceError::shape("v.redd.it id", url))?
        .as_str();

    let duration = video.get("duration").and_then(Value::as_u64).unwrap_or(0);
    let permalink = post["permalink"].as_str().unwrap_or_default();
    let artwork = post["thumbnail"].as_str().filter(|s| is_url(s)).map(str::to_string);

    let info = TrackInfo::new(
        "reddit",
        video_id,
        post["title"].as_str().unwrap_or("Reddit video"),
        post["author"].as_str().unwrap_or("[deleted]"),
        duration * 1000,
        format!("{}{}", BASE_URL, permalink),
    )
    .with_artwork(artwork);

    Ok(Some(info))
}

pub struct RedditSource {
    client: HttpClient,
    base_url: String,
    playback: Arc<dyn PlaybackStrategy>,
}

impl RedditSource {
    pub fn new(http: &HttpConfig) -> SourceResult<Self> {
        Self::with_base_url(http, BASE_URL)
    }

    pub fn with_base_url(http: &HttpConfig, base_url: &str) -> SourceResult<Self> {
        Ok(Self {
            client: HttpClient::builder().timeouts(http).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            playback: TemplatePlayback::new(playback_url, AudioFormat::Mp4),
        })
    }
}

#[async_trait]
impl SourcePlugin for RedditSource {
    fn name(&self) -> &str {
        "reddit"
    }

    fn can_handle(&self, identifier: &str) -> bool {
        parse_post_id(identifier).is_some()
    }

    async fn load(&self, identifier: &str, _options: &LoadOptions) -> SourceResult<LoadResult> {
        let Some(post_id) = parse_post_id(identifier) else {
            return Ok(LoadResult::Empty {});
        };

        let url = format!("{}/comments/{}.json", self.base_url, post_id);
        let Some(listing) = self.client.fetch_json::<Value>(self.client.get(&url)).await? else {
            return Ok(LoadResult::Empty {});
        };

        match parse_post(&listing, &url)? {
            Some(info) => Ok(LoadResult::Track(AudioTrack::new(info, self.playback.clone()))),
            None => {
                debug!("Reddit post {} has no video", post_id);
                Ok(LoadResult::Empty {})
            }
        }
    }

    fn decode_track(&self, info: TrackInfo, _payload: &[u8]) -> SourceResult<AudioTrack> {
        Ok(AudioTrack::new(info, self.playback.clone()))
    }
}

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{StatusCode, header::HeaderValue};
use serde_json::Value;
use tracing::debug;

use crate::{
    common::{
        CookieHeaderFilter, FakeBrowserFilter, HttpClient, SourceError, SourceResult,
        text::normalize_js_literals,
    },
    configs::HttpConfig,
    protocol::tracks::{LoadResult, TrackInfo},
    sources::plugin::{AudioTrack, LoadOptions, SourcePlugin},
};

pub mod track;

use track::PornHubPlayback;

const BASE_URL: &str = "https://www.pornhub.com";

static VIDEO_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:[a-z]+\.)?pornhub\.(?:com|net|org)/view_video\.php\?viewkey=(?P<key>[a-zA-Z0-9]+)").unwrap()
});

static FLASHVARS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)var\s+flashvars_\d+\s*=\s*(\{.*?\});\s*(?:\n|var\s|</script>)").unwrap()
});

static AUTHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""author"\s*:\s*"([^"]+)""#).unwrap());

const REMOVED_MARKERS: &[&str] = &[
    "This video has been removed",
    "video has been disabled",
    "class=\"removed\"",
];

pub fn parse_view_key(url: &str) -> Option<&str> {
    VIDEO_URL_RE
        .captures(url)
        .and_then(|caps| caps.name("key"))
        .map(|m| m.as_str())
}

/// Metadata read from the page's `flashvars` object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: String,
    pub author: String,
    /// Seconds.
    pub duration: u64,
    pub image_url: Option<String>,
}

pub fn extract_metadata(html: &str, url: &str) -> SourceResult<PageMetadata> {
    let raw = FLASHVARS_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| SourceError::shape("flashvars", url))?
        .as_str();

    let vars: Value = serde_json::from_str(&normalize_js_literals(raw))?;
    let title = vars["video_title"]
        .as_str()
        .ok_or_else(|| SourceError::shape("flashvars.video_title", url))?;
    let duration = vars["video_duration"]
        .as_u64()
        .or_else(|| vars["video_duration"].as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0);
    let author = AUTHOR_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or("Unknown uploader");

    Ok(PageMetadata {
        title: title.to_string(),
        author: author.to_string(),
        duration,
        image_url: vars["image_url"].as_str().map(str::to_string),
    })
}

pub struct PornHubSource {
    client: HttpClient,
    base_url: String,
}

impl PornHubSource {
    pub fn new(http: &HttpConfig) -> SourceResult<Self> {
        Self::with_base_url(http, BASE_URL)
    }

    pub fn with_base_url(http: &HttpConfig, base_url: &str) -> SourceResult<Self> {
        let client = HttpClient::builder()
            .timeouts(http)
            .filter(Arc::new(FakeBrowserFilter::new()))
            .filter(Arc::new(CookieHeaderFilter(HeaderValue::from_static("platform=tv"))))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn playback(&self) -> Arc<PornHubPlayback> {
        Arc::new(PornHubPlayback::new(self.client.clone(), self.base_url.clone()))
    }
}

pub(crate) fn page_url(base_url: &str, view_key: &str) -> String {
    format!("{}/view_video.php?viewkey={}", base_url, view_key)
}

#[async_trait]
impl SourcePlugin for PornHubSource {
    fn name(&self) -> &str {
        "pornhub"
    }

    fn can_handle(&self, identifier: &str) -> bool {
        VIDEO_URL_RE.is_match(identifier)
    }

    async fn load(&self, identifier: &str, _options: &LoadOptions) -> SourceResult<LoadResult> {
        let Some(view_key) = parse_view_key(identifier) else {
            return Ok(LoadResult::Empty {});
        };

        let url = page_url(&self.base_url, view_key);
        let (status, html) = self.client.fetch_text(self.client.get(&url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(LoadResult::Empty {});
        }
        if status != StatusCode::OK {
            return Err(SourceError::from_status(status, url));
        }
        if REMOVED_MARKERS.iter().any(|marker| html.contains(marker)) {
            debug!("PornHub video {} was removed", view_key);
            return Ok(LoadResult::Empty {});
        }

        let meta = extract_metadata(&html, &url)?;
        let canonical = page_url(BASE_URL, view_key);
        let info = TrackInfo::new("pornhub", &canonical, meta.title, meta.author, meta.duration * 1000, &canonical)
            .with_artwork(meta.image_url);

        Ok(LoadResult::Track(AudioTrack::new(info, self.playback())))
    }

    fn decode_track(&self, info: TrackInfo, _payload: &[u8]) -> SourceResult<AudioTrack> {
        Ok(AudioTrack::new(info, self.playback()))
    }
}

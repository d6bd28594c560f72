use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{StatusCode, header::HeaderValue};
use serde_json::Value;
use tracing::debug;

use crate::{
    common::{
        FakeBrowserFilter, HttpClient, RefererFilter, SourceError, SourceResult,
        UserAgentRotationFilter,
    },
    configs::HttpConfig,
    protocol::tracks::{LoadResult, TrackInfo},
    sources::plugin::{AudioTrack, LoadOptions, SourcePlugin},
};

pub mod track;

use track::{TikTokPlayback, UrlPair};

const BASE_URL: &str = "https://www.tiktok.com";

static VIDEO_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https://(?:www\.|m\.)?tiktok\.com/@(?P<user>[a-zA-Z0-9_.-]+)/video/(?P<video>[0-9]+)(?:.*)$",
    )
    .unwrap()
});

/// Page scripts carrying the item JSON, with the path to `itemStruct`.
const DATA_SCRIPTS: &[(&str, &[&str])] = &[
    ("__NEXT_DATA__", &["props", "pageProps", "itemInfo", "itemStruct"]),
    (
        "__UNIVERSAL_DATA_FOR_REHYDRATION__",
        &["__DEFAULT_SCOPE__", "webapp.video-detail", "itemInfo", "itemStruct"],
    ),
];

/// Fields pulled from a video page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub author: String,
    /// Seconds.
    pub duration: u64,
    pub cover: Option<String>,
    pub video_url: String,
    pub music_url: Option<String>,
}

impl VideoMetadata {
    pub fn url_pair(&self) -> UrlPair {
        UrlPair {
            video_url: self.video_url.clone(),
            music_url: self.music_url.clone(),
        }
    }
}

pub fn parse_video_url(url: &str) -> Option<(&str, &str)> {
    let caps = VIDEO_URL_RE.captures(url)?;
    Some((caps.name("user")?.as_str(), caps.name("video")?.as_str()))
}

fn script_json(html: &str, id: &str) -> Option<Value> {
    let open = format!("<script id=\"{}\"", id);
    let start = html.find(&open)?;
    let body_start = start + html[start..].find('>')? + 1;
    let body_len = html[body_start..].find("</script>")?;
    serde_json::from_str(&html[body_start..body_start + body_len]).ok()
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> &'a Value {
    path.iter().fold(value, |v, key| &v[*key])
}

fn as_u64_lenient(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Extracts video metadata from the inline page data.
pub fn extract_metadata(html: &str, url: &str) -> SourceResult<VideoMetadata> {
    let item = DATA_SCRIPTS
        .iter()
        .filter_map(|(id, path)| {
            let json = script_json(html, id)?;
            let item = lookup(&json, path);
            (!item.is_null()).then(|| item.clone())
        })
        .next()
        .ok_or_else(|| SourceError::shape("__NEXT_DATA__ itemStruct", url))?;

    let video = &item["video"];
    let id = video["id"]
        .as_str()
        .or_else(|| item["id"].as_str())
        .ok_or_else(|| SourceError::shape("video.id", url))?;
    let video_url = video["playAddr"]
        .as_str()
        .filter(|s| !s.is_empty())
        .or_else(|| video["downloadAddr"].as_str())
        .ok_or_else(|| SourceError::shape("video.playAddr", url))?;
    let author = item["author"]["uniqueId"]
        .as_str()
        .or_else(|| item["author"].as_str())
        .ok_or_else(|| SourceError::shape("author.uniqueId", url))?;

    Ok(VideoMetadata {
        id: id.to_string(),
        title: item["desc"].as_str().unwrap_or_default().to_string(),
        author: author.to_string(),
        duration: as_u64_lenient(&video["duration"]).unwrap_or(0),
        cover: video["cover"].as_str().map(str::to_string),
        video_url: video_url.to_string(),
        music_url: item["music"]["playUrl"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    })
}

/// Fetches and parses a video page. `Ok(None)` when the video is gone.
pub(crate) async fn fetch_metadata(client: &HttpClient, page_url: &str) -> SourceResult<Option<VideoMetadata>> {
    let (status, body) = client.fetch_text(client.get(page_url)).await?;
    match status {
        StatusCode::OK => extract_metadata(&body, page_url).map(Some),
        StatusCode::FOUND | StatusCode::NOT_FOUND => Ok(None),
        other => Err(SourceError::from_status(other, page_url)),
    }
}

pub(crate) fn build_client(http: &HttpConfig, base_url: &str, cookies: bool) -> SourceResult<HttpClient> {
    let referer = HeaderValue::from_str(&format!("{}/", base_url))
        .map_err(|e| SourceError::InvalidInput(e.to_string()))?;

    HttpClient::builder()
        .timeouts(http)
        .follow_redirects(false)
        .cookie_store(cookies)
        .filter(Arc::new(FakeBrowserFilter::new()))
        .filter(Arc::new(RefererFilter(referer)))
        .filter(Arc::new(UserAgentRotationFilter))
        .build()
}

pub struct TikTokSource {
    client: HttpClient,
    http: HttpConfig,
    base_url: String,
}

impl TikTokSource {
    pub fn new(http: &HttpConfig) -> SourceResult<Self> {
        Self::with_base_url(http, BASE_URL)
    }

    pub fn with_base_url(http: &HttpConfig, base_url: &str) -> SourceResult<Self> {
        Ok(Self {
            client: build_client(http, base_url, false)?,
            http: http.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn page_url(&self, user: &str, video: &str) -> String {
        format!("{}/@{}/video/{}", self.base_url, user, video)
    }

    fn playback(&self, pair: Option<UrlPair>) -> Arc<TikTokPlayback> {
        Arc::new(TikTokPlayback::new(self.http.clone(), self.base_url.clone(), pair))
    }
}

#[async_trait]
impl SourcePlugin for TikTokSource {
    fn name(&self) -> &str {
        "tiktok"
    }

    fn can_handle(&self, identifier: &str) -> bool {
        VIDEO_URL_RE.is_match(identifier)
    }

    async fn load(&self, identifier: &str, _options: &LoadOptions) -> SourceResult<LoadResult> {
        let Some((user, video)) = parse_video_url(identifier) else {
            return Ok(LoadResult::Empty {});
        };

        let Some(meta) = fetch_metadata(&self.client, &self.page_url(user, video)).await? else {
            debug!("TikTok video {} is not available", video);
            return Ok(LoadResult::Empty {});
        };

        let title = if meta.title.is_empty() {
            format!("TikTok video by {}", meta.author)
        } else {
            meta.title.clone()
        };
        let info = TrackInfo::new("tiktok", &meta.id, title, &meta.author, meta.duration * 1000, identifier)
            .with_artwork(meta.cover.clone());

        Ok(LoadResult::Track(AudioTrack::new(info, self.playback(None))))
    }

    fn decode_track(&self, info: TrackInfo, payload: &[u8]) -> SourceResult<AudioTrack> {
        let pair = UrlPair::decode(payload)?;
        Ok(AudioTrack::new(info, self.playback(pair)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    pub(crate) fn next_data_page(video_url: &str, music_url: &str) -> String {
        let data = serde_json::json!({
            "props": { "pageProps": { "itemInfo": { "itemStruct": {
                "id": "7234567890123456789",
                "desc": "cooking pasta #food",
                "author": { "uniqueId": "chef.example" },
                "music": { "playUrl": music_url },
                "video": {
                    "id": "7234567890123456789",
                    "duration": 27,
                    "cover": "https://p16.tiktokcdn.com/cover.jpeg",
                    "playAddr": video_url,
                    "downloadAddr": "https://v16.tiktokcdn.com/download.mp4"
                }
            } } } }
        });
        format!(
            "<html><head><script id=\"__NEXT_DATA__\" type=\"application/json\" crossorigin=\"anonymous\">{}</script></head></html>",
            data
        )
    }

    #[test]
    fn test_url_patterns() {
        assert_eq!(
            parse_video_url("https://www.tiktok.com/@chef.example/video/7234567890123456789?lang=en"),
            Some(("chef.example", "7234567890123456789"))
        );
        assert_eq!(
            parse_video_url("https://m.tiktok.com/@user_1/video/1"),
            Some(("user_1", "1"))
        );
        assert_eq!(parse_video_url("https://www.tiktok.com/@user/live"), None);
        assert_eq!(parse_video_url("http://www.tiktok.com/@user/video/1"), None);
    }

    #[test]
    fn test_extract_metadata_from_fixture() {
        let html = next_data_page(
            "https://v16.tiktokcdn.com/play.mp4",
            "https://sf16.tiktokcdn.com/music.mp3",
        );
        let meta = extract_metadata(&html, "https://www.tiktok.com/@chef.example/video/1").unwrap();

        assert_eq!(
            (meta.title.as_str(), meta.duration, meta.video_url.as_str()),
            ("cooking pasta #food", 27, "https://v16.tiktokcdn.com/play.mp4")
        );
        assert_eq!(meta.author, "chef.example");
        assert_eq!(meta.music_url.as_deref(), Some("https://sf16.tiktokcdn.com/music.mp3"));
    }

    #[test]
    fn test_extract_metadata_from_rehydration_script() {
        let data = serde_json::json!({
            "__DEFAULT_SCOPE__": { "webapp.video-detail": { "itemInfo": { "itemStruct": {
                "desc": "clip",
                "author": { "uniqueId": "someone" },
                "video": { "id": "42", "duration": "9", "playAddr": "https://v.example/42.mp4" }
            } } } }
        });
        let html = format!(
            "<script id=\"__UNIVERSAL_DATA_FOR_REHYDRATION__\" type=\"application/json\">{}</script>",
            data
        );
        let meta = extract_metadata(&html, "https://www.tiktok.com/@someone/video/42").unwrap();
        assert_eq!(meta.id, "42");
        assert_eq!(meta.duration, 9);
        assert_eq!(meta.music_url, None);
    }

    #[test]
    fn test_missing_script_is_shape_change() {
        let err = extract_metadata("<html></html>", "https://www.tiktok.com/@a/video/1").unwrap_err();
        assert!(matches!(err, SourceError::ContentShapeChanged { ref marker, .. } if marker.contains("__NEXT_DATA__")));
    }

    #[tokio::test]
    async fn test_load_and_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/@chef.example/video/7234567890123456789"))
            .respond_with(ResponseTemplate::new(200).set_body_string(next_data_page(
                "https://v16.tiktokcdn.com/play.mp4",
                "https://sf16.tiktokcdn.com/music.mp3",
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/@chef.example/video/1"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/login"))
            .mount(&server)
            .await;

        let source = TikTokSource::with_base_url(&HttpConfig::default(), &server.uri()).unwrap();
        let reference = "https://www.tiktok.com/@chef.example/video/7234567890123456789";

        let LoadResult::Track(track) = source.load(reference, &LoadOptions::default()).await.unwrap() else {
            panic!("expected a track");
        };
        assert_eq!(track.info.identifier, "7234567890123456789");
        assert_eq!(track.info.title, "cooking pasta #food");
        assert_eq!(track.info.length, 27_000);
        assert_eq!(track.info.uri.as_deref(), Some(reference));

        let missing = source
            .load("https://www.tiktok.com/@chef.example/video/1", &LoadOptions::default())
            .await
            .unwrap();
        assert!(missing.is_empty());
    }
}

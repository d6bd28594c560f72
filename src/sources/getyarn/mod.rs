use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;

use crate::{
    common::{AudioFormat, FakeBrowserFilter, HttpClient, SourceError, SourceResult, text::meta_property},
    configs::HttpConfig,
    protocol::tracks::{LoadResult, TrackInfo},
    sources::plugin::{AudioTrack, LoadOptions, PlaybackStrategy, SourcePlugin, TemplatePlayback},
};

const BASE_URL: &str = "https://getyarn.io";

static CLIP_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?getyarn\.io/yarn-clip/(?P<id>[a-zA-Z0-9-]+)/?(?:[?#].*)?$").unwrap()
});

pub fn parse_clip_id(url: &str) -> Option<&str> {
    CLIP_URL_RE
        .captures(url)
        .and_then(|caps| caps.name("id"))
        .map(|m| m.as_str())
}

fn playback_url(info: &TrackInfo) -> String {
    format!("https://y.yarn.co/{}.mp4?v=0", info.identifier)
}

pub struct GetyarnSource {
    client: HttpClient,
    base_url: String,
    playback: Arc<dyn PlaybackStrategy>,
}

impl GetyarnSource {
    pub fn new(http: &HttpConfig) -> SourceResult<Self> {
        Self::with_base_url(http, BASE_URL)
    }

    pub fn with_base_url(http: &HttpConfig, base_url: &str) -> SourceResult<Self> {
        let client = HttpClient::builder()
            .timeouts(http)
            .filter(Arc::new(FakeBrowserFilter::new()))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            playback: TemplatePlayback::new(playback_url, AudioFormat::Mp4),
        })
    }
}

#[async_trait]
impl SourcePlugin for GetyarnSource {
    fn name(&self) -> &str {
        "getyarn"
    }

    fn can_handle(&self, identifier: &str) -> bool {
        CLIP_URL_RE.is_match(identifier)
    }

    async fn load(&self, identifier: &str, _options: &LoadOptions) -> SourceResult<LoadResult> {
        let Some(clip_id) = parse_clip_id(identifier) else {
            return Ok(LoadResult::Empty {});
        };

        let url = format!("{}/yarn-clip/{}", self.base_url, clip_id);
        let (status, html) = self.client.fetch_text(self.client.get(&url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(LoadResult::Empty {});
        }
        if status != StatusCode::OK {
            return Err(SourceError::from_status(status, url));
        }

        let title = meta_property(&html, "og:title").ok_or_else(|| SourceError::shape("og:title", &url))?;
        let info = TrackInfo::new(
            "getyarn",
            clip_id,
            title,
            "getyarn.io",
            0,
            format!("{}/yarn-clip/{}", BASE_URL, clip_id),
        )
        .with_artwork(meta_property(&html, "og:image"));

        Ok(LoadResult::Track(AudioTrack::new(info, self.playback.clone())))
    }

    fn decode_track(&self, info: TrackInfo, _payload: &[u8]) -> SourceResult<AudioTrack> {
        Ok(AudioTrack::new(info, self.playback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    const CLIP_ID: &str = "5c3e4a1b-9d2f-4b8e-a7c6-1f0e2d3c4b5a";

    #[test]
    fn test_url_patterns() {
        assert_eq!(
            parse_clip_id(&format!("https://getyarn.io/yarn-clip/{}", CLIP_ID)),
            Some(CLIP_ID)
        );
        assert_eq!(parse_clip_id("https://getyarn.io/yarn-find?text=hello"), None);
    }

    #[tokio::test]
    async fn test_load_clip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/yarn-clip/{}", CLIP_ID)))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><head><meta property="og:title" content="Yarn | I&#39;ll be back"><meta property="og:image" content="https://y.yarn.co/thumb.png"></head></html>"#,
            ))
            .mount(&server)
            .await;

        let source = GetyarnSource::with_base_url(&HttpConfig::default(), &server.uri()).unwrap();
        let LoadResult::Track(track) = source
            .load(&format!("https://getyarn.io/yarn-clip/{}", CLIP_ID), &LoadOptions::default())
            .await
            .unwrap()
        else {
            panic!("expected a track");
        };

        assert_eq!(track.info.title, "Yarn | I'll be back");
        assert_eq!(track.info.artwork_url.as_deref(), Some("https://y.yarn.co/thumb.png"));
        assert_eq!(
            track.playback_url().await.unwrap(),
            format!("https://y.yarn.co/{}.mp4?v=0", CLIP_ID)
        );
    }

    #[tokio::test]
    async fn test_page_without_title_is_a_shape_change() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let source = GetyarnSource::with_base_url(&HttpConfig::default(), &server.uri()).unwrap();
        let err = source
            .load(&format!("https://getyarn.io/yarn-clip/{}", CLIP_ID), &LoadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::ContentShapeChanged { ref marker, .. } if marker == "og:title"));
    }
}

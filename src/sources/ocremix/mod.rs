use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;

use crate::{
    common::{HttpClient, SourceError, SourceResult, text::meta_property},
    configs::HttpConfig,
    protocol::tracks::{LoadResult, TrackInfo},
    sources::plugin::{AudioTrack, LoadOptions, SourcePlugin},
};

pub mod track;

use track::OcremixPlayback;

const BASE_URL: &str = "https://ocremix.org";

static REMIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://(?:www\.)?ocremix\.org/remix/)?(?P<id>OCR\d+)/?$").unwrap()
});

static MP3_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="(https?://[^"]+\.mp3)""#).unwrap());

static ARTIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="/artist/\d+/[^"]*"[^>]*>([^<]+)</a>"#).unwrap());

pub fn parse_remix_id(identifier: &str) -> Option<&str> {
    REMIX_RE
        .captures(identifier)
        .and_then(|caps| caps.name("id"))
        .map(|m| m.as_str())
}

pub(crate) fn page_url(base_url: &str, remix_id: &str) -> String {
    format!("{}/remix/{}", base_url, remix_id)
}

/// First MP3 mirror linked from a remix page.
pub fn extract_mp3_url(html: &str) -> Option<&str> {
    MP3_LINK_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// `Ok(None)` when the remix page does not exist.
pub(crate) async fn fetch_page(client: &HttpClient, url: &str) -> SourceResult<Option<String>> {
    let (status, html) = client.fetch_text(client.get(url)).await?;
    match status {
        StatusCode::OK => Ok(Some(html)),
        StatusCode::NOT_FOUND => Ok(None),
        other => Err(SourceError::from_status(other, url)),
    }
}

pub struct OcremixSource {
    client: HttpClient,
    base_url: String,
}

impl OcremixSource {
    pub fn new(http: &HttpConfig) -> SourceResult<Self> {
        Self::with_base_url(http, BASE_URL)
    }

    pub fn with_base_url(http: &HttpConfig, base_url: &str) -> SourceResult<Self> {
        Ok(Self {
            client: HttpClient::builder().timeouts(http).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn playback(&self) -> Arc<OcremixPlayback> {
        Arc::new(OcremixPlayback::new(self.client.clone(), self.base_url.clone()))
    }
}

#[async_trait]
impl SourcePlugin for OcremixSource {
    fn name(&self) -> &str {
        "ocremix"
    }

    fn can_handle(&self, identifier: &str) -> bool {
        REMIX_RE.is_match(identifier)
    }

    async fn load(&self, identifier: &str, _options: &LoadOptions) -> SourceResult<LoadResult> {
        let Some(remix_id) = parse_remix_id(identifier) else {
            return Ok(LoadResult::Empty {});
        };

        let url = page_url(&self.base_url, remix_id);
        let Some(html) = fetch_page(&self.client, &url).await? else {
            return Ok(LoadResult::Empty {});
        };
        if extract_mp3_url(&html).is_none() {
            return Err(SourceError::shape("mp3 download link", url));
        }

        let title = meta_property(&html, "og:title").ok_or_else(|| SourceError::shape("og:title", &url))?;
        let author = ARTIST_RE
            .captures(&html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| "OverClocked ReMix".to_string());

        let info = TrackInfo::new("ocremix", remix_id, title, author, 0, page_url(BASE_URL, remix_id))
            .with_artwork(meta_property(&html, "og:image"));

        Ok(LoadResult::Track(AudioTrack::new(info, self.playback())))
    }

    fn decode_track(&self, info: TrackInfo, _payload: &[u8]) -> SourceResult<AudioTrack> {
        Ok(AudioTrack::new(info, self.playback()))
    }
}

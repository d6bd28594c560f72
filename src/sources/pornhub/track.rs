use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;

use crate::{
    common::{AudioFormat, HttpClient, SourceError, SourceResult},
    protocol::tracks::TrackInfo,
    sources::plugin::{CachedUrl, PlaybackAttempt, PlaybackStrategy},
};

static MEDIA_STRING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(var\s+?mediastring.+?)</script>").unwrap());

static MEDIA_STRING_FILTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\* \+ [a-zA-Z0-9_]+ \+ \*/").unwrap());

static CONCAT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""\s+?\+\s+?""#).unwrap());

/// Rebuilds the media URL that the page assembles from obfuscated
/// string variables.
pub fn parse_media_url(html: &str, url: &str) -> SourceResult<String> {
    let js = MEDIA_STRING_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| SourceError::shape("mediastring", url))?
        .as_str();

    let filtered = MEDIA_STRING_FILTER_RE.replace_all(js, "");
    let expression = filtered
        .split('=')
        .nth(1)
        .and_then(|rhs| rhs.split(';').next())
        .ok_or_else(|| SourceError::shape("mediastring assignment", url))?;

    let mut media_url = String::new();
    for item in expression.split('+').map(str::trim).filter(|s| !s.is_empty()) {
        let part_re = Regex::new(&format!(
            r#"var\s+?{}="([a-zA-Z0-9=?&%~_\-\./"+: ]+)";"#,
            regex::escape(item)
        ))
        .map_err(|e| SourceError::InvalidInput(e.to_string()))?;

        let part = part_re
            .captures(html)
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| SourceError::shape(format!("URL part {}", item), url))?;

        media_url.push_str(&CONCAT_RE.replace_all(part.as_str(), ""));
    }

    Ok(media_url)
}

/// Re-reads the watch page on first play and reassembles the media URL.
pub struct PornHubPlayback {
    client: HttpClient,
    base_url: String,
    resolved: CachedUrl,
}

impl PornHubPlayback {
    pub fn new(client: HttpClient, base_url: String) -> Self {
        Self {
            client,
            base_url,
            resolved: CachedUrl::new(),
        }
    }

    async fn resolve(&self, info: &TrackInfo) -> SourceResult<String> {
        let view_key = super::parse_view_key(&info.identifier)
            .ok_or_else(|| SourceError::InvalidInput(format!("not a video url: {}", info.identifier)))?;
        let url = super::page_url(&self.base_url, view_key);

        let (status, html) = self.client.fetch_text(self.client.get(&url)).await?;
        if status != StatusCode::OK {
            return Err(SourceError::from_status(status, url));
        }
        parse_media_url(&html, &url)
    }
}

#[async_trait]
impl PlaybackStrategy for PornHubPlayback {
    async fn playback_url(&self, info: &TrackInfo, attempt: PlaybackAttempt) -> SourceResult<String> {
        self.resolved.get_or_resolve(attempt, || self.resolve(info)).await
    }

    fn container(&self, _url: &str) -> AudioFormat {
        AudioFormat::Mp4
    }

    fn fresh(&self) -> Arc<dyn PlaybackStrategy> {
        Arc::new(Self::new(self.client.clone(), self.base_url.clone()))
    }
}

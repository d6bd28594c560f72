use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use base64::prelude::*;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::{
    common::{
        FakeBrowserFilter, HttpClient, SourceError, SourceResult,
        text::{url_decode, xor_bytes},
    },
    configs::HttpConfig,
    protocol::tracks::{LoadResult, TrackInfo},
    sources::plugin::{AudioTrack, LoadOptions, SourcePlugin},
};

pub mod track;

use track::MixcloudPlayback;

const DECRYPTION_KEY: &[u8] = b"IFYOUWANTTHEARTISTSTOGETPAIDDONOTDOWNLOADFROMMIXCLOUD";
const GRAPHQL_URL: &str = "https://app.mixcloud.com/graphql";

const TRACK_FIELDS: &str = "    audioLength
    name
    owner {
      username
    }
    picture(width: 1024, height: 1024) {
      url
    }
    streamInfo {
      dashUrl
      hlsUrl
      url
    }";

/// Path segments that are user pages rather than uploads.
const RESERVED_SLUGS: &[&str] = &["stream", "uploads", "favorites", "listens", "playlists"];

static TRACK_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:(?:www|beta|m)\.)?mixcloud\.com/(?P<user>[^/]+)/(?P<slug>[^/]+)/?$")
        .unwrap()
});

/// Splits a cloudcast page URL into the decoded `(username, slug)`.
pub fn parse_track_url(url: &str) -> Option<(String, String)> {
    let caps = TRACK_URL_RE.captures(url)?;
    let user = url_decode(caps.name("user")?.as_str());
    let slug = url_decode(caps.name("slug")?.as_str());
    if RESERVED_SLUGS.contains(&slug.as_str()) {
        return None;
    }
    Some((user, slug))
}

/// Builds a `cloudcastLookup` query selecting `fields`.
pub(crate) fn lookup_query(username: &str, slug: &str, fields: &str) -> String {
    // JSON string literals are valid GraphQL string literals.
    let username = serde_json::to_string(username).unwrap_or_default();
    let slug = serde_json::to_string(slug).unwrap_or_default();
    format!(
        "{{\n  cloudcastLookup(lookup: {{username: {}, slug: {}}}) {{\n{}\n  }}\n}}",
        username, slug, fields
    )
}

/// Decodes a base64 stream URL and removes the XOR scrambling.
pub fn decrypt(ciphertext_b64: &str) -> SourceResult<String> {
    let ciphertext = BASE64_STANDARD
        .decode(ciphertext_b64.trim())
        .map_err(|e| SourceError::Decode(format!("stream url is not base64: {}", e)))?;
    String::from_utf8(xor_bytes(&ciphertext, DECRYPTION_KEY))
        .map_err(|e| SourceError::Decode(format!("stream url is not utf-8: {}", e)))
}

/// Runs a GraphQL query; `Ok(None)` means the lookup returned nothing.
pub(crate) async fn graphql_lookup(
    client: &HttpClient,
    endpoint: &str,
    query: &str,
) -> SourceResult<Option<Value>> {
    let url = format!("{}?query={}", endpoint, urlencoding::encode(query));
    let (status, body) = client.fetch_text(client.get(&url)).await?;

    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if status != StatusCode::OK {
        return Err(SourceError::from_status(status, endpoint));
    }

    let mut json: Value = serde_json::from_str(&body)?;
    let lookup = json["data"]["cloudcastLookup"].take();
    Ok(if lookup.is_null() { None } else { Some(lookup) })
}

pub struct MixcloudSource {
    client: HttpClient,
    endpoint: String,
}

impl MixcloudSource {
    pub fn new(http: &HttpConfig) -> SourceResult<Self> {
        Self::with_endpoint(http, GRAPHQL_URL)
    }

    pub fn with_endpoint(http: &HttpConfig, endpoint: &str) -> SourceResult<Self> {
        let client = HttpClient::builder()
            .timeouts(http)
            .filter(Arc::new(FakeBrowserFilter::new()))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    fn parse_track_data(&self, data: &Value, slug: &str, uri: &str) -> Option<TrackInfo> {
        if data["streamInfo"].is_null() {
            return None;
        }

        let title = data["name"].as_str()?;
        let author = data["owner"]["username"].as_str()?;
        let length = data["audioLength"].as_u64().unwrap_or(0) * 1000;
        let artwork_url = data["picture"]["url"].as_str().map(str::to_string);

        Some(TrackInfo::new("mixcloud", slug, title, author, length, uri).with_artwork(artwork_url))
    }

    fn playback(&self) -> Arc<MixcloudPlayback> {
        Arc::new(MixcloudPlayback::new(self.client.clone(), self.endpoint.clone()))
    }
}

#[async_trait]
impl SourcePlugin for MixcloudSource {
    fn name(&self) -> &str {
        "mixcloud"
    }

    fn can_handle(&self, identifier: &str) -> bool {
        parse_track_url(identifier).is_some()
    }

    async fn load(&self, identifier: &str, _options: &LoadOptions) -> SourceResult<LoadResult> {
        let Some((username, slug)) = parse_track_url(identifier) else {
            return Ok(LoadResult::Empty {});
        };

        let query = lookup_query(
            &username,
            &slug,
            TRACK_FIELDS,
        );

        let Some(data) = graphql_lookup(&self.client, &self.endpoint, &query).await? else {
            debug!("Mixcloud lookup for {}/{} returned nothing", username, slug);
            return Ok(LoadResult::Empty {});
        };

        Ok(match self.parse_track_data(&data, &slug, identifier) {
            Some(info) => LoadResult::Track(AudioTrack::new(info, self.playback())),
            None => LoadResult::Empty {},
        })
    }

    fn decode_track(&self, info: TrackInfo, _payload: &[u8]) -> SourceResult<AudioTrack> {
        Ok(AudioTrack::new(info, self.playback()))
    }
}
